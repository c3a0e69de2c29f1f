//! RDP-backed SFP transfer: a single loopback node establishes an RDP
//! connection to one of its own ports, then fragments and reassembles a
//! blob larger than the path MTU across it (spec.md §8 scenario 6).

use csp::clock::Capabilities;
use csp::config::Config;
use csp::id::Priority;
use csp::sfp;
use csp::socket::{self, Socket, SocketFlags};
use csp::stack::Stack;

#[tokio::main]
async fn main() -> csp::error::Result<()> {
    tracing_subscriber::fmt::init();

    let stack = Stack::new(Config::default(), 1, Capabilities::default());
    csp::router::install_loopback(&stack);
    csp::router::spawn(stack.clone());

    let port = 40;
    let server = Socket::new(SocketFlags::RDP_REQUIRED, 1);
    socket::bind(&stack, &server, Some(port)).await?;

    let client_conn = socket::connect(&stack, Priority::Normal, 1, port, true, None).await?;
    let server_conn = socket::accept(&server, None).await?;

    let blob: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();
    let mtu = 256;

    // `sfp::send`'s chunk callback is synchronous (it stands in for the
    // original's caller-supplied `memcpy`), so fragments are collected
    // first and sent afterward, sequentially, to keep this single
    // RDP connection's send order intact.
    let mut fragments = Vec::new();
    sfp::send(&stack.buffers, &blob, mtu, |packet| {
        fragments.push(packet);
        Ok(())
    })
    .await?;
    for fragment in fragments {
        socket::send(&stack, &client_conn, fragment, None).await?;
    }

    let mut reassembler = sfp::Reassembler::new();
    let received = loop {
        let fragment = socket::read(&server_conn, Some(std::time::Duration::from_secs(2))).await?;
        if let Some(blob) = reassembler.recv_fragment(&fragment).await? {
            break blob;
        }
    };

    assert_eq!(received, blob);
    println!("reassembled {} bytes over RDP+SFP", received.len());
    Ok(())
}
