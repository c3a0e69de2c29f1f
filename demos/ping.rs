//! Loopback ping: a single node, no real link, the `PING` service port
//! echoing a payload back to its sender (spec.md §8 scenario 1).

use csp::clock::Capabilities;
use csp::config::Config;
use csp::id::Priority;
use csp::socket;

#[tokio::main]
async fn main() -> csp::error::Result<()> {
    tracing_subscriber::fmt::init();

    let stack = csp::Stack::new(Config::default(), 1, Capabilities::default());
    csp::router::install_loopback(&stack);
    csp::router::spawn(stack.clone());
    csp::service::spawn(stack.clone()).await?;

    let conn = socket::connect(&stack, Priority::Normal, 1, csp::service::PING, false, None).await?;
    let packet = stack.buffers.get().await?;
    packet.set_payload(b"abc").await?;
    socket::send(&stack, &conn, packet, None).await?;

    let reply = socket::read(&conn, Some(std::time::Duration::from_secs(1))).await?;
    println!("ping reply: {:?}", &reply.frame().await[..]);
    Ok(())
}
