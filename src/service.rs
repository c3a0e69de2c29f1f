//! Built-in service handler (spec.md §4.M): automatic responders bound
//! to the well-known service ports when delivered to an `ANY`-bound
//! socket.
//!
//! Grounded on `csp_service_handler.c`'s (FreeRTOS variant, present in
//! `examples/original_source/`) `switch (conn->idin.dport)` dispatch —
//! `PING`/`PS`/`MEMFREE`/`REBOOT`/`BUF_FREE` are carried over directly;
//! `UPTIME`/`IDENT`/`SHUTDOWN` are named by spec.md §4.M but not bodied
//! in the retrieved source, so they're filled in from the same pattern.
//! `PS`/`REBOOT`/`SHUTDOWN`'s platform hooks are modeled as the
//! `Capabilities` record from `clock.rs`, per spec.md §9's "capability
//! record" design note.

use std::sync::Arc;

use crate::buffer::Packet;
use crate::error::Result;
use crate::id::Priority;
use crate::socket::{self, Socket, SocketFlags};
use crate::stack::Stack;

/// Well-known destination ports a service socket answers on, matching
/// libcsp's public `CSP_PING`..`CSP_IDENT` numbering.
pub const PING: u8 = 1;
pub const PS: u8 = 2;
pub const MEMFREE: u8 = 3;
pub const REBOOT: u8 = 4;
pub const BUF_FREE: u8 = 5;
pub const UPTIME: u8 = 6;
pub const IDENT: u8 = 7;
pub const SHUTDOWN: u8 = 8;

const REBOOT_MAGIC: u32 = 0x8007_8007;
const SHUTDOWN_MAGIC: u32 = 0x2525_2525;

/// Crate version/build string returned by `IDENT`, in the same spirit
/// as libcsp's `csp_sys_get_ident` banner.
fn ident_string() -> String {
    format!("CSP {} ({})", env!("CARGO_PKG_VERSION"), std::env::consts::ARCH)
}

/// Bind a `CONN_LESS`, `ANY`-ported socket and serve requests on it for
/// the lifetime of `stack`. Spawn as its own task alongside the router
/// and (optionally) the bridge.
pub async fn spawn(stack: Arc<Stack>) -> Result<tokio::task::JoinHandle<()>> {
    let sock = Socket::new(SocketFlags::CONN_LESS, 1);
    socket::bind(&stack, &sock, None).await?;
    socket::listen(&stack, &sock).await?;
    let conn = sock.connless_connection().await.expect("listen() allocates a backing connection");

    Ok(tokio::spawn(async move {
        loop {
            let Ok(packet) = socket::read(&conn, None).await else { break };
            let id = packet.identifier().await;
            if let Err(e) = handle_one(&stack, id, packet).await {
                tracing::warn!(error = ?e, port = id.destination_port, "service handler request failed");
            }
        }
    }))
}

/// Dispatch one request by destination port, mutating `packet`'s payload
/// in place and echoing it back to `id`'s sender. `id` is the just-read
/// packet's own identifier (captured before dispatch, since every
/// request shares the one `ANY`-bound connless connection and so
/// carries its own per-request return address — unlike a
/// connection-oriented `conn.idin`, which would be stale here). Returns
/// `Ok(())` for ports this handler doesn't own (nothing to do, nothing
/// freed: caller owns disposal of unmatched packets).
async fn handle_one(stack: &Stack, id: crate::id::Identifier, packet: Packet) -> Result<()> {
    match id.destination_port {
        PING => reply(stack, id, packet).await,
        PS => {
            let listing = stack
                .capabilities
                .task_lister
                .as_ref()
                .map(|l| l.list().iter().map(|t| format!("{} [{}]\n", t.name, t.state)).collect::<String>())
                .unwrap_or_default();
            packet.set_payload(listing.as_bytes()).await?;
            reply(stack, id, packet).await
        }
        MEMFREE => {
            packet.set_payload(&0u32.to_be_bytes()).await?;
            reply(stack, id, packet).await
        }
        BUF_FREE => {
            let free = stack.buffers.remaining() as u32;
            packet.set_payload(&free.to_be_bytes()).await?;
            reply(stack, id, packet).await
        }
        UPTIME => {
            let uptime = stack.uptime_seconds() as u32;
            packet.set_payload(&uptime.to_be_bytes()).await?;
            reply(stack, id, packet).await
        }
        IDENT => {
            packet.set_payload(ident_string().as_bytes()).await?;
            reply(stack, id, packet).await
        }
        REBOOT => {
            if magic_word_matches(&packet, REBOOT_MAGIC).await {
                if let Some(rebooter) = stack.capabilities.rebooter.as_ref() {
                    rebooter.reboot();
                }
            }
            Ok(())
        }
        SHUTDOWN => {
            if magic_word_matches(&packet, SHUTDOWN_MAGIC).await {
                if let Some(rebooter) = stack.capabilities.rebooter.as_ref() {
                    rebooter.shutdown();
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

async fn magic_word_matches(packet: &Packet, expected: u32) -> bool {
    let frame = packet.frame().await;
    frame.len() >= 4 && u32::from_be_bytes(frame[..4].try_into().unwrap()) == expected
}

/// Send `packet` back to the peer that sent `id`, swapping source/dest
/// and ports — matching the original's "reuse the incoming buffer, send
/// back" reply convention.
async fn reply(stack: &Stack, id: crate::id::Identifier, packet: Packet) -> Result<()> {
    let idout = crate::id::Identifier {
        priority: Priority::Normal,
        source: stack.local_address,
        destination: id.source,
        source_port: id.destination_port,
        destination_port: id.source_port,
        flags: crate::id::Flags::NONE,
    };
    crate::router::transmit_packet(stack, packet, idout).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_ports_are_distinct() {
        let ports = [PING, PS, MEMFREE, REBOOT, BUF_FREE, UPTIME, IDENT, SHUTDOWN];
        for (i, a) in ports.iter().enumerate() {
            for b in &ports[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[tokio::test]
    async fn magic_word_check_rejects_wrong_value() {
        let pool = crate::buffer::BufferPool::new(1);
        let p = pool.get().await.unwrap();
        p.set_payload(&0u32.to_be_bytes()).await.unwrap();
        assert!(!magic_word_matches(&p, REBOOT_MAGIC).await);
        p.set_payload(&REBOOT_MAGIC.to_be_bytes()).await.unwrap();
        assert!(magic_word_matches(&p, REBOOT_MAGIC).await);
    }
}
