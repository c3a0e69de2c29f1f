//! Service-layer API (spec.md §4.I): the user-facing socket surface.
//!
//! Grounded on spec.md §4.I directly; the blocking-call shape (an
//! `async fn` wrapping a channel recv in `tokio::time::timeout`) is
//! grounded on the teacher's `Handle<Ip>`/`Client::open` request/response
//! round trip in `handle.rs`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use crate::conn::{ClosedBy, ConnKind, Connection};
use crate::error::{CspError, Result};
use crate::id::{Flags, Identifier, Priority};
use crate::stack::Stack;

/// Requirements a listening socket imposes on inbound traffic. Kept
/// separate from the wire-carried [`Flags`] on the identifier, per
/// `DESIGN.md`'s Open Question resolution on `idin.flags`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketFlags(pub u8);

impl SocketFlags {
    pub const CONN_LESS: SocketFlags = SocketFlags(0x01);
    pub const HMAC_REQUIRED: SocketFlags = SocketFlags(0x02);
    pub const CRC_REQUIRED: SocketFlags = SocketFlags(0x04);
    pub const XTEA_REQUIRED: SocketFlags = SocketFlags(0x08);
    pub const RDP_REQUIRED: SocketFlags = SocketFlags(0x10);

    pub const fn contains(self, other: SocketFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SocketFlags {
    type Output = SocketFlags;
    fn bitor(self, rhs: SocketFlags) -> SocketFlags {
        SocketFlags(self.0 | rhs.0)
    }
}

/// A passive binding of a local port to a user endpoint (spec.md §3).
pub struct Socket {
    pub flags: SocketFlags,
    port: Mutex<Option<u8>>,
    /// Backlog of accepted connections, for connection-oriented sockets.
    accept_tx: mpsc::Sender<Arc<Connection>>,
    accept_rx: Mutex<mpsc::Receiver<Arc<Connection>>>,
    /// For `CONN_LESS` sockets, the single long-lived connection record
    /// whose receive queues serve as this socket's receive queue.
    connless: Mutex<Option<Arc<Connection>>>,
}

impl Socket {
    pub fn new(flags: SocketFlags, backlog: usize) -> Arc<Self> {
        let (accept_tx, accept_rx) = mpsc::channel(backlog.max(1));
        Arc::new(Self {
            flags,
            port: Mutex::new(None),
            accept_tx,
            accept_rx: Mutex::new(accept_rx),
            connless: Mutex::new(None),
        })
    }

    pub async fn bound_port(&self) -> Option<u8> {
        *self.port.lock().await
    }

    /// The backing connection for a `CONN_LESS` socket, whose receive
    /// queues serve as this socket's receive queue (spec.md §4.G).
    pub async fn connless_connection(&self) -> Option<Arc<Connection>> {
        self.connless.lock().await.clone()
    }
}

/// Bind `socket` to `port` (or the wildcard when `port` is `None`).
pub async fn bind(stack: &Stack, socket: &Arc<Socket>, port: Option<u8>) -> Result<()> {
    *socket.port.lock().await = port;
    stack.register_socket(port, socket.clone()).await
}

/// Mark `socket` as listening: for `CONN_LESS` sockets this allocates
/// the backing connection eagerly; connection-oriented sockets accept
/// lazily as SYNs arrive.
pub async fn listen(stack: &Stack, socket: &Arc<Socket>) -> Result<()> {
    if socket.flags.contains(SocketFlags::CONN_LESS) {
        let port = socket.bound_port().await.unwrap_or(0);
        let idin = Identifier {
            priority: Priority::Normal,
            source: 0,
            destination: stack.local_address,
            source_port: 0,
            destination_port: port,
            flags: Flags::NONE,
        };
        let conn = stack.conns.allocate(idin, idin, ConnKind::ConnectionLess).await?;
        *socket.connless.lock().await = Some(conn);
    }
    Ok(())
}

/// Block up to `timeout_dur` for an incoming connection (RDP handshake
/// completed by the router before the connection is pushed here).
pub async fn accept(socket: &Arc<Socket>, timeout_dur: Option<Duration>) -> Result<Arc<Connection>> {
    let mut rx = socket.accept_rx.lock().await;
    match timeout_dur {
        Some(d) => timeout(d, rx.recv()).await.map_err(|_| CspError::TimedOut)?.ok_or(CspError::Reset),
        None => rx.recv().await.ok_or(CspError::Reset),
    }
}

/// Push a just-accepted connection onto the socket's backlog (called by
/// the router once an RDP handshake completes).
pub async fn deliver_accepted(socket: &Arc<Socket>, conn: Arc<Connection>) -> Result<()> {
    socket.accept_tx.send(conn).await.map_err(|_| CspError::NoBufs)
}

/// Active-open a connection to `(dst, dport)`. When `rdp` is set,
/// performs the three-way handshake before returning, per spec.md §4.I.
pub async fn connect(
    stack: &Stack,
    priority: Priority,
    dst: u16,
    dport: u8,
    rdp: bool,
    timeout_dur: Option<Duration>,
) -> Result<Arc<Connection>> {
    let sport = stack.allocate_ephemeral_port().await?;
    let idout = Identifier {
        priority,
        source: stack.local_address,
        destination: dst,
        source_port: sport,
        destination_port: dport,
        flags: if rdp { Flags::RDP } else { Flags::NONE },
    };
    let idin = Identifier {
        priority,
        source: dst,
        destination: stack.local_address,
        source_port: dport,
        destination_port: sport,
        flags: idout.flags,
    };
    let conn = stack.conns.allocate(idin, idout, ConnKind::ConnectionOriented).await?;

    if rdp {
        crate::router::perform_rdp_handshake(stack, &conn, timeout_dur).await?;
    }
    Ok(conn)
}

/// Pack an outgoing packet from `conn.idout`, apply configured
/// transforms (CRC32 → HMAC → XTEA, per spec.md §4.L), and hand off to
/// the router for transmission.
pub async fn send(stack: &Stack, conn: &Arc<Connection>, packet: crate::buffer::Packet, timeout_dur: Option<Duration>) -> Result<()> {
    crate::router::send_on_connection(stack, conn, packet, timeout_dur).await
}

/// Priority-ordered dequeue with timeout.
pub async fn read(conn: &Arc<Connection>, timeout_dur: Option<Duration>) -> Result<crate::buffer::Packet> {
    let closed_err = || if conn.timed_out() { CspError::TimedOut } else { CspError::Reset };
    match timeout_dur {
        Some(d) => timeout(d, conn.read()).await.map_err(|_| CspError::TimedOut)?.ok_or_else(closed_err),
        None => conn.read().await.ok_or_else(closed_err),
    }
}

/// Connection-less send (spec.md §4.I): pack and transmit a one-off
/// packet to `(dst, dport)` without allocating a connection record.
pub async fn sendto(stack: &Stack, priority: Priority, dst: u16, dport: u8, sport: u8, packet: crate::buffer::Packet) -> Result<()> {
    let id = Identifier {
        priority,
        source: stack.local_address,
        destination: dst,
        source_port: sport,
        destination_port: dport,
        flags: Flags::NONE,
    };
    crate::router::transmit_packet(stack, packet, id).await
}

/// Connection-less receive (spec.md §4.I): dequeue from `socket`'s
/// backing connection, which the router feeds directly for `CONN_LESS`
/// sockets without ever materializing a 4-tuple connection record.
pub async fn recvfrom(socket: &Arc<Socket>, timeout_dur: Option<Duration>) -> Result<crate::buffer::Packet> {
    let conn = socket.connless_connection().await.ok_or(CspError::NotSup)?;
    match timeout_dur {
        Some(d) => timeout(d, conn.read()).await.map_err(|_| CspError::TimedOut)?.ok_or(CspError::Reset),
        None => conn.read().await.ok_or(CspError::Reset),
    }
}

/// Close `conn`: on RDP connections this sends `FIN` and enters
/// `CLOSE_WAIT`, leaving the connection table slot in place until the
/// router's timer tick sees the linger deadline elapse (retransmitting
/// the `FIN` in the meantime if it's lost); connection-less and
/// non-RDP connections are torn down immediately.
pub async fn close(stack: &Stack, conn: &Arc<Connection>) -> Result<()> {
    let mut rdp = conn.rdp.lock().await;
    if let Some(block) = rdp.as_mut() {
        let header = block.begin_close();
        drop(rdp);
        crate::router::send_closing_control(stack, conn, header).await?;
    } else {
        drop(rdp);
        stack.conns.close(conn, ClosedBy::Local).await;
    }
    Ok(())
}
