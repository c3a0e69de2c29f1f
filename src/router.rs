//! Router task (spec.md §4.G): dequeues from the QoS input FIFO, applies
//! dedup and promiscuous publication, then either delivers locally or
//! forwards via the routing table. Also owns the outbound path
//! (`transmit_packet`) and the RDP retransmission timer tick, since both
//! share the same identifier-header and routing machinery the dequeue
//! loop uses.
//!
//! Grounded on spec.md §4.G plus `csp_fifo_qos.c`'s dequeue loop; the
//! dedicated-task-looping-on-a-channel structure is grounded on the
//! teacher's `Client::run` actor loop in `client.rs`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::buffer::Packet;
use crate::conn::{ClosedBy, ConnKind, ConnState, Connection};
use crate::crypto::crc32;
use crate::error::{CspError, Result};
use crate::id::{Flags, Identifier, Priority};
use crate::iface::{Interface, InterfaceDriver};
use crate::rdp::{RdpControlBlock, RdpFlags, RdpHeader, RdpState, ReceiveOutcome, TimeoutOutcome};
use crate::socket::{self, Socket, SocketFlags};
use crate::stack::Stack;

/// Spawn the router as its own task, draining the QoS input FIFO for the
/// lifetime of `stack`.
pub fn spawn(stack: Arc<Stack>) -> JoinHandle<()> {
    tokio::spawn(run(stack))
}

/// The router's main loop: dequeue, process; on a dequeue timeout (RDP
/// enabled), tick the retransmission timers instead.
pub async fn run(stack: Arc<Stack>) {
    loop {
        match stack.fifo.dequeue(stack.config.router_rx_timeout()).await {
            Some(incoming) => process(&stack, incoming.packet, incoming.iface).await,
            None => tick_rdp_timers(&stack).await,
        }
    }
}

/// Dedup, publish to the promiscuous sink, then deliver-or-forward.
/// Failures are logged and counted against the arriving interface, never
/// propagated (spec.md §7(c)'s local-recovery policy).
pub async fn process(stack: &Stack, packet: Packet, iface: Arc<Interface>) {
    let id = packet.identifier().await;

    if stack.dedup.check(&packet, stack.id_version).await {
        iface.record_drop();
        return;
    }

    stack.publish_promiscuous(&packet, &iface).await;

    let result = if is_local_destination(stack, id.destination) {
        deliver_locally(stack, packet, id, &iface).await
    } else {
        forward(stack, packet, id).await
    };

    if let Err(e) = result {
        tracing::warn!(error = ?e, dst = id.destination, "dropping packet");
        iface.record_drop();
    }
}

/// `true` if `dst` names this node directly, or is the subnet broadcast
/// address of any registered interface.
pub fn is_local_destination(stack: &Stack, dst: u16) -> bool {
    if dst == stack.local_address {
        return true;
    }
    let host_bits = stack.id_version.host_bits();
    stack
        .interfaces
        .iter()
        .into_iter()
        .any(|iface| iface.is_broadcast(dst, host_bits, stack.id_version))
}

async fn deliver_locally(stack: &Stack, packet: Packet, id: Identifier, iface: &Arc<Interface>) -> Result<()> {
    if let Err(e) = apply_rx_transforms(stack, &packet, id.flags).await {
        match e {
            CspError::Hmac => iface.record_autherr(),
            _ => iface.record_frame_error(),
        }
        return Err(e);
    }

    let socket = stack.socket_for_port(id.destination_port).await.ok_or(CspError::NotSup)?;
    if !socket_requirements_met(&socket, &id) {
        return Err(CspError::NotSup);
    }

    if id.flags.contains(Flags::RDP) {
        rdp_on_packet(stack, &socket, packet, id).await
    } else {
        deliver_to_connection(stack, &socket, packet, id).await
    }
}

/// Reverse of [`transmit_packet`]'s tx-transform chain: XTEA decrypt,
/// then HMAC verify, then CRC32 verify — each only if the arriving
/// packet's flags say it was applied.
async fn apply_rx_transforms(stack: &Stack, packet: &Packet, flags: Flags) -> Result<()> {
    if flags.contains(Flags::XTEA) {
        let key = stack.xtea_key.lock().await;
        let key = key.as_ref().ok_or(CspError::Inval)?;
        key.decrypt_packet(packet).await?;
    }
    if flags.contains(Flags::HMAC) {
        let key = stack.hmac_key.lock().await;
        key.verify(packet, stack.id_version, false).await?;
    }
    if flags.contains(Flags::CRC32) {
        crc32::verify(packet).await?;
    }
    Ok(())
}

/// A listening socket's declared requirements must all be satisfied by
/// the arriving packet's wire flags, per `DESIGN.md`'s Open Question
/// resolution keeping socket requirements separate from wire flags.
fn socket_requirements_met(socket: &Socket, id: &Identifier) -> bool {
    (!socket.flags.contains(SocketFlags::RDP_REQUIRED) || id.flags.contains(Flags::RDP))
        && (!socket.flags.contains(SocketFlags::HMAC_REQUIRED) || id.flags.contains(Flags::HMAC))
        && (!socket.flags.contains(SocketFlags::CRC_REQUIRED) || id.flags.contains(Flags::CRC32))
        && (!socket.flags.contains(SocketFlags::XTEA_REQUIRED) || id.flags.contains(Flags::XTEA))
}

/// Non-RDP delivery: straight into the backing connection's receive
/// queue, passively allocating a connection-oriented record on first
/// contact if the socket isn't `CONN_LESS`.
async fn deliver_to_connection(stack: &Stack, socket: &Arc<Socket>, packet: Packet, id: Identifier) -> Result<()> {
    if socket.flags.contains(SocketFlags::CONN_LESS) {
        let conn = socket.connless_connection().await.ok_or(CspError::Reset)?;
        conn.deliver(id.priority, packet).await
    } else {
        let conn = match stack.conns.lookup(id.source, id.source_port, id.destination, id.destination_port).await {
            Some(conn) => conn,
            None => {
                let idout = Identifier {
                    priority: id.priority,
                    source: id.destination,
                    destination: id.source,
                    source_port: id.destination_port,
                    destination_port: id.source_port,
                    flags: id.flags,
                };
                let conn = stack.conns.allocate(id, idout, ConnKind::ConnectionOriented).await?;
                socket::deliver_accepted(socket, conn.clone()).await?;
                conn
            }
        };
        conn.deliver(id.priority, packet).await
    }
}

/// RDP segment dispatch: strips the RDP header (leaving the user
/// payload, if any), then branches on the control flags to drive the
/// per-connection `RdpControlBlock` state machine.
async fn rdp_on_packet(stack: &Stack, socket: &Arc<Socket>, packet: Packet, id: Identifier) -> Result<()> {
    let (header, payload): (RdpHeader, Vec<u8>) = {
        let frame = packet.frame().await;
        let (header, rest) = RdpHeader::from_bytes(&frame)?;
        (header, rest.to_vec())
    };
    packet.set_payload(&payload).await?;

    if header.flags.contains(RdpFlags::SYN) && !header.flags.contains(RdpFlags::ACK) {
        return accept_incoming_rdp(stack, socket, &header, id).await;
    }

    let conn = stack
        .conns
        .lookup(id.source, id.source_port, id.destination, id.destination_port)
        .await
        .ok_or(CspError::Reset)?;

    if header.flags.contains(RdpFlags::RST) {
        conn.mark_timed_out();
        stack.conns.close(&conn, ClosedBy::Remote).await;
        return Ok(());
    }

    if header.flags.contains(RdpFlags::FIN) {
        let reply = {
            let mut rdp = conn.rdp.lock().await;
            rdp.as_mut().ok_or(CspError::Reset)?.on_peer_close()
        };
        send_closing_control(stack, &conn, reply).await?;
        // Stays in the table through CLOSE_WAIT; `tick_rdp_timers` closes
        // it once `check_timeouts` reports the linger deadline elapsed.
        return Ok(());
    }

    if header.flags.contains(RdpFlags::SYN) && header.flags.contains(RdpFlags::ACK) {
        let ack = {
            let mut rdp = conn.rdp.lock().await;
            rdp.as_mut().ok_or(CspError::Reset)?.complete_handshake(&header)
        };
        send_rdp_control(stack, &conn, ack).await?;
        conn.rdp_notify.notify_waiters();
        return Ok(());
    }

    let was_syn_rcvd = {
        let rdp = conn.rdp.lock().await;
        rdp.as_ref().ok_or(CspError::Reset)?.state == RdpState::SynRcvd
    };
    if was_syn_rcvd {
        {
            let mut rdp = conn.rdp.lock().await;
            rdp.as_mut().ok_or(CspError::Reset)?.confirm_open(&header)?;
        }
        conn.rdp_notify.notify_waiters();
        return socket::deliver_accepted(socket, conn.clone()).await;
    }

    let (outcome, ack) = {
        let mut rdp = conn.rdp.lock().await;
        let block = rdp.as_mut().ok_or(CspError::Reset)?;
        let outcome = block.on_data(&header, packet);
        let ack = block.ack_header();
        (outcome, ack)
    };
    send_rdp_control(stack, &conn, ack).await?;

    if let ReceiveOutcome::Deliver(packets) = outcome {
        for p in packets {
            let priority = p.identifier().await.priority;
            conn.deliver(priority, p).await?;
        }
    }
    Ok(())
}

/// Server side of the three-way handshake: a `SYN` arrived for a
/// listening RDP socket. Allocates the connection record and replies
/// with `SYN+ACK`; the final handshake `ACK` completes the open in
/// [`rdp_on_packet`].
async fn accept_incoming_rdp(stack: &Stack, socket: &Arc<Socket>, header: &RdpHeader, id: Identifier) -> Result<()> {
    if !socket.flags.contains(SocketFlags::RDP_REQUIRED) {
        return Err(CspError::NotSup);
    }
    let idout = Identifier {
        priority: id.priority,
        source: id.destination,
        destination: id.source,
        source_port: id.destination_port,
        destination_port: id.source_port,
        flags: id.flags,
    };
    let conn = stack.conns.allocate(id, idout, ConnKind::ConnectionOriented).await?;
    let mut block = RdpControlBlock::new(stack.config.rdp_max_window, stack.config.rdp_retries);
    let synack = block.accept_syn(header);
    *conn.rdp.lock().await = Some(block);
    send_rdp_control(stack, &conn, synack).await
}

/// Forward a non-local packet: re-prepend its (unmodified) identifier
/// header and hand it to the next-hop interface. Transforms are
/// end-to-end between the original endpoints, so a forwarded packet is
/// never re-encrypted or re-authenticated at an intermediate hop.
async fn forward(stack: &Stack, packet: Packet, id: Identifier) -> Result<()> {
    let route = stack.rtable.find(id.destination).ok_or(CspError::Tx)?;
    let iface = stack.interfaces.get_by_index(route.iface_index).ok_or(CspError::Tx)?;
    let header_bytes = id.to_bytes(stack.id_version)?;
    packet.prepend(&header_bytes).await?;
    iface.transmit(route.via, &packet, false).await
}

/// Apply configured tx transforms (CRC32 → HMAC → XTEA), prepend the
/// identifier header, route, and hand off to the outbound interface.
/// The caller's `id` need not already carry the crypto flags — they are
/// set here from `stack.config` before the identifier is packed.
pub async fn transmit_packet(stack: &Stack, packet: Packet, mut id: Identifier) -> Result<()> {
    if stack.config.use_crc32 {
        id.flags.insert(Flags::CRC32);
    }
    if stack.config.use_hmac {
        id.flags.insert(Flags::HMAC);
    }
    if stack.config.use_xtea && stack.xtea_key.lock().await.is_some() {
        id.flags.insert(Flags::XTEA);
    }

    if id.flags.contains(Flags::CRC32) {
        crc32::append(&packet).await?;
    }
    if id.flags.contains(Flags::HMAC) {
        stack.hmac_key.lock().await.append(&packet, stack.id_version, false).await?;
    }
    if id.flags.contains(Flags::XTEA) {
        let key = stack.xtea_key.lock().await;
        if let Some(key) = key.as_ref() {
            let iv = (rand::random::<u32>(), rand::random::<u32>());
            key.encrypt_packet(&packet, iv).await?;
        }
    }

    packet.set_identifier(id).await;
    let header_bytes = id.to_bytes(stack.id_version)?;
    packet.prepend(&header_bytes).await?;

    let route = stack.rtable.find(id.destination).ok_or(CspError::Tx)?;
    let iface = stack.interfaces.get_by_index(route.iface_index).ok_or(CspError::Tx)?;
    iface.transmit(route.via, &packet, true).await
}

/// Build and send a bare RDP control segment (no user payload) on
/// `conn`'s outbound identifier.
pub async fn send_rdp_control(stack: &Stack, conn: &Arc<Connection>, header: RdpHeader) -> Result<()> {
    let packet = stack.buffers.get().await?;
    let mut id = *conn.idout.lock().await;
    id.flags.insert(Flags::RDP);
    let bytes = header.to_bytes()?;
    packet.prepend(&bytes).await?;
    transmit_packet(stack, packet, id).await
}

/// Send a `FIN`/`FIN+ACK` closing segment and record it on `conn`'s RDP
/// retransmission queue the same way [`rdp_send`] does for data, so it
/// gets resent if lost during `CLOSE_WAIT` instead of only ever being
/// sent once.
pub(crate) async fn send_closing_control(stack: &Stack, conn: &Arc<Connection>, header: RdpHeader) -> Result<()> {
    let packet = stack.buffers.get().await?;
    let bytes = header.to_bytes()?;
    packet.prepend(&bytes).await?;
    let retx_copy = stack.buffers.clone_packet(&packet).await?;
    let mut id = *conn.idout.lock().await;
    id.flags.insert(Flags::RDP);
    transmit_packet(stack, packet, id).await?;
    let mut rdp = conn.rdp.lock().await;
    if let Some(block) = rdp.as_mut() {
        block.on_sent(header.seq, retx_copy);
    }
    Ok(())
}

/// Active-open handshake driver for [`crate::socket::connect`]: seeds a
/// fresh control block, sends `SYN`, then waits for the block to reach
/// `OPEN` (woken by `rdp_on_packet` via `conn.rdp_notify`).
pub async fn perform_rdp_handshake(stack: &Stack, conn: &Arc<Connection>, timeout_dur: Option<Duration>) -> Result<()> {
    let syn = {
        let mut rdp = conn.rdp.lock().await;
        let mut block = RdpControlBlock::new(stack.config.rdp_max_window, stack.config.rdp_retries);
        let syn = block.connect();
        *rdp = Some(block);
        syn
    };
    send_rdp_control(stack, conn, syn).await?;

    let wait = async {
        loop {
            conn.rdp_notify.notified().await;
            let rdp = conn.rdp.lock().await;
            match rdp.as_ref().map(|b| b.state) {
                Some(RdpState::Open) => return Ok(()),
                Some(RdpState::Closed) | None => return Err(CspError::Reset),
                _ => {}
            }
        }
    };
    match timeout_dur {
        Some(d) => tokio::time::timeout(d, wait).await.map_err(|_| CspError::TimedOut)?,
        None => wait.await,
    }
}

/// Send `packet` on `conn`: straight to `transmit_packet` for plain
/// connections, or through the RDP window/retransmit path when the
/// connection carries a control block.
pub async fn send_on_connection(stack: &Stack, conn: &Arc<Connection>, packet: Packet, timeout_dur: Option<Duration>) -> Result<()> {
    if conn.rdp.lock().await.is_some() {
        rdp_send(stack, conn, packet, timeout_dur).await
    } else {
        let id = *conn.idout.lock().await;
        transmit_packet(stack, packet, id).await
    }
}

/// RDP data send path: blocks (up to `timeout_dur`) for window room,
/// stamps and transmits the packet, then records a pre-transform copy
/// on the retransmission queue.
async fn rdp_send(stack: &Stack, conn: &Arc<Connection>, packet: Packet, timeout_dur: Option<Duration>) -> Result<()> {
    loop {
        let prepared = {
            let mut rdp = conn.rdp.lock().await;
            let block = rdp.as_mut().ok_or(CspError::Reset)?;
            if !block.is_active() {
                return Err(CspError::Reset);
            }
            block.window_has_room().then(|| block.prepare_send())
        };

        if let Some(header) = prepared {
            let seq = header.seq;
            let bytes = header.to_bytes()?;
            packet.prepend(&bytes).await?;

            let retx_copy = stack.buffers.clone_packet(&packet).await?;
            let id = *conn.idout.lock().await;
            transmit_packet(stack, packet, id).await?;

            let mut rdp = conn.rdp.lock().await;
            if let Some(block) = rdp.as_mut() {
                block.on_sent(seq, retx_copy);
            }
            return Ok(());
        }

        match timeout_dur {
            Some(d) => tokio::time::timeout(d, conn.rdp_notify.notified()).await.map_err(|_| CspError::TimedOut)?,
            None => conn.rdp_notify.notified().await,
        }
    }
}

/// Interface ingress, task context: strip the identifier header, learn
/// the packet's priority, and post it to the QoS input FIFO.
pub async fn receive(stack: &Stack, iface: Arc<Interface>, packet: Packet) -> Result<()> {
    let priority = strip_header(stack, &packet).await?;
    iface.record_rx(packet.payload_len().await as u64);
    stack.fifo.enqueue(priority, packet, iface).await
}

/// Interface ingress, ISR context: the non-blocking twin of [`receive`].
pub fn receive_isr(stack: &Stack, iface: Arc<Interface>, packet: Packet) -> Result<()> {
    let priority = strip_header_isr(stack, &packet)?;
    stack.fifo.enqueue_isr(priority, packet, iface)
}

async fn strip_header(stack: &Stack, packet: &Packet) -> Result<Priority> {
    let header_size = stack.id_version.header_size();
    let id = {
        let mut frame = packet.frame().await;
        if frame.len() < header_size {
            return Err(CspError::Inval);
        }
        let id = Identifier::from_bytes(&frame[..header_size], stack.id_version)?;
        let len = frame.len();
        frame.copy_within(header_size..len, 0);
        frame.truncate(len - header_size);
        id
    };
    packet.set_identifier(id).await;
    Ok(id.priority)
}

fn strip_header_isr(stack: &Stack, packet: &Packet) -> Result<Priority> {
    let header_size = stack.id_version.header_size();
    let bytes = packet.try_peek_prefix(header_size)?;
    let id = Identifier::from_bytes(&bytes, stack.id_version)?;
    packet.try_strip_prefix(header_size)?;
    packet.try_set_identifier(id)?;
    Ok(id.priority)
}

/// Timer tick, invoked by [`run`] whenever the FIFO dequeue times out:
/// walks every open connection's RDP control block, resending whatever
/// is due and tearing down connections that exhausted their retries.
pub async fn tick_rdp_timers(stack: &Stack) {
    for conn in stack.conns.slots() {
        if conn.state().await != ConnState::Open {
            continue;
        }
        let outcome = {
            let mut rdp = conn.rdp.lock().await;
            match rdp.as_mut() {
                Some(block) => block.check_timeouts(),
                None => continue,
            }
        };
        match outcome {
            TimeoutOutcome::Nothing => {}
            TimeoutOutcome::Retransmit(packets) => {
                let id = *conn.idout.lock().await;
                for p in packets {
                    match stack.buffers.clone_packet(&p).await {
                        Ok(copy) => {
                            if let Err(e) = transmit_packet(stack, copy, id).await {
                                tracing::warn!(error = ?e, "rdp retransmit failed");
                            }
                        }
                        Err(e) => tracing::warn!(error = ?e, "rdp retransmit buffer exhausted"),
                    }
                }
            }
            TimeoutOutcome::RetransmitControl(header) => {
                if let Err(e) = send_rdp_control(stack, conn, header).await {
                    tracing::warn!(error = ?e, "rdp handshake retransmit failed");
                }
            }
            TimeoutOutcome::ConnectionDead => {
                conn.mark_timed_out();
                stack.conns.close(conn, ClosedBy::Unset).await;
            }
            TimeoutOutcome::CloseWaitExpired => {
                stack.conns.close(conn, ClosedBy::Unset).await;
            }
        }
    }
}

/// A driver whose `tx` feeds transmitted frames straight back into the
/// router's receive path, for local-address delivery without a real
/// link (spec.md §8 scenario 1). Grounded on the original's CAN/ZMQHUB
/// drivers looping their own traffic back when `via == address`.
struct LoopbackDriver {
    tx: mpsc::Sender<Packet>,
}

impl InterfaceDriver for LoopbackDriver {
    fn tx(&self, _via: Option<u16>, packet: &Packet, _from_me: bool) -> Result<()> {
        self.tx.try_send(packet.share()).map_err(|_| CspError::NoBufs)
    }
}

/// Register the loopback interface and route the node's own address
/// through it, then spawn the task that drains transmitted frames back
/// into [`receive`].
pub fn install_loopback(stack: &Arc<Stack>) -> Arc<Interface> {
    let (tx, mut rx) = mpsc::channel(stack.config.fifo_input.max(1));
    let driver = LoopbackDriver { tx };
    let iface = stack
        .interfaces
        .register(Interface::new("lo", stack.local_address, stack.id_version.host_bits(), Box::new(driver)).expect("loopback name fits"));

    let index = stack.interfaces.index_of(&iface).expect("just registered");
    let _ = stack.rtable.set(stack.local_address, stack.id_version.host_bits(), index, None);

    let task_stack = stack.clone();
    let task_iface = iface.clone();
    tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            if let Err(e) = receive(&task_stack, task_iface.clone(), packet).await {
                tracing::warn!(error = ?e, "loopback receive failed");
            }
        }
    });

    iface
}
