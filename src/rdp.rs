//! Reliable Datagram Protocol (spec.md §4.J) — a sliding-window reliable
//! transport state machine.
//!
//! The original's `csp_rdp.c` body isn't present in the retrieval pack
//! (only `csp_rdp.h`'s function surface is), so this module is built
//! directly from spec.md's detailed state-machine description. The
//! retransmission timer's jitter/backoff style is grounded on the
//! teacher's `generate_irt`/`generate_rt`/`one_plus_rand` formulas in
//! `client.rs`, which solve the same "retransmission timer with jitter"
//! problem PCP's own reliability layer needed.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::buffer::Packet;
use crate::codec::{Deserialize, Deserializer, Serialize, Serializer};
use crate::error::{CspError, Result};

/// RDP header control bits, appended as a trailer when the packet's
/// identifier carries the `RDP` flag (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RdpFlags(pub u8);

impl RdpFlags {
    pub const SYN: RdpFlags = RdpFlags(0x01);
    pub const ACK: RdpFlags = RdpFlags(0x02);
    pub const EACK: RdpFlags = RdpFlags(0x04);
    pub const RST: RdpFlags = RdpFlags(0x08);
    pub const FIN: RdpFlags = RdpFlags(0x10);

    pub const fn contains(self, other: RdpFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RdpFlags {
    type Output = RdpFlags;
    fn bitor(self, rhs: RdpFlags) -> RdpFlags {
        RdpFlags(self.0 | rhs.0)
    }
}

/// `{seq, ack, flags, window}` plus an optional extended-ack bitmap of
/// recently received out-of-order sequence numbers (spec.md §4.J/§6).
/// Per `DESIGN.md`'s Open Question resolution, the EACK list is simply
/// empty on the common path and only populated when there is a gap to
/// report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdpHeader {
    pub seq: u16,
    pub ack: u16,
    pub flags: RdpFlags,
    pub window: u8,
    pub eack: heapless::Vec<u16, 16>,
}

/// On-wire size of the fixed part of the header: `seq, ack, flags,
/// window`, plus the explicit EACK entry count that lets a receiver
/// find the end of the header without needing it to be the last thing
/// in the buffer (the header is prepended ahead of any user payload,
/// see `router.rs`'s framing note and `DESIGN.md`'s Open Question
/// resolution on RDP/SFP framing).
const FIXED_HEADER_LEN: usize = 7;

impl RdpHeader {
    pub fn to_bytes(&self) -> Result<heapless::Vec<u8, { FIXED_HEADER_LEN + 16 * 2 }>> {
        let flags = if self.eack.is_empty() { self.flags } else { self.flags | RdpFlags::EACK };
        let mut vec = heapless::Vec::new();
        let mut s = Serializer::new(&mut vec);
        s = s.serialize(self.seq)?;
        s = s.serialize(self.ack)?;
        s = s.serialize(flags.0)?;
        s = s.serialize(self.window)?;
        s = s.serialize(self.eack.len() as u8)?;
        for seq in &self.eack {
            s = s.serialize(*seq)?;
        }
        drop(s);
        Ok(vec)
    }

    /// Decodes the header from the front of `data`, returning it along
    /// with whatever bytes follow (the user payload, if any).
    pub fn from_bytes(data: &[u8]) -> Result<(Self, &[u8])> {
        let mut d = Deserializer::new(data);
        let seq: u16 = d.deserialize()?;
        let ack: u16 = d.deserialize()?;
        let flags_byte: u8 = d.deserialize()?;
        let window: u8 = d.deserialize()?;
        let flags = RdpFlags(flags_byte);
        let count: u8 = d.deserialize()?;
        let mut eack = heapless::Vec::new();
        for _ in 0..count {
            let s: u16 = d.deserialize()?;
            eack.push(s).map_err(|_| CspError::Inval)?;
        }
        Ok((Self { seq, ack, flags, window, eack }, d.rest()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdpState {
    Closed,
    Listen,
    SynSent,
    SynRcvd,
    Open,
    CloseWait,
}

struct RetxEntry {
    seq: u16,
    packet: Packet,
    deadline: Instant,
    retries_left: u32,
}

/// Per-connection RDP control block (spec.md §3).
pub struct RdpControlBlock {
    pub state: RdpState,
    pub snd_nxt: u16,
    pub snd_una: u16,
    pub rcv_nxt: u16,
    pub peer_window: u8,
    retx_queue: Vec<RetxEntry>,
    out_of_order: BTreeMap<u16, Packet>,
    pub window: u8,
    pub retries: u32,
    packet_timeout: Duration,
    conn_timeout_deadline: Option<Instant>,
    delayed_ack_deadline: Option<Instant>,
    /// The most recently sent handshake segment (`SYN` or `SYN+ACK`),
    /// kept so [`Self::check_timeouts`] can resend it on a handshake
    /// timeout; cleared once the handshake completes so a later
    /// `CLOSE_WAIT` timeout doesn't mistake it for a live retransmit.
    last_handshake: Option<RdpHeader>,
    handshake_retries_left: u32,
    /// `true` while in `SYN_RCVD` awaiting the final handshake `ACK`.
    /// Unlike `SYN_SENT`, spec.md's `SYN_RCVD` timeout has no retry: it
    /// goes straight to `CLOSED` on `conn_timeout_deadline` expiry, so
    /// this flag makes `check_timeouts` skip `handshake_retries_left`
    /// entirely for this state instead of reusing `SYN_SENT`'s counter.
    awaiting_final_ack: bool,
}

/// Initial/max retransmission timing, in the same spirit as the
/// teacher's IRT/MRT/MRC constants for PCP's request retry backoff.
const INITIAL_PACKET_TIMEOUT: Duration = Duration::from_millis(3000);
const CONN_TIMEOUT: Duration = Duration::from_secs(60);
const DELAYED_ACK: Duration = Duration::from_millis(100);

/// Apply a +/-25% jitter, matching the teacher's `one_plus_rand` shape
/// (`IRT * (1 + rand)`) used for PCP's initial retransmission time.
fn jitter(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_secs_f64(base.as_secs_f64() * factor)
}

impl RdpControlBlock {
    pub fn new(window: usize, retries: u32) -> Self {
        Self {
            state: RdpState::Closed,
            snd_nxt: 0,
            snd_una: 0,
            rcv_nxt: 0,
            peer_window: window as u8,
            retx_queue: Vec::new(),
            out_of_order: BTreeMap::new(),
            window: window as u8,
            retries,
            packet_timeout: INITIAL_PACKET_TIMEOUT,
            conn_timeout_deadline: None,
            delayed_ack_deadline: None,
            last_handshake: None,
            handshake_retries_left: retries,
            awaiting_final_ack: false,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, RdpState::Closed)
    }

    /// `connect()`'s handshake initiation: seed an initial sequence
    /// number and move to `SYN_SENT`.
    pub fn connect(&mut self) -> RdpHeader {
        self.snd_nxt = rand::thread_rng().gen_range(0..=u16::MAX);
        self.snd_una = self.snd_nxt;
        self.state = RdpState::SynSent;
        self.conn_timeout_deadline = Some(Instant::now() + jitter(self.packet_timeout));
        let header = RdpHeader {
            seq: self.snd_nxt,
            ack: 0,
            flags: RdpFlags::SYN,
            window: self.window,
            eack: heapless::Vec::new(),
        };
        self.snd_nxt = self.snd_nxt.wrapping_add(1);
        self.handshake_retries_left = self.retries;
        self.last_handshake = Some(header.clone());
        self.awaiting_final_ack = false;
        header
    }

    /// Server side: a `SYN` arrived on a listening socket. Moves to
    /// `SYN_RCVD` and returns the `SYN+ACK` to send back. Per spec.md,
    /// this state's timeout has no retry (unlike `SYN_SENT`'s), so
    /// `last_handshake`/`handshake_retries_left` are left untouched and
    /// `awaiting_final_ack` tells `check_timeouts` to close outright.
    pub fn accept_syn(&mut self, syn: &RdpHeader) -> RdpHeader {
        self.rcv_nxt = syn.seq.wrapping_add(1);
        self.peer_window = syn.window;
        self.snd_nxt = rand::thread_rng().gen_range(0..=u16::MAX);
        self.snd_una = self.snd_nxt;
        self.state = RdpState::SynRcvd;
        self.conn_timeout_deadline = Some(Instant::now() + jitter(self.packet_timeout));
        self.awaiting_final_ack = true;
        let header = RdpHeader {
            seq: self.snd_nxt,
            ack: self.rcv_nxt,
            flags: RdpFlags::SYN | RdpFlags::ACK,
            window: self.window,
            eack: heapless::Vec::new(),
        };
        self.snd_nxt = self.snd_nxt.wrapping_add(1);
        header
    }

    /// Client side: `SYN+ACK` arrived while `SYN_SENT`. Moves to `OPEN`
    /// and returns the final handshake `ACK`.
    pub fn complete_handshake(&mut self, synack: &RdpHeader) -> RdpHeader {
        self.rcv_nxt = synack.seq.wrapping_add(1);
        self.peer_window = synack.window;
        self.snd_una = synack.ack;
        self.state = RdpState::Open;
        self.conn_timeout_deadline = None;
        self.last_handshake = None;
        self.awaiting_final_ack = false;
        RdpHeader { seq: self.snd_nxt, ack: self.rcv_nxt, flags: RdpFlags::ACK, window: self.window, eack: heapless::Vec::new() }
    }

    /// Server side: final handshake `ACK` arrived while `SYN_RCVD`.
    pub fn confirm_open(&mut self, ack: &RdpHeader) -> Result<()> {
        if ack.ack != self.snd_nxt {
            return Err(CspError::Reset);
        }
        self.snd_una = ack.ack;
        self.state = RdpState::Open;
        self.conn_timeout_deadline = None;
        self.last_handshake = None;
        self.awaiting_final_ack = false;
        Ok(())
    }

    /// Stamp and queue a user payload packet for transmission, returning
    /// the header to attach. Caller is responsible for actually sending
    /// the packet and must pass a clone into [`Self::retransmission
    /// queue`] via [`Self::on_sent`].
    pub fn prepare_send(&mut self) -> RdpHeader {
        let header = RdpHeader {
            seq: self.snd_nxt,
            ack: self.rcv_nxt,
            flags: RdpFlags::ACK,
            window: self.window,
            eack: self.eack_bitmap(),
        };
        self.snd_nxt = self.snd_nxt.wrapping_add(1);
        header
    }

    /// `true` if the outstanding unacknowledged window has room for one
    /// more in-flight packet (spec.md §4.J's send-path window check).
    pub fn window_has_room(&self) -> bool {
        let in_flight = self.snd_nxt.wrapping_sub(self.snd_una);
        (in_flight as usize) <= self.peer_window as usize
    }

    /// Record a just-sent data packet on the retransmission queue with
    /// deadline `now + packet_timeout`.
    pub fn on_sent(&mut self, seq: u16, packet: Packet) {
        self.retx_queue.push(RetxEntry {
            seq,
            packet,
            deadline: Instant::now() + self.packet_timeout,
            retries_left: self.retries,
        });
    }

    /// An immediate ack-only header reflecting current receive state,
    /// sent in reply to a received packet without consuming a send
    /// sequence number (spec.md §4.J's "send immediate ACK").
    pub fn ack_header(&self) -> RdpHeader {
        RdpHeader { seq: self.snd_nxt, ack: self.rcv_nxt, flags: RdpFlags::ACK, window: self.window, eack: self.eack_bitmap() }
    }

    fn eack_bitmap(&self) -> heapless::Vec<u16, 16> {
        let mut v = heapless::Vec::new();
        for &seq in self.out_of_order.keys().take(16) {
            let _ = v.push(seq);
        }
        v
    }

    /// Receive-path outcome for a data packet.
    pub fn on_data(&mut self, header: &RdpHeader, packet: Packet) -> ReceiveOutcome {
        self.process_ack(header);
        self.delayed_ack_deadline = Some(Instant::now() + DELAYED_ACK);

        if seq_lt(header.seq, self.rcv_nxt) {
            return ReceiveOutcome::DuplicateAckOnly;
        }
        if header.seq == self.rcv_nxt {
            self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            let mut deliver = vec![packet];
            while let Some(next) = self.out_of_order.remove(&self.rcv_nxt) {
                deliver.push(next);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            }
            ReceiveOutcome::Deliver(deliver)
        } else if self.within_window(header.seq) {
            self.out_of_order.insert(header.seq, packet);
            ReceiveOutcome::Queued
        } else {
            ReceiveOutcome::OutOfWindowDrop
        }
    }

    fn within_window(&self, seq: u16) -> bool {
        let distance = seq.wrapping_sub(self.rcv_nxt);
        (distance as usize) < self.window as usize
    }

    /// Cumulative (and, if present, extended) ack processing: releases
    /// every retx entry with `seq <= ack`, plus any explicitly listed in
    /// `header.eack`. Resets the delayed-ack timer.
    pub fn process_ack(&mut self, header: &RdpHeader) {
        self.peer_window = header.window;
        let ack = header.ack;
        self.retx_queue.retain(|e| seq_gt(e.seq, ack) && !header.eack.contains(&e.seq));
        if seq_gt(ack.wrapping_add(1), self.snd_una) {
            self.snd_una = ack.wrapping_add(1);
        }
        self.delayed_ack_deadline = Some(Instant::now() + DELAYED_ACK);
    }

    /// Timer tick (invoked by the router on FIFO-dequeue timeout):
    /// returns packets due for retransmission, decrementing their retry
    /// counters; if any entry's counter reaches zero the connection is
    /// torn down and [`TimeoutOutcome::ConnectionDead`] is returned.
    ///
    /// Three distinct timeout paths share `conn_timeout_deadline`:
    /// `SYN_SENT` retries the `SYN` up to `retries` times before giving
    /// up; `SYN_RCVD` (`awaiting_final_ack`) has no retry and closes
    /// outright on expiry; `CLOSE_WAIT`'s linger deadline likewise closes
    /// outright on expiry (the `FIN` itself is retried, if lost, off the
    /// ordinary `retx_queue` below rather than this deadline). The caller
    /// is responsible for actually removing the connection from the
    /// table when `ConnectionDead` or `CloseWaitExpired` comes back; this
    /// only flips the control block's own state.
    pub fn check_timeouts(&mut self) -> TimeoutOutcome {
        let now = Instant::now();

        if let Some(deadline) = self.conn_timeout_deadline {
            if now >= deadline {
                if self.state == RdpState::CloseWait {
                    self.state = RdpState::Closed;
                    return TimeoutOutcome::CloseWaitExpired;
                }
                if self.awaiting_final_ack {
                    self.state = RdpState::Closed;
                    return TimeoutOutcome::ConnectionDead;
                }
                if self.handshake_retries_left == 0 {
                    self.state = RdpState::Closed;
                    return TimeoutOutcome::ConnectionDead;
                }
                self.handshake_retries_left -= 1;
                self.conn_timeout_deadline = Some(now + jitter(self.packet_timeout));
                if let Some(header) = self.last_handshake.clone() {
                    return TimeoutOutcome::RetransmitControl(header);
                }
                self.state = RdpState::Closed;
                return TimeoutOutcome::ConnectionDead;
            }
        }

        let mut due = Vec::new();
        for entry in &mut self.retx_queue {
            if now >= entry.deadline {
                if entry.retries_left == 0 {
                    self.state = RdpState::Closed;
                    return TimeoutOutcome::ConnectionDead;
                }
                entry.retries_left -= 1;
                entry.deadline = now + self.packet_timeout;
                due.push(entry.packet.share());
            }
        }
        if due.is_empty() {
            TimeoutOutcome::Nothing
        } else {
            TimeoutOutcome::Retransmit(due)
        }
    }

    /// `close()`: send `FIN`, enter `CLOSE_WAIT` for `conn_timeout`. The
    /// caller still owns the connection table slot: it stays in place
    /// until [`Self::check_timeouts`] reports `ConnectionDead` for this
    /// deadline, so the caller should queue the sent `FIN` on
    /// [`Self::on_sent`] the same way a data segment is, letting the
    /// ordinary retransmission path resend it if it's lost.
    pub fn begin_close(&mut self) -> RdpHeader {
        let header = RdpHeader { seq: self.snd_nxt, ack: self.rcv_nxt, flags: RdpFlags::FIN, window: self.window, eack: heapless::Vec::new() };
        self.snd_nxt = self.snd_nxt.wrapping_add(1);
        self.state = RdpState::CloseWait;
        self.conn_timeout_deadline = Some(Instant::now() + CONN_TIMEOUT);
        header
    }

    /// Peer's `FIN`/`RST` arrived: acknowledge and enter `CLOSE_WAIT`.
    /// Same deferred-close and retransmit-queueing contract as
    /// [`Self::begin_close`].
    pub fn on_peer_close(&mut self) -> RdpHeader {
        let header = RdpHeader { seq: self.snd_nxt, ack: self.rcv_nxt, flags: RdpFlags::FIN | RdpFlags::ACK, window: self.window, eack: heapless::Vec::new() };
        self.snd_nxt = self.snd_nxt.wrapping_add(1);
        self.state = RdpState::CloseWait;
        self.conn_timeout_deadline = Some(Instant::now() + CONN_TIMEOUT);
        header
    }
}

/// Sequence-number comparison helpers using wrap-aware distance (16-bit
/// sequence space), matching spec.md's `seq < rcv_nxt` duplicate test
/// under wraparound.
fn seq_lt(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}

fn seq_gt(a: u16, b: u16) -> bool {
    seq_lt(b, a)
}

pub enum ReceiveOutcome {
    /// `seq < rcv_nxt`: already delivered, just echo the ack.
    DuplicateAckOnly,
    /// `seq == rcv_nxt` (plus any now-contiguous out-of-order packets),
    /// in send order.
    Deliver(Vec<Packet>),
    /// Within window but out of order: buffered, EACK scheduled.
    Queued,
    /// Outside the receive window: dropped.
    OutOfWindowDrop,
}

pub enum TimeoutOutcome {
    Nothing,
    Retransmit(Vec<Packet>),
    /// A handshake segment (`SYN`/`SYN+ACK`) timed out and must be resent
    /// verbatim; distinct from [`Self::Retransmit`] since a handshake
    /// segment has no packet buffer of its own to re-share.
    RetransmitControl(RdpHeader),
    /// Retransmission retries were exhausted, or a handshake timed out
    /// with no retries left: the connection did not close gracefully.
    ConnectionDead,
    /// `CLOSE_WAIT`'s linger deadline elapsed. Distinct from
    /// [`Self::ConnectionDead`] since this is the ordinary, expected end
    /// of a graceful close rather than a lost connection — callers
    /// shouldn't mark it timed out.
    CloseWaitExpired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_reaches_open_on_both_sides() {
        let mut client = RdpControlBlock::new(4, 3);
        let mut server = RdpControlBlock::new(4, 3);

        let syn = client.connect();
        assert_eq!(client.state, RdpState::SynSent);

        let synack = server.accept_syn(&syn);
        assert_eq!(server.state, RdpState::SynRcvd);

        let ack = client.complete_handshake(&synack);
        assert_eq!(client.state, RdpState::Open);

        server.confirm_open(&ack).unwrap();
        assert_eq!(server.state, RdpState::Open);
    }

    #[test]
    fn out_of_order_packets_drain_in_sequence() {
        let mut rcv = RdpControlBlock::new(8, 3);
        rcv.rcv_nxt = 0;

        let hdr_for = |seq: u16| RdpHeader { seq, ack: 0, flags: RdpFlags::ACK, window: 8, eack: heapless::Vec::new() };

        // B (seq=1) arrives before A (seq=0): queued, not delivered yet.
        match rcv.on_data(&hdr_for(1), fake_packet()) {
            ReceiveOutcome::Queued => {}
            _ => panic!("expected Queued"),
        }
        // A (seq=0) arrives: delivers A, then drains B.
        match rcv.on_data(&hdr_for(0), fake_packet()) {
            ReceiveOutcome::Deliver(v) => assert_eq!(v.len(), 2),
            _ => panic!("expected Deliver"),
        }
        assert_eq!(rcv.rcv_nxt, 2);
    }

    #[test]
    fn ack_releases_retx_entries_up_to_and_including_ack() {
        let mut tx = RdpControlBlock::new(8, 3);
        tx.snd_una = 0;
        tx.on_sent(0, fake_packet());
        tx.on_sent(1, fake_packet());
        tx.on_sent(2, fake_packet());

        let hdr = RdpHeader { seq: 0, ack: 1, flags: RdpFlags::ACK, window: 8, eack: heapless::Vec::new() };
        tx.process_ack(&hdr);
        assert_eq!(tx.retx_queue.len(), 1);
        assert_eq!(tx.retx_queue[0].seq, 2);
    }

    #[test]
    fn syn_rcvd_timeout_closes_without_retry() {
        // spec.md: "SYN_RCVD -> receive ACK matching: -> OPEN. Timeout ->
        // CLOSED", unlike SYN_SENT's retry-then-TIMEDOUT.
        let mut client = RdpControlBlock::new(4, 3);
        let mut server = RdpControlBlock::new(4, 3);
        server.accept_syn(&client.connect());
        assert_eq!(server.state, RdpState::SynRcvd);

        server.conn_timeout_deadline = Some(Instant::now() - Duration::from_millis(1));
        match server.check_timeouts() {
            TimeoutOutcome::ConnectionDead => {}
            _ => panic!("expected ConnectionDead"),
        }
        assert_eq!(server.state, RdpState::Closed);
    }

    #[test]
    fn syn_sent_timeout_retries_before_closing() {
        let mut client = RdpControlBlock::new(4, 1);
        client.connect();
        assert_eq!(client.state, RdpState::SynSent);

        client.conn_timeout_deadline = Some(Instant::now() - Duration::from_millis(1));
        match client.check_timeouts() {
            TimeoutOutcome::RetransmitControl(_) => {}
            _ => panic!("expected a retry before giving up"),
        }
        assert_eq!(client.state, RdpState::SynSent);

        client.conn_timeout_deadline = Some(Instant::now() - Duration::from_millis(1));
        match client.check_timeouts() {
            TimeoutOutcome::ConnectionDead => {}
            _ => panic!("expected ConnectionDead after retries are exhausted"),
        }
        assert_eq!(client.state, RdpState::Closed);
    }

    #[test]
    fn close_wait_lingers_then_expires_without_retry() {
        let mut client = RdpControlBlock::new(4, 1);
        client.connect();
        client.complete_handshake(&RdpHeader { seq: 10, ack: 0, flags: RdpFlags::SYN | RdpFlags::ACK, window: 4, eack: heapless::Vec::new() });
        assert_eq!(client.state, RdpState::Open);

        client.begin_close();
        assert_eq!(client.state, RdpState::CloseWait);

        // Still within the linger window: nothing to report yet.
        match client.check_timeouts() {
            TimeoutOutcome::Nothing => {}
            _ => panic!("expected no timeout before the linger deadline"),
        }
        assert_eq!(client.state, RdpState::CloseWait);

        client.conn_timeout_deadline = Some(Instant::now() - Duration::from_millis(1));
        match client.check_timeouts() {
            TimeoutOutcome::CloseWaitExpired => {}
            _ => panic!("expected CloseWaitExpired, not a retry"),
        }
        assert_eq!(client.state, RdpState::Closed);
    }

    #[test]
    fn close_wait_retransmits_fin_from_retx_queue() {
        let mut client = RdpControlBlock::new(4, 2);
        client.connect();
        client.complete_handshake(&RdpHeader { seq: 10, ack: 0, flags: RdpFlags::SYN | RdpFlags::ACK, window: 4, eack: heapless::Vec::new() });
        let fin = client.begin_close();
        client.on_sent(fin.seq, fake_packet());

        match client.check_timeouts() {
            TimeoutOutcome::Nothing => {}
            _ => panic!("fin shouldn't be due for retransmission yet"),
        }

        client.retx_queue[0].deadline = Instant::now() - Duration::from_millis(1);
        match client.check_timeouts() {
            TimeoutOutcome::Retransmit(packets) => assert_eq!(packets.len(), 1),
            _ => panic!("expected the fin to be retransmitted"),
        }
        assert_eq!(client.state, RdpState::CloseWait);
    }

    fn fake_packet() -> Packet {
        // constructed lazily in an async-free test via a tiny runtime
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let pool = crate::buffer::BufferPool::new(1);
            pool.get().await.unwrap()
        })
    }
}
