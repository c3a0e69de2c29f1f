//! Connection table (spec.md §4.H): a fixed pool of connection records
//! plus the port-to-socket binding map.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};

use crate::buffer::Packet;
use crate::error::{CspError, Result};
use crate::id::{Identifier, Priority};
use crate::rdp::RdpControlBlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Closed,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnKind {
    ConnectionLess,
    ConnectionOriented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedBy {
    Unset,
    Local,
    Remote,
}

/// A single connection record. Slots are reused across `allocate`/`close`
/// cycles; identity across reuse is distinguished by a generation count
/// (`Connection::generation`) so stale handles from a prior lifetime of
/// the slot are detectable by callers holding on to one too long.
pub struct Connection {
    pub idin: Mutex<Identifier>,
    pub idout: Mutex<Identifier>,
    state: Mutex<ConnState>,
    kind: Mutex<ConnKind>,
    closed_by: Mutex<ClosedBy>,
    generation: AtomicUsize,
    queues: [(mpsc::Sender<Packet>, Mutex<mpsc::Receiver<Packet>>); Priority::COUNT],
    pub rdp: Mutex<Option<RdpControlBlock>>,
    slot: usize,
    closed_notify: Notify,
    /// Signalled whenever the RDP control block's state changes, so
    /// [`crate::socket::connect`]'s handshake wait (and anything else
    /// blocking on RDP state) doesn't have to poll.
    pub rdp_notify: Notify,
    timed_out: std::sync::atomic::AtomicBool,
}

impl Connection {
    fn new(slot: usize, queue_length: usize) -> Self {
        let queues = std::array::from_fn(|_| {
            let (tx, rx) = mpsc::channel(queue_length.max(1));
            (tx, Mutex::new(rx))
        });
        let blank = Identifier {
            priority: Priority::Normal,
            source: 0,
            destination: 0,
            source_port: 0,
            destination_port: 0,
            flags: crate::id::Flags::NONE,
        };
        Self {
            idin: Mutex::new(blank),
            idout: Mutex::new(blank),
            state: Mutex::new(ConnState::Closed),
            kind: Mutex::new(ConnKind::ConnectionLess),
            closed_by: Mutex::new(ClosedBy::Unset),
            generation: AtomicUsize::new(0),
            queues,
            rdp: Mutex::new(None),
            slot,
            closed_notify: Notify::new(),
            rdp_notify: Notify::new(),
            timed_out: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub async fn kind(&self) -> ConnKind {
        *self.kind.lock().await
    }

    /// Marks this connection as having died from RDP retransmission
    /// exhaustion rather than an explicit peer close, so a pending
    /// `read()` surfaces `TIMEDOUT` rather than `RESET` (spec.md §7(c)).
    pub fn mark_timed_out(&self) {
        self.timed_out.store(true, Ordering::Release);
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn generation(&self) -> usize {
        self.generation.load(Ordering::Acquire)
    }

    pub async fn state(&self) -> ConnState {
        *self.state.lock().await
    }

    pub async fn closed_by(&self) -> ClosedBy {
        *self.closed_by.lock().await
    }

    /// Deliver `packet` into the receive queue for `priority`. Used by
    /// the router for non-RDP connection-oriented delivery.
    pub async fn deliver(&self, priority: Priority, packet: Packet) -> Result<()> {
        self.queues[priority.as_index()]
            .0
            .send(packet)
            .await
            .map_err(|_| CspError::NoBufs)
    }

    /// Priority-ordered dequeue (spec.md §4.I's `read`): drains whatever
    /// is already queued highest-priority-first; if all lanes are empty,
    /// suspends until either a packet arrives or the connection closes.
    /// Callers wrap this in a timeout for the `TIMEDOUT` contract.
    pub async fn read(&self) -> Option<Packet> {
        loop {
            let mut g0 = self.queues[0].1.lock().await;
            let mut g1 = self.queues[1].1.lock().await;
            let mut g2 = self.queues[2].1.lock().await;
            let mut g3 = self.queues[3].1.lock().await;
            for g in [&mut g0, &mut g1, &mut g2, &mut g3] {
                if let Ok(p) = g.try_recv() {
                    return Some(p);
                }
            }
            if self.state().await == ConnState::Closed {
                return None;
            }
            tokio::select! {
                biased;
                v = g0.recv() => if let Some(p) = v { return Some(p); },
                v = g1.recv() => if let Some(p) = v { return Some(p); },
                v = g2.recv() => if let Some(p) = v { return Some(p); },
                v = g3.recv() => if let Some(p) = v { return Some(p); },
                _ = self.closed_notify.notified() => {},
            }
        }
    }
}

/// Fixed-size pool of [`Connection`] slots plus the bound-port map.
pub struct ConnTable {
    slots: Vec<Arc<Connection>>,
    queue_length: usize,
    ports: Mutex<std::collections::HashMap<u8, usize>>,
    any_port: Mutex<Option<usize>>,
    max_bind_port: u16,
}

impl ConnTable {
    pub fn new(conn_max: usize, queue_length: usize, max_bind_port: u16) -> Self {
        let slots = (0..conn_max).map(|i| Arc::new(Connection::new(i, queue_length))).collect();
        Self {
            slots,
            queue_length,
            ports: Mutex::new(std::collections::HashMap::new()),
            any_port: Mutex::new(None),
            max_bind_port,
        }
    }

    /// First-fit allocation over `CLOSED` slots (spec.md §4.H).
    pub async fn allocate(&self, idin: Identifier, idout: Identifier, kind: ConnKind) -> Result<Arc<Connection>> {
        for conn in &self.slots {
            let mut state = conn.state.lock().await;
            if *state == ConnState::Closed {
                *state = ConnState::Open;
                drop(state);
                *conn.idin.lock().await = idin;
                *conn.idout.lock().await = idout;
                *conn.kind.lock().await = kind;
                *conn.closed_by.lock().await = ClosedBy::Unset;
                *conn.rdp.lock().await = None;
                conn.timed_out.store(false, Ordering::Release);
                conn.generation.fetch_add(1, Ordering::AcqRel);
                return Ok(conn.clone());
            }
        }
        Err(CspError::NoBufs)
    }

    /// Exact 4-tuple match over `OPEN` slots.
    pub async fn lookup(&self, src: u16, sport: u8, dst: u16, dport: u8) -> Option<Arc<Connection>> {
        for conn in &self.slots {
            if conn.state().await != ConnState::Open {
                continue;
            }
            let idin = *conn.idin.lock().await;
            if idin.source == src && idin.source_port == sport && idin.destination == dst && idin.destination_port == dport {
                return Some(conn.clone());
            }
        }
        None
    }

    /// Drain receive queues, mark `CLOSED`, and record who closed it.
    /// Safe to call from either peer or twice (idempotent past the
    /// first call).
    pub async fn close(&self, conn: &Connection, by: ClosedBy) {
        let mut state = conn.state.lock().await;
        if *state == ConnState::Closed {
            return;
        }
        *state = ConnState::Closed;
        *conn.closed_by.lock().await = by;
        for (_, rx) in &conn.queues {
            let mut rx = rx.lock().await;
            while rx.try_recv().is_ok() {}
        }
        conn.closed_notify.notify_waiters();
    }

    pub fn queue_length(&self) -> usize {
        self.queue_length
    }

    /// Bind `port` (or register the wildcard fallback when `port` is
    /// `None`) to a listening slot index.
    pub async fn bind(&self, port: Option<u8>, slot: usize) -> Result<()> {
        match port {
            None => {
                *self.any_port.lock().await = Some(slot);
                Ok(())
            }
            Some(p) => {
                if p as u16 > self.max_bind_port {
                    return Err(CspError::Inval);
                }
                let mut ports = self.ports.lock().await;
                if ports.contains_key(&p) {
                    return Err(CspError::Used);
                }
                ports.insert(p, slot);
                Ok(())
            }
        }
    }

    /// Resolve a destination port to a listening slot, falling back to
    /// the wildcard (`ANY`) binding when there is no exact match.
    pub async fn resolve_port(&self, port: u8) -> Option<usize> {
        if let Some(slot) = self.ports.lock().await.get(&port).copied() {
            return Some(slot);
        }
        *self.any_port.lock().await
    }

    pub fn slots(&self) -> &[Arc<Connection>] {
        &self.slots
    }
}
