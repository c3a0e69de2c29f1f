//! The process-wide context object (spec.md §9: "Global state ...
//! Encapsulate as a single process-wide `Stack` value created at init").
//!
//! Grounded on the teacher's explicit `Client::open`/`Handle::new`
//! construction style — no `lazy_static!`/global singleton, everything
//! is built once and threaded through explicitly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};

use crate::buffer::{BufferPool, Packet};
use crate::clock::Capabilities;
use crate::conn::ConnTable;
use crate::config::Config;
use crate::crypto::{HmacKey, XteaKey};
use crate::dedup::Dedup;
use crate::error::{CspError, Result};
use crate::fifo::QosFifo;
use crate::iface::{Interface, InterfaceList};
use crate::id::{Identifier, IdVersion};
use crate::rtable::RoutingTable;
use crate::socket::Socket;

/// Everything the core needs, gathered in one value. No operation in
/// this crate reaches for implicit global state; everything takes a
/// `&Stack` (or a cloned `Arc<Stack>`).
pub struct Stack {
    pub config: Config,
    pub local_address: u16,
    pub id_version: IdVersion,
    pub buffers: BufferPool,
    pub interfaces: InterfaceList,
    pub rtable: RoutingTable,
    pub conns: ConnTable,
    pub fifo: QosFifo,
    pub dedup: Dedup,
    pub hmac_key: Mutex<HmacKey>,
    pub xtea_key: Mutex<Option<XteaKey>>,
    pub capabilities: Capabilities,
    pub started_at: Instant,
    sockets: Mutex<HashMap<u8, Arc<Socket>>>,
    any_socket: Mutex<Option<Arc<Socket>>>,
    next_ephemeral_port: AtomicU8,
    promiscuous: Mutex<Option<mpsc::Sender<(Packet, Arc<Interface>)>>>,
}

impl Stack {
    pub fn new(config: Config, local_address: u16, capabilities: Capabilities) -> Arc<Self> {
        let id_version = if config.use_v2_identifiers { IdVersion::V2 } else { IdVersion::V1 };
        let qos_levels = if config.qos_levels == 0 { 1 } else { config.qos_levels };
        Arc::new(Self {
            buffers: BufferPool::new(config.buffer_count),
            interfaces: InterfaceList::new(),
            rtable: RoutingTable::new(id_version, 32),
            conns: ConnTable::new(config.conn_max, config.conn_queue_length, config.max_bind_port),
            fifo: QosFifo::new(qos_levels, config.fifo_input),
            dedup: Dedup::new(),
            hmac_key: Mutex::new(HmacKey::default()),
            xtea_key: Mutex::new(None),
            capabilities,
            started_at: Instant::now(),
            sockets: Mutex::new(HashMap::new()),
            any_socket: Mutex::new(None),
            next_ephemeral_port: AtomicU8::new(config.max_bind_port as u8 + 1),
            promiscuous: Mutex::new(None),
            id_version,
            local_address,
            config,
        })
    }

    pub async fn register_socket(&self, port: Option<u8>, socket: Arc<Socket>) -> Result<()> {
        match port {
            None => {
                *self.any_socket.lock().await = Some(socket);
                Ok(())
            }
            Some(p) => {
                if p as u16 > self.config.max_bind_port {
                    return Err(CspError::Inval);
                }
                let mut sockets = self.sockets.lock().await;
                if sockets.contains_key(&p) {
                    return Err(CspError::Used);
                }
                sockets.insert(p, socket);
                Ok(())
            }
        }
    }

    pub async fn socket_for_port(&self, port: u8) -> Option<Arc<Socket>> {
        if let Some(s) = self.sockets.lock().await.get(&port).cloned() {
            return Some(s);
        }
        self.any_socket.lock().await.clone()
    }

    /// Pick an unused port above `max_bind_port` for an active-open
    /// connection's local endpoint. Wraps within `u8`'s range; a real
    /// deployment with many concurrent outbound connections would want
    /// a wider port space than CSP's 6-bit field allows.
    pub async fn allocate_ephemeral_port(&self) -> Result<u8> {
        let start = self.next_ephemeral_port.load(Ordering::Relaxed);
        let mut candidate = start;
        loop {
            if !self.sockets.lock().await.contains_key(&candidate) {
                self.next_ephemeral_port.store(candidate.wrapping_add(1).max(self.config.max_bind_port as u8 + 1), Ordering::Relaxed);
                return Ok(candidate);
            }
            candidate = candidate.wrapping_add(1);
            if candidate == start {
                return Err(CspError::NoBufs);
            }
        }
    }

    /// Enable promiscuous delivery: every packet the router accepts is
    /// also published here, regardless of destination, for passive
    /// observability tooling (spec.md's dropped-but-supplemented
    /// `CSP_USE_PROMISC` feature, see `SPEC_FULL.md` §5.G). The originating
    /// interface travels alongside the packet so consumers such as
    /// `bridge::Bridge` can apply split-horizon without a second lookup.
    pub async fn enable_promiscuous_mode(&self, capacity: usize) -> mpsc::Receiver<(Packet, Arc<Interface>)> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *self.promiscuous.lock().await = Some(tx);
        rx
    }

    /// Publish `packet` to the promiscuous sink, if enabled. Always a
    /// deep copy (`clone_packet`, not `share`): the caller and the
    /// promiscuous consumer each mutate their own cell independently (the
    /// router may still prepend headers onto `packet` after this call).
    pub async fn publish_promiscuous(&self, packet: &Packet, iface: &Arc<Interface>) {
        if let Some(tx) = self.promiscuous.lock().await.as_ref() {
            if let Ok(copy) = self.buffers.clone_packet(packet).await {
                let _ = tx.try_send((copy, iface.clone()));
            }
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
