//! Fixed-count, fixed-size packet buffer pool (spec.md §4.A).
//!
//! Grounded on `include/csp/csp_buffer.h`'s API (`get`/`get_isr`/`free`/
//! `free_isr`/`clone`/`refc_inc`/`remaining`/`data_size`). The original
//! tracks a manual reference count per cell and a free-list FIFO; here the
//! free-list is a [`tokio::sync::Semaphore`] and the reference count is
//! `Arc`'s own strong count — `free` is simply letting the last `Packet`
//! handle drop, `refc_inc` is `Packet::share`, documented as a REDESIGN in
//! `DESIGN.md`.

use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, OwnedSemaphorePermit, Semaphore};

use crate::error::{CspError, Result};
use crate::id::{Flags, Identifier, Priority};

/// Maximum payload capacity of a single packet cell. Fixed at compile
/// time, matching spec.md §3's "payload bounded by a compile-time MTU".
pub const MAX_PACKET_SIZE: usize = 320;

/// Scratch fields used by reassemblers (RDP, SFP). Invalid outside the
/// owning subsystem, per spec.md §3.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scratch {
    pub cfpid: u32,
    pub rx_count: u16,
    pub remain: u16,
    pub last_used: u64,
}

struct Inner {
    id: Mutex<Identifier>,
    frame: Mutex<heapless::Vec<u8, MAX_PACKET_SIZE>>,
    cfpid: AtomicU32,
    rx_count: AtomicU16,
    remain: AtomicU16,
    last_used: AtomicU64,
    _permit: OwnedSemaphorePermit,
}

/// A handle to a packet cell. Cloning via [`Packet::share`] is libcsp's
/// `refc_inc`; dropping the last handle is libcsp's `free`.
#[derive(Clone)]
pub struct Packet(Arc<Inner>);

impl Packet {
    fn fresh(permit: OwnedSemaphorePermit) -> Self {
        let id = Identifier {
            priority: Priority::Normal,
            source: 0,
            destination: 0,
            source_port: 0,
            destination_port: 0,
            flags: Flags::NONE,
        };
        Self(Arc::new(Inner {
            id: Mutex::new(id),
            frame: Mutex::new(heapless::Vec::new()),
            cfpid: AtomicU32::new(0),
            rx_count: AtomicU16::new(0),
            remain: AtomicU16::new(0),
            last_used: AtomicU64::new(0),
            _permit: permit,
        }))
    }

    /// Increment the reference count (libcsp's `refc_inc`): returns an
    /// alias to the same cell. The underlying cell is released back to
    /// the pool only once every alias (and the original) is dropped.
    pub fn share(&self) -> Self {
        Self(self.0.clone())
    }

    pub async fn identifier(&self) -> Identifier {
        *self.0.id.lock().await
    }

    pub async fn set_identifier(&self, id: Identifier) {
        *self.0.id.lock().await = id;
    }

    pub async fn frame(&self) -> MutexGuard<'_, heapless::Vec<u8, MAX_PACKET_SIZE>> {
        self.0.frame.lock().await
    }

    pub async fn payload_len(&self) -> usize {
        self.0.frame.lock().await.len()
    }

    /// Best-effort, non-blocking priority read for driver `tx`
    /// implementations that run outside async context (e.g. loopback's
    /// immediate re-injection); falls back to `Normal` rather than
    /// blocking if the identifier happens to be locked elsewhere.
    pub fn priority_hint(&self) -> Priority {
        self.0.id.try_lock().map(|g| g.priority).unwrap_or(Priority::Normal)
    }

    pub async fn set_payload(&self, data: &[u8]) -> Result<()> {
        let mut frame = self.0.frame.lock().await;
        frame.clear();
        frame
            .extend_from_slice(data)
            .map_err(|()| CspError::PacketTooBig(data.len()))
    }

    /// Insert `header` ahead of whatever the frame currently holds, used
    /// by the RDP layer to attach its header ahead of the user payload
    /// (see `router.rs`'s framing note).
    pub async fn prepend(&self, header: &[u8]) -> Result<()> {
        let mut frame = self.0.frame.lock().await;
        let body: heapless::Vec<u8, MAX_PACKET_SIZE> = frame.clone();
        frame.clear();
        frame
            .extend_from_slice(header)
            .and_then(|()| frame.extend_from_slice(&body))
            .map_err(|()| CspError::PacketTooBig(header.len() + body.len()))
    }

    pub fn scratch(&self) -> Scratch {
        Scratch {
            cfpid: self.0.cfpid.load(Ordering::Relaxed),
            rx_count: self.0.rx_count.load(Ordering::Relaxed),
            remain: self.0.remain.load(Ordering::Relaxed),
            last_used: self.0.last_used.load(Ordering::Relaxed),
        }
    }

    pub fn set_cfpid(&self, v: u32) {
        self.0.cfpid.store(v, Ordering::Relaxed);
    }

    pub fn set_rx_count(&self, v: u16) {
        self.0.rx_count.store(v, Ordering::Relaxed);
    }

    pub fn set_remain(&self, v: u16) {
        self.0.remain.store(v, Ordering::Relaxed);
    }

    pub fn set_last_used(&self, v: u64) {
        self.0.last_used.store(v, Ordering::Relaxed);
    }

    /// Reference-equality: `true` iff both handles alias the same cell.
    pub fn is_same_cell(&self, other: &Packet) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Non-blocking identifier read for ISR-context callers (e.g.
    /// `router::receive_isr`). Fails with [`CspError::Busy`] rather than
    /// suspending if the identifier happens to be locked elsewhere.
    pub fn try_identifier(&self) -> Result<Identifier> {
        self.0.id.try_lock().map(|g| *g).map_err(|_| CspError::Busy)
    }

    pub fn try_set_identifier(&self, id: Identifier) -> Result<()> {
        *self.0.id.try_lock().map_err(|_| CspError::Busy)? = id;
        Ok(())
    }

    /// Non-blocking payload write for ISR-context callers: copies `data`
    /// into the frame without ever suspending.
    pub fn try_set_payload(&self, data: &[u8]) -> Result<()> {
        let mut frame = self.0.frame.try_lock().map_err(|_| CspError::Busy)?;
        frame.clear();
        frame
            .extend_from_slice(data)
            .map_err(|()| CspError::PacketTooBig(data.len()))
    }

    /// Non-blocking removal of `n` bytes from the front of the frame
    /// (used by `router::receive_isr` to strip the identifier header
    /// without suspending).
    pub fn try_strip_prefix(&self, n: usize) -> Result<()> {
        let mut frame = self.0.frame.try_lock().map_err(|_| CspError::Busy)?;
        if frame.len() < n {
            return Err(CspError::Inval);
        }
        let len = frame.len();
        frame.copy_within(n..len, 0);
        frame.truncate(len - n);
        Ok(())
    }

    /// Non-blocking copy of the first `n` bytes of the frame, without
    /// consuming them.
    pub fn try_peek_prefix(&self, n: usize) -> Result<heapless::Vec<u8, 6>> {
        let frame = self.0.frame.try_lock().map_err(|_| CspError::Busy)?;
        if frame.len() < n {
            return Err(CspError::Inval);
        }
        heapless::Vec::from_slice(&frame[..n]).map_err(|()| CspError::Inval)
    }
}

/// The fixed-count, fixed-size packet cell pool.
///
/// `count` cells are reserved up front; allocation beyond that fails with
/// [`CspError::NoBufs`] rather than growing, matching spec.md §5's
/// "statically-sized pools ... there is no dynamic growth".
pub struct BufferPool {
    semaphore: Arc<Semaphore>,
    count: usize,
}

impl BufferPool {
    pub fn new(count: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(count)),
            count,
        }
    }

    /// Blocking allocation (libcsp's `get`): waits for a free cell.
    pub async fn get(&self) -> Result<Packet> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CspError::NoBufs)?;
        Ok(Packet::fresh(permit))
    }

    /// Non-blocking allocation (libcsp's `get_isr`): fails immediately
    /// with [`CspError::NoBufs`] if the pool is empty, never suspends.
    pub fn get_isr(&self) -> Result<Packet> {
        let permit = self
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| CspError::NoBufs)?;
        Ok(Packet::fresh(permit))
    }

    /// Allocate a new cell and deep-copy `src`'s contents into it
    /// (libcsp's `clone`).
    pub async fn clone_packet(&self, src: &Packet) -> Result<Packet> {
        let dst = self.get().await?;
        *dst.0.id.lock().await = *src.0.id.lock().await;
        *dst.0.frame.lock().await = src.0.frame.lock().await.clone();
        let s = src.scratch();
        dst.set_cfpid(s.cfpid);
        dst.set_rx_count(s.rx_count);
        dst.set_remain(s.remain);
        dst.set_last_used(s.last_used);
        Ok(dst)
    }

    /// Number of cells currently free. At quiescence (no packet in
    /// flight anywhere) this equals the pool's total `count`, the
    /// leak-detection property from spec.md §4.A.
    pub fn remaining(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.count
    }

    pub const fn data_size(&self) -> usize {
        MAX_PACKET_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exhaustion_returns_nobufs() {
        let pool = BufferPool::new(2);
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        assert_eq!(pool.remaining(), 0);
        assert_eq!(pool.get_isr().unwrap_err(), CspError::NoBufs);
        drop(a);
        assert_eq!(pool.remaining(), 1);
        drop(b);
        assert_eq!(pool.remaining(), 2);
    }

    #[tokio::test]
    async fn share_keeps_cell_alive_until_all_dropped() {
        let pool = BufferPool::new(1);
        let a = pool.get().await.unwrap();
        let b = a.share();
        drop(a);
        assert_eq!(pool.remaining(), 0);
        drop(b);
        assert_eq!(pool.remaining(), 1);
    }

    #[tokio::test]
    async fn clone_packet_copies_contents() {
        let pool = BufferPool::new(2);
        let a = pool.get().await.unwrap();
        a.set_payload(b"hello").await.unwrap();
        let b = pool.clone_packet(&a).await.unwrap();
        assert!(!a.is_same_cell(&b));
        assert_eq!(&b.frame().await[..], b"hello");
    }
}
