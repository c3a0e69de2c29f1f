//! Router-ingress deduplication (spec.md §4.F).
//!
//! Grounded byte-for-byte on `src/csp_dedup.c`: ring size 8
//! (`CSP_DEDUP_BITMASK = 0x7`), CRC32 key computed over the identifier
//! bytes followed by the payload, backward scan from the most recently
//! inserted slot, insert-on-miss.

use std::sync::Mutex;

use crate::buffer::Packet;
use crate::crypto::crc32;
use crate::id::IdVersion;

const BITMASK: usize = 0x7;
const SIZE: usize = BITMASK + 1;

struct Ring {
    entries: [u32; SIZE],
    next: usize,
}

/// Bounded ring of recent packet CRCs used to drop replays at the router
/// input (spec.md's quantified property: among any 8 consecutive
/// identical packets, at most one is delivered).
pub struct Dedup {
    ring: Mutex<Ring>,
}

impl Default for Dedup {
    fn default() -> Self {
        Self::new()
    }
}

impl Dedup {
    pub fn new() -> Self {
        Self { ring: Mutex::new(Ring { entries: [0; SIZE], next: 0 }) }
    }

    async fn key(packet: &Packet, version: IdVersion) -> u32 {
        let id = packet.identifier().await;
        let id_bytes = id.to_bytes(version).unwrap_or_default();
        let frame = packet.frame().await;
        let mut buf = heapless::Vec::<u8, { crate::buffer::MAX_PACKET_SIZE + 6 }>::new();
        let _ = buf.extend_from_slice(&id_bytes);
        let _ = buf.extend_from_slice(&frame);
        crc32::compute(&buf)
    }

    /// `true` if `packet` (by `(identifier, payload)` CRC32) was seen in
    /// the last 8 distinct entries; otherwise records it and returns
    /// `false`.
    pub async fn check(&self, packet: &Packet, version: IdVersion) -> bool {
        let key = Self::key(packet, version).await;
        let mut ring = self.ring.lock().unwrap();
        let mut i = (ring.next + SIZE - 1) & BITMASK;
        while i != ring.next {
            if ring.entries[i] == key {
                return true;
            }
            i = (i + SIZE - 1) & BITMASK;
        }
        let next = ring.next;
        ring.entries[next] = key;
        ring.next = (next + 1) & BITMASK;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;

    #[tokio::test]
    async fn repeated_packet_is_flagged_duplicate() {
        let pool = BufferPool::new(2);
        let p = pool.get().await.unwrap();
        p.set_payload(b"hi").await.unwrap();
        let dedup = Dedup::new();

        assert!(!dedup.check(&p, IdVersion::V1).await);
        assert!(dedup.check(&p, IdVersion::V1).await);
    }

    #[tokio::test]
    async fn more_than_eight_distinct_evicts_oldest() {
        let pool = BufferPool::new(16);
        let dedup = Dedup::new();
        let mut packets = Vec::new();
        for i in 0u8..9 {
            let p = pool.get().await.unwrap();
            p.set_payload(&[i]).await.unwrap();
            assert!(!dedup.check(&p, IdVersion::V1).await);
            packets.push(p);
        }
        // the very first packet has now been evicted from the 8-entry ring
        assert!(!dedup.check(&packets[0], IdVersion::V1).await);
    }
}
