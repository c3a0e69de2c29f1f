//! Simple Fragmentation Protocol (spec.md §4.K): blob chunking layered
//! on top of an established connection.
//!
//! Grounded on `include/csp/csp_sfp.h`'s API (`send_own_memcpy`/`send`/
//! `recv_fp`/`recv`) for the two-field `{offset, total_size}` framing.

use crate::buffer::{BufferPool, Packet, MAX_PACKET_SIZE};
use crate::codec::{Deserialize, Deserializer, Serialize, Serializer};
use crate::error::{CspError, Result};
use crate::id::Flags;

const HEADER_SIZE: usize = 8;

struct FragmentHeader {
    offset: u32,
    total_size: u32,
}

impl FragmentHeader {
    fn to_bytes(&self) -> Result<heapless::Vec<u8, HEADER_SIZE>> {
        let mut vec = heapless::Vec::new();
        Serializer::new(&mut vec).serialize(self.offset)?.serialize(self.total_size)?;
        Ok(vec)
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut d = Deserializer::new(data);
        Ok(Self { offset: d.deserialize()?, total_size: d.deserialize()? })
    }
}

/// Chop `data` into `ceil(size / mtu)` chunks, each prepended with a
/// `{offset, total_size}` header and flagged `FRAG`, handing each to
/// `send_chunk` in order.
///
/// `send_chunk` is this crate's analog of the original's caller-supplied
/// `memcpy` function pointer — in Rust, a plain closure does the job
/// without any function-pointer indirection.
pub async fn send(
    pool: &BufferPool,
    data: &[u8],
    mtu: usize,
    mut send_chunk: impl FnMut(Packet) -> Result<()>,
) -> Result<()> {
    if mtu == 0 || mtu + HEADER_SIZE > MAX_PACKET_SIZE {
        return Err(CspError::Inval);
    }
    let total_size = data.len() as u32;
    let mut offset = 0usize;
    while offset < data.len() || data.is_empty() {
        let chunk_len = mtu.min(data.len() - offset);
        let packet = pool.get().await?;
        let header = FragmentHeader { offset: offset as u32, total_size };
        {
            let mut frame = packet.frame().await;
            frame
                .extend_from_slice(&header.to_bytes()?)
                .and_then(|()| frame.extend_from_slice(&data[offset..offset + chunk_len]))
                .map_err(|()| CspError::PacketTooBig(chunk_len + HEADER_SIZE))?;
        }
        let mut id = packet.identifier().await;
        id.flags.insert(Flags::FRAG);
        packet.set_identifier(id).await;

        send_chunk(packet)?;
        offset += chunk_len;
        if data.is_empty() {
            break;
        }
    }
    Ok(())
}

/// Reassembly state for one in-progress blob.
pub struct Reassembler {
    total_size: Option<u32>,
    received: usize,
    buffer: Vec<u8>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self { total_size: None, received: 0, buffer: Vec::new() }
    }

    /// Consume one fragment. Returns `Ok(Some(blob))` once every byte of
    /// `total_size` has been placed, `Ok(None)` if more fragments are
    /// needed. A `total_size` mismatch between chunks aborts reassembly
    /// with [`CspError::Sfp`] (spec.md §4.K).
    pub async fn recv_fragment(&mut self, packet: &Packet) -> Result<Option<Vec<u8>>> {
        let frame = packet.frame().await;
        if frame.len() < HEADER_SIZE {
            return Err(CspError::Sfp);
        }
        let header = FragmentHeader::from_bytes(&frame[..HEADER_SIZE])?;
        let payload = &frame[HEADER_SIZE..];

        match self.total_size {
            None => {
                self.total_size = Some(header.total_size);
                self.buffer = vec![0u8; header.total_size as usize];
            }
            Some(expected) if expected != header.total_size => return Err(CspError::Sfp),
            _ => {}
        }

        let offset = header.offset as usize;
        let end = offset + payload.len();
        if end > self.buffer.len() {
            return Err(CspError::Sfp);
        }
        self.buffer[offset..end].copy_from_slice(payload);
        self.received += payload.len();

        if self.received >= self.buffer.len() {
            Ok(Some(std::mem::take(&mut self.buffer)))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fragment_and_reassemble_roundtrip() {
        let pool = BufferPool::new(16);
        let blob: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();

        let mut chunks = Vec::new();
        send(&pool, &blob, 256, |p| {
            chunks.push(p);
            Ok(())
        })
        .await
        .unwrap();

        let mut reassembler = Reassembler::new();
        let mut result = None;
        for chunk in &chunks {
            result = reassembler.recv_fragment(chunk).await.unwrap();
        }
        assert_eq!(result.unwrap(), blob);
    }

    #[tokio::test]
    async fn mismatched_total_size_aborts() {
        let mut reassembler = Reassembler::new();
        let pool = BufferPool::new(4);

        let mut first = Vec::new();
        send(&pool, &[1, 2, 3, 4], 2, |p| { first.push(p); Ok(()) }).await.unwrap();
        reassembler.recv_fragment(&first[0]).await.unwrap();

        let mut second = Vec::new();
        send(&pool, &[1, 2, 3, 4, 5, 6], 2, |p| { second.push(p); Ok(()) }).await.unwrap();
        let err = reassembler.recv_fragment(&second[0]).await.unwrap_err();
        assert_eq!(err, CspError::Sfp);
    }
}
