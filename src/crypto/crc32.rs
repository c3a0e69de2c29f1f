//! CRC32C (Castagnoli) append/verify (spec.md §4.L).
//!
//! Grounded byte-for-byte on `src/csp_crc32.c`: reflected table-driven
//! algorithm, polynomial `0x82F63B78`, init and final XOR `0xFFFFFFFF`.

use crate::buffer::Packet;
use crate::error::{CspError, Result};

const POLY: u32 = 0x82F63B78;

fn table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { POLY ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

/// Compute the CRC32C of `data`.
pub fn compute(data: &[u8]) -> u32 {
    let table = table();
    let mut crc = 0xFFFF_FFFFu32;
    for &b in data {
        crc = table[((crc ^ b as u32) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc ^ 0xFFFF_FFFF
}

/// Append a 4-byte big-endian CRC32C trailer to `packet`'s payload and
/// grow its length.
pub async fn append(packet: &Packet) -> Result<()> {
    let crc = {
        let frame = packet.frame().await;
        compute(&frame)
    };
    let mut frame = packet.frame().await;
    frame
        .extend_from_slice(&crc.to_be_bytes())
        .map_err(|()| CspError::PacketTooBig(frame.len() + 4))
}

/// Recompute the CRC32C over all but the trailing 4 bytes and compare
/// against them; on success, strips the trailer and shrinks the length.
/// Fails with [`CspError::Crc32`] on mismatch.
pub async fn verify(packet: &Packet) -> Result<()> {
    let mut frame = packet.frame().await;
    if frame.len() < 4 {
        return Err(CspError::Crc32);
    }
    let split = frame.len() - 4;
    let expected = u32::from_be_bytes(frame[split..].try_into().unwrap());
    let actual = compute(&frame[..split]);
    if actual != expected {
        return Err(CspError::Crc32);
    }
    frame.truncate(split);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use proptest::prelude::*;

    #[tokio::test]
    async fn append_then_verify_is_identity() {
        let pool = BufferPool::new(1);
        let p = pool.get().await.unwrap();
        p.set_payload(b"abcd").await.unwrap();
        append(&p).await.unwrap();
        assert_eq!(p.payload_len().await, 8);
        verify(&p).await.unwrap();
        assert_eq!(&p.frame().await[..], b"abcd");
    }

    #[tokio::test]
    async fn corrupted_payload_fails_verify() {
        let pool = BufferPool::new(1);
        let p = pool.get().await.unwrap();
        p.set_payload(b"abcd").await.unwrap();
        append(&p).await.unwrap();
        {
            let mut frame = p.frame().await;
            frame[0] ^= 0x01;
        }
        assert_eq!(verify(&p).await.unwrap_err(), CspError::Crc32);
    }

    proptest! {
        /// spec.md §8: "CRC32 append+verify is the identity on the packet
        /// payload", for any payload that fits a packet cell.
        #[test]
        fn append_then_verify_is_identity_any_payload(
            payload in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let recovered = rt.block_on(async {
                let pool = BufferPool::new(1);
                let p = pool.get().await.unwrap();
                p.set_payload(&payload).await.unwrap();
                append(&p).await.unwrap();
                verify(&p).await.unwrap();
                p.frame().await.to_vec()
            });
            prop_assert_eq!(recovered, payload);
        }
    }
}
