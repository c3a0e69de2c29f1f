//! HMAC-SHA1, truncated to 4 bytes (spec.md §4.L).
//!
//! Grounded on `include/csp/crypto/csp_hmac.h`'s API surface
//! (`HMAC_LENGTH = 4`, `set_key`, `append`/`verify(include_header)`).

use crate::buffer::Packet;
use crate::crypto::sha1;
use crate::error::{CspError, Result};
use crate::id::IdVersion;

pub const HMAC_LENGTH: usize = 4;
const BLOCK_SIZE: usize = 64;

fn hmac_sha1(key: &[u8], message: &[u8]) -> [u8; 20] {
    let mut block = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        let hashed = sha1::digest(key);
        block[..20].copy_from_slice(&hashed);
    } else {
        block[..key.len()].copy_from_slice(key);
    }

    let mut ipad = [0x36u8; BLOCK_SIZE];
    let mut opad = [0x5Cu8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        ipad[i] ^= block[i];
        opad[i] ^= block[i];
    }

    let mut inner = sha1::Sha1::new();
    inner.update(&ipad);
    inner.update(message);
    let inner_digest = inner.finalize();

    let mut outer = sha1::Sha1::new();
    outer.update(&opad);
    outer.update(&inner_digest);
    outer.finalize()
}

/// Process-wide HMAC key, matching libcsp's single global `set_key`.
#[derive(Clone, Default)]
pub struct HmacKey(pub Vec<u8>);

impl HmacKey {
    fn mac(&self, message: &[u8]) -> [u8; HMAC_LENGTH] {
        let full = hmac_sha1(&self.0, message);
        let mut out = [0u8; HMAC_LENGTH];
        out.copy_from_slice(&full[..HMAC_LENGTH]);
        out
    }

    /// Append a 4-byte truncated HMAC-SHA1 trailer over `packet`'s
    /// payload (and, if `include_header`, the serialized identifier
    /// ahead of it).
    pub async fn append(&self, packet: &Packet, version: IdVersion, include_header: bool) -> Result<()> {
        let tag = {
            let frame = packet.frame().await;
            let header = if include_header {
                packet.identifier().await.to_bytes(version).unwrap_or_default()
            } else {
                heapless::Vec::new()
            };
            let mut message = Vec::with_capacity(header.len() + frame.len());
            message.extend_from_slice(&header);
            message.extend_from_slice(&frame);
            self.mac(&message)
        };
        let mut frame = packet.frame().await;
        frame
            .extend_from_slice(&tag)
            .map_err(|()| CspError::PacketTooBig(frame.len() + HMAC_LENGTH))
    }

    /// Recompute and compare the trailing 4-byte HMAC, stripping it on
    /// success. Fails with [`CspError::Hmac`] on mismatch.
    pub async fn verify(&self, packet: &Packet, version: IdVersion, include_header: bool) -> Result<()> {
        let mut frame = packet.frame().await;
        if frame.len() < HMAC_LENGTH {
            return Err(CspError::Hmac);
        }
        let split = frame.len() - HMAC_LENGTH;
        let expected: [u8; HMAC_LENGTH] = frame[split..].try_into().unwrap();

        let header = if include_header {
            drop(frame);
            let h = packet.identifier().await.to_bytes(version).unwrap_or_default();
            frame = packet.frame().await;
            h
        } else {
            heapless::Vec::new()
        };
        let mut message = Vec::with_capacity(header.len() + split);
        message.extend_from_slice(&header);
        message.extend_from_slice(&frame[..split]);
        let actual = self.mac(&message);

        if actual != expected {
            return Err(CspError::Hmac);
        }
        frame.truncate(split);
        Ok(())
    }
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
        p.set_payload(b"secret payload").await.unwrap();
        let key = HmacKey(b"k1".to_vec());
        key.append(&p, IdVersion::V1, false).await.unwrap();
        key.verify(&p, IdVersion::V1, false).await.unwrap();
        assert_eq!(&p.frame().await[..], b"secret payload");
    }

    #[tokio::test]
    async fn wrong_key_fails_verify() {
        let pool = BufferPool::new(1);
        let p = pool.get().await.unwrap();
        p.set_payload(b"hi").await.unwrap();
        HmacKey(b"a".to_vec()).append(&p, IdVersion::V1, false).await.unwrap();
        let err = HmacKey(b"b".to_vec()).verify(&p, IdVersion::V1, false).await.unwrap_err();
        assert_eq!(err, CspError::Hmac);
    }

    proptest! {
        /// spec.md §8: "HMAC append+verify is the identity", for any key
        /// and payload.
        #[test]
        fn append_then_verify_is_identity_any_input(
            key in prop::collection::vec(any::<u8>(), 1..32),
            payload in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let recovered = rt.block_on(async {
                let pool = BufferPool::new(1);
                let p = pool.get().await.unwrap();
                p.set_payload(&payload).await.unwrap();
                let hmac_key = HmacKey(key);
                hmac_key.append(&p, IdVersion::V1, false).await.unwrap();
                hmac_key.verify(&p, IdVersion::V1, false).await.unwrap();
                p.frame().await.to_vec()
            });
            prop_assert_eq!(recovered, payload);
        }
    }
}
