//! Integrity and secrecy transforms (spec.md §4.L): CRC32, HMAC-SHA1
//! (truncated), and XTEA. Order on tx is CRC32 → HMAC → XTEA-encrypt;
//! order on rx is the reverse.

pub mod crc32;
pub mod hmac;
mod sha1;
pub mod xtea;

pub use hmac::HmacKey;
pub use xtea::XteaKey;
