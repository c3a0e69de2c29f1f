//! Identifier codec: the v1 (32-bit) and v2 (48-bit) on-wire header formats.
//!
//! Grounded on `csp_id.h`'s `csp_id1_*`/`csp_id2_*`/`csp_id_*` API split and
//! on spec.md §6's exact bit layouts. Byte packing uses the [`crate::codec`]
//! primitives carried over from the teacher's `core::util` codec.

use crate::codec::{Deserialize, Deserializer, Serialize, Serializer};
use crate::error::{CspError, Result};

/// Selects which wire format a [`crate::stack::Stack`] speaks.
///
/// Fixed for the process lifetime, per spec.md §4.B ("Selection between
/// v1 and v2 is a global configuration bit fixed for the process lifetime").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdVersion {
    V1,
    V2,
}

impl IdVersion {
    /// Size of the packed identifier on the wire, in bytes.
    pub const fn header_size(self) -> usize {
        match self {
            Self::V1 => 4,
            Self::V2 => 6,
        }
    }

    /// Number of address bits available to host addressing, used by
    /// [`Identifier::is_broadcast`] and routing mask validation.
    pub const fn host_bits(self) -> u8 {
        match self {
            Self::V1 => 5,
            Self::V2 => 14,
        }
    }

    pub const fn max_node_id(self) -> u16 {
        match self {
            Self::V1 => 31,
            Self::V2 => 16383,
        }
    }

    pub const fn max_port(self) -> u8 {
        63
    }
}

/// QoS priority level, `0` is highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl Priority {
    pub const COUNT: usize = 4;

    pub const fn as_index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for Priority {
    type Error = CspError;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Critical),
            1 => Ok(Self::High),
            2 => Ok(Self::Normal),
            3 => Ok(Self::Low),
            _ => Err(CspError::Inval),
        }
    }
}

/// Per-packet flag bits, carried in the identifier.
///
/// Bit values below are the v1 convention from spec.md §6. v2's 6-bit
/// flags field uses the same semantics packed into fewer bits (`FRAG`
/// shifted down to `0x20` since v1's `0x80` doesn't fit); this mapping
/// isn't pinned by the source headers available (see the v2 flags Open
/// Question decision in `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(pub u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const FRAG: Flags = Flags(0x80);
    pub const HMAC: Flags = Flags(0x08);
    pub const XTEA: Flags = Flags(0x04);
    pub const RDP: Flags = Flags(0x02);
    pub const CRC32: Flags = Flags(0x01);

    const V2_FRAG: u8 = 0x20;

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }

    fn to_wire(self, version: IdVersion) -> u8 {
        match version {
            IdVersion::V1 => self.0,
            IdVersion::V2 => {
                let frag = if self.contains(Flags::FRAG) { Self::V2_FRAG } else { 0 };
                frag | (self.0 & 0x0F)
            }
        }
    }

    fn from_wire(bits: u8, version: IdVersion) -> Self {
        match version {
            IdVersion::V1 => Flags(bits),
            IdVersion::V2 => {
                let frag = if bits & Self::V2_FRAG != 0 { Self::FRAG.0 } else { 0 };
                Flags(frag | (bits & 0x0F))
            }
        }
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;
    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// The decoded `(priority, source, destination, source_port,
/// destination_port, flags)` tuple carried by every packet, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identifier {
    pub priority: Priority,
    pub source: u16,
    pub destination: u16,
    pub source_port: u8,
    pub destination_port: u8,
    pub flags: Flags,
}

impl Identifier {
    /// `true` iff `addr`'s host bits (under `netmask`, in `version`'s host
    /// bit count) are all ones, i.e. `addr` is the subnet broadcast.
    pub fn is_broadcast(addr: u16, netmask: u8, version: IdVersion) -> bool {
        let host_bits = version.host_bits();
        if netmask >= host_bits {
            return false;
        }
        let hostmask = (1u16 << (host_bits - netmask)) - 1;
        addr & hostmask == hostmask
    }

    /// Packs this identifier into `version`'s on-wire big-endian form.
    pub fn to_bytes(self, version: IdVersion) -> Result<heapless::Vec<u8, 6>> {
        let mut out = heapless::Vec::new();
        match version {
            IdVersion::V1 => {
                let word: u32 = ((self.priority as u32) << 30)
                    | ((self.source as u32 & 0x1F) << 25)
                    | ((self.destination as u32 & 0x1F) << 20)
                    | ((self.destination_port as u32 & 0x3F) << 14)
                    | ((self.source_port as u32 & 0x3F) << 8)
                    | (self.flags.to_wire(version) as u32);
                let mut vec = heapless::Vec::new();
                Serializer::new(&mut vec).serialize(word)?;
                out.extend_from_slice(&vec).map_err(|()| CspError::PacketTooBig(4))?;
            }
            IdVersion::V2 => {
                let word: u64 = ((self.priority as u64) << 46)
                    | ((self.destination as u64 & 0x3FFF) << 32)
                    | ((self.source as u64 & 0x3FFF) << 18)
                    | ((self.destination_port as u64 & 0x3F) << 12)
                    | ((self.source_port as u64 & 0x3F) << 6)
                    | (self.flags.to_wire(version) as u64 & 0x3F);
                let bytes = word.to_be_bytes();
                out.extend_from_slice(&bytes[2..]).map_err(|()| CspError::PacketTooBig(6))?;
            }
        }
        Ok(out)
    }

    /// Unpacks an identifier from `version`'s on-wire big-endian form.
    /// Fails with [`CspError::Inval`] on a truncated slice.
    pub fn from_bytes(data: &[u8], version: IdVersion) -> Result<Self> {
        let mut d = Deserializer::new(data);
        match version {
            IdVersion::V1 => {
                let word: u32 = d.deserialize()?;
                Ok(Self {
                    priority: Priority::try_from(((word >> 30) & 0x3) as u8)?,
                    source: ((word >> 25) & 0x1F) as u16,
                    destination: ((word >> 20) & 0x1F) as u16,
                    destination_port: ((word >> 14) & 0x3F) as u8,
                    source_port: ((word >> 8) & 0x3F) as u8,
                    flags: Flags::from_wire((word & 0xFF) as u8, version),
                })
            }
            IdVersion::V2 => {
                let hi: [u8; 2] = d.deserialize()?;
                let lo: u32 = d.deserialize()?;
                let word = ((hi[0] as u64) << 40)
                    | ((hi[1] as u64) << 32)
                    | (lo as u64);
                Ok(Self {
                    priority: Priority::try_from(((word >> 46) & 0x3) as u8)?,
                    destination: ((word >> 32) & 0x3FFF) as u16,
                    source: ((word >> 18) & 0x3FFF) as u16,
                    destination_port: ((word >> 12) & 0x3F) as u8,
                    source_port: ((word >> 6) & 0x3F) as u8,
                    flags: Flags::from_wire((word & 0x3F) as u8, version),
                })
            }
        }
    }
}

impl Deserialize for [u8; 2] {
    fn deserialize(data: &mut Deserializer<'_>) -> Result<Self> {
        data.advance(2).map(|s| [s[0], s[1]])
    }
}

impl Serialize for [u8; 2] {
    fn serialize<const S: usize>(self, buffer: Serializer<S>) -> Result<Serializer<S>> {
        buffer.push(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn v1_roundtrip() {
        let id = Identifier {
            priority: Priority::High,
            source: 3,
            destination: 12,
            source_port: 21,
            destination_port: 5,
            flags: Flags::CRC32 | Flags::RDP,
        };
        let bytes = id.to_bytes(IdVersion::V1).unwrap();
        let decoded = Identifier::from_bytes(&bytes, IdVersion::V1).unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn v2_roundtrip() {
        let id = Identifier {
            priority: Priority::Normal,
            source: 1000,
            destination: 2000,
            source_port: 40,
            destination_port: 41,
            flags: Flags::HMAC | Flags::FRAG,
        };
        let bytes = id.to_bytes(IdVersion::V2).unwrap();
        assert_eq!(bytes.len(), 6);
        let decoded = Identifier::from_bytes(&bytes, IdVersion::V2).unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn broadcast_detection() {
        // v1 host bits = 5, netmask 3 -> hostmask 0b11
        assert!(Identifier::is_broadcast(0b11, 3, IdVersion::V1));
        assert!(!Identifier::is_broadcast(0b10, 3, IdVersion::V1));
    }

    proptest! {
        /// spec.md §8: header codec pack/unpack round-trips for any
        /// in-range v1 field combination.
        #[test]
        fn v1_roundtrip_any_fields(
            priority in 0u8..4,
            source in 0u16..32,
            destination in 0u16..32,
            source_port in 0u8..64,
            destination_port in 0u8..64,
            flag_bits in 0u8..=0xFF,
        ) {
            let id = Identifier {
                priority: Priority::try_from(priority).unwrap(),
                source,
                destination,
                source_port,
                destination_port,
                flags: Flags(flag_bits),
            };
            let bytes = id.to_bytes(IdVersion::V1).unwrap();
            let decoded = Identifier::from_bytes(&bytes, IdVersion::V1).unwrap();
            prop_assert_eq!(id, decoded);
        }

        /// Same property for v2's wider address fields. `flag_bits` is
        /// restricted to the low nibble plus FRAG: v2's 6-bit wire flags
        /// field only has room for those (see `Flags::to_wire`/`from_wire`).
        #[test]
        fn v2_roundtrip_any_fields(
            priority in 0u8..4,
            source in 0u16..16384,
            destination in 0u16..16384,
            source_port in 0u8..64,
            destination_port in 0u8..64,
            frag in any::<bool>(),
            low_nibble in 0u8..0x10,
        ) {
            let flags = if frag { Flags::FRAG } else { Flags::NONE };
            let id = Identifier {
                priority: Priority::try_from(priority).unwrap(),
                source,
                destination,
                source_port,
                destination_port,
                flags: Flags(flags.0 | low_nibble),
            };
            let bytes = id.to_bytes(IdVersion::V2).unwrap();
            prop_assert_eq!(bytes.len(), 6);
            let decoded = Identifier::from_bytes(&bytes, IdVersion::V2).unwrap();
            prop_assert_eq!(id, decoded);
        }
    }
}
