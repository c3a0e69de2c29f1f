//! Error taxonomy, mirroring `csp_error.h`'s numeric codes.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, CspError>;

/// Every fallible operation in this crate returns one of these.
///
/// Variant names and meanings track libcsp's `CSP_E*` codes one-to-one so
/// callers porting existing CSP application code recognize them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CspError {
    #[error("out of memory")]
    NoMem,
    #[error("invalid argument")]
    Inval,
    #[error("operation timed out")]
    TimedOut,
    #[error("resource already in use")]
    Used,
    #[error("operation not supported")]
    NotSup,
    #[error("resource busy")]
    Busy,
    #[error("operation already in progress")]
    Already,
    #[error("connection reset by peer")]
    Reset,
    #[error("no buffers available")]
    NoBufs,
    #[error("transmit failed")]
    Tx,
    #[error("driver error")]
    Driver,
    #[error("try again")]
    Again,
    #[error("function not implemented")]
    NoSys,
    #[error("HMAC verification failed")]
    Hmac,
    #[error("CRC32 verification failed")]
    Crc32,
    #[error("SFP fragment out of sequence")]
    Sfp,
    #[error("packet too big for destination buffer ({0} bytes)")]
    PacketTooBig(usize),
}

impl CspError {
    /// Numeric code matching libcsp's `csp_error.h` values, for interop
    /// with code that expects the original's integer return convention.
    pub const fn code(self) -> i32 {
        match self {
            Self::NoMem => -1,
            Self::Inval => -2,
            Self::TimedOut => -3,
            Self::Used => -4,
            Self::NotSup => -5,
            Self::Busy => -6,
            Self::Already => -7,
            Self::Reset => -8,
            Self::NoBufs => -9,
            Self::Tx => -10,
            Self::Driver => -11,
            Self::Again => -12,
            Self::NoSys => -38,
            Self::Hmac => -100,
            Self::Crc32 => -102,
            Self::Sfp => -103,
            Self::PacketTooBig(_) => -2,
        }
    }
}
