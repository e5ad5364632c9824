//! Error types for APDU encoding and decoding.

use thiserror::Error;

/// Result type for APDU operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for APDU encoding and decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// Input ended before the structure it announces.
    #[error("truncated APDU: need at least {need} bytes, got {got}")]
    Truncated {
        /// Minimum number of bytes the structure requires.
        need: usize,
        /// Number of bytes actually available.
        got: usize,
    },

    /// Structurally invalid or non-canonical encoding.
    #[error("malformed APDU: {0}")]
    Parse(&'static str),

    /// A length field exceeds what the wire format can carry.
    #[error("length out of range: {0}")]
    LengthOverflow(usize),
}
