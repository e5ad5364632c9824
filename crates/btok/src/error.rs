//! Error types for the token-interaction core.

use thiserror::Error;

/// Result type for token operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for token operations.
///
/// Every operation in the crate surfaces failures through this enum;
/// nothing is retried internally, and any error leaves the affected
/// state terminal.
#[derive(Debug, Error)]
pub enum Error {
    /// APDU codec error.
    #[error(transparent)]
    Apdu(#[from] btok_apdu::Error),

    /// A pointer, length or range precondition was violated before any
    /// cryptography ran.
    #[error("bad input: {0}")]
    BadInput(&'static str),

    /// Certificate malformed, chain mismatch, expired or carrying an
    /// invalid signature.
    #[error("bad certificate: {0}")]
    BadCert(&'static str),

    /// Secure-messaging container malformed: unexpected tag order,
    /// unknown data object or length overflow.
    #[error("bad secure-messaging container: {0}")]
    BadSm(&'static str),

    /// MAC verification failed.
    #[error("MAC verification failed")]
    BadMac,

    /// Cryptogram padding indicator invalid.
    #[error("bad cryptogram padding")]
    BadPadding,

    /// Operation invoked in the wrong state.
    #[error("operation out of order: {0}")]
    BadLogic(&'static str),

    /// The injected randomness source failed.
    #[error("entropy source failure")]
    BadEntropy,

    /// Signature-scheme parameters inconsistent with the certificate
    /// security level.
    #[error("inconsistent scheme parameters: {0}")]
    BadParams(&'static str),
}
