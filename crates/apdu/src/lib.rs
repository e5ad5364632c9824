//! ISO/IEC 7816-4 APDU model
//!
//! Value types for smart-card command and response APDUs together with
//! their canonical wire encoding. Both short and extended length forms
//! are supported; parsing is strict, so `decode(encode(x)) == x` and
//! `encode(decode(b)) == b` hold for every valid value and every
//! canonically encoded byte string.
//!
//! The crate is transport-agnostic: it deals in byte strings only and
//! knows nothing about readers, channels or secure messaging.

#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub use bytes::{Bytes, BytesMut};

pub mod command;
pub mod error;
pub mod response;

pub use command::Command;
pub use error::{Error, Result};
pub use response::{Response, StatusWord};

/// Largest command data field encodable in extended length form.
pub const MAX_DATA_LEN: usize = 65535;

/// Largest expected-response length; encoded as two zero octets and
/// meaning "all available data".
pub const MAX_EXPECTED_LEN: u32 = 65536;
