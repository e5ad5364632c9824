//! Response APDU definition and wire codec.

use core::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result, MAX_EXPECTED_LEN};

/// Status word trailer of a response APDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusWord {
    /// First status byte.
    pub sw1: u8,
    /// Second status byte.
    pub sw2: u8,
}

impl StatusWord {
    /// Normal completion, `9000`.
    pub const SUCCESS: Self = Self::new(0x90, 0x00);

    /// Create a status word from its two bytes.
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Combined 16-bit value, `sw1` high.
    pub const fn to_u16(self) -> u16 {
        ((self.sw1 as u16) << 8) | self.sw2 as u16
    }

    /// Whether this is the normal completion status.
    pub const fn is_success(self) -> bool {
        self.to_u16() == 0x9000
    }
}

impl From<u16> for StatusWord {
    fn from(value: u16) -> Self {
        Self::new((value >> 8) as u8, value as u8)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// A response APDU: an optional data field followed by the status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response data field; empty when absent.
    pub data: Bytes,
    /// Trailing status word.
    pub status: StatusWord,
}

impl Response {
    /// Create a response with a status word and no data.
    pub const fn new(status: StatusWord) -> Self {
        Self {
            data: Bytes::new(),
            status,
        }
    }

    /// Create a successful response carrying `data`.
    pub fn success<T: Into<Bytes>>(data: T) -> Self {
        Self {
            data: data.into(),
            status: StatusWord::SUCCESS,
        }
    }

    /// Set the response data field.
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = data.into();
        self
    }

    /// Whether the status word signals normal completion.
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Length of the wire encoding.
    pub fn encoded_len(&self) -> usize {
        self.data.len() + 2
    }

    /// Encode as `data ‖ sw1 ‖ sw2`.
    pub fn encode(&self) -> Result<Bytes> {
        if self.data.len() > MAX_EXPECTED_LEN as usize {
            return Err(Error::LengthOverflow(self.data.len()));
        }
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&self.data);
        buf.put_u8(self.status.sw1);
        buf.put_u8(self.status.sw2);
        Ok(buf.freeze())
    }

    /// Decode from the wire: the trailing two octets are the status
    /// word, the prefix is the data field.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(Error::Truncated {
                need: 2,
                got: bytes.len(),
            });
        }
        if bytes.len() - 2 > MAX_EXPECTED_LEN as usize {
            return Err(Error::LengthOverflow(bytes.len() - 2));
        }
        let (data, sw) = bytes.split_at(bytes.len() - 2);
        Ok(Self {
            data: Bytes::copy_from_slice(data),
            status: StatusWord::new(sw[0], sw[1]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn status_only() {
        let resp = Response::new(StatusWord::new(0x6A, 0x82));
        assert_eq!(resp.encode().unwrap().as_ref(), hex!("6A82"));
        assert_eq!(Response::decode(&hex!("6A82")).unwrap(), resp);
        assert!(!resp.is_success());
    }

    #[test]
    fn data_and_status() {
        let resp = Response::success(hex!("E012C00401FF8010C00402FF8010C00403FF8010").to_vec());
        let wire = resp.encode().unwrap();
        assert_eq!(
            wire.as_ref(),
            hex!("E012C00401FF8010C00402FF8010C00403FF80109000")
        );
        let back = Response::decode(&wire).unwrap();
        assert_eq!(back, resp);
        assert!(back.is_success());
    }

    #[test]
    fn rejects_short_input() {
        assert!(matches!(
            Response::decode(&hex!("90")),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn status_word_conversions() {
        let sw = StatusWord::from(0x9000u16);
        assert!(sw.is_success());
        assert_eq!(sw.to_u16(), 0x9000);
        assert_eq!(sw.to_string(), "9000");
    }
}
