//! Command APDU definition and wire codec.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result, MAX_DATA_LEN, MAX_EXPECTED_LEN};

/// A command APDU: four header octets, an optional data field and an
/// optional expected-response length.
///
/// `data` is the command data field (`cdf`); an empty `data` means the
/// field is absent on the wire. `le` is the expected length of the
/// response data field: `0` means no response data is expected, `256`
/// encodes as a single zero octet in short form, and [`MAX_EXPECTED_LEN`]
/// (65536, "all available") encodes as two zero octets in extended form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Class byte.
    pub cla: u8,
    /// Instruction byte.
    pub ins: u8,
    /// Parameter 1.
    pub p1: u8,
    /// Parameter 2.
    pub p2: u8,
    /// Command data field; empty when absent.
    pub data: Bytes,
    /// Expected response length, `0..=65536`; `0` when absent.
    pub le: u32,
}

impl Command {
    /// Create a new command with just the header bytes.
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Bytes::new(),
            le: 0,
        }
    }

    /// Set the command data field.
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = data.into();
        self
    }

    /// Set the expected response length.
    pub const fn with_le(mut self, le: u32) -> Self {
        self.le = le;
        self
    }

    /// Whether the canonical encoding uses the short length form.
    pub fn is_short(&self) -> bool {
        self.data.len() <= 255 && self.le <= 256
    }

    /// Length of the canonical wire encoding.
    pub fn encoded_len(&self) -> usize {
        let mut len = 4;
        if self.is_short() {
            if !self.data.is_empty() {
                len += 1 + self.data.len();
            }
            if self.le > 0 {
                len += 1;
            }
        } else {
            if !self.data.is_empty() {
                len += 3 + self.data.len();
            }
            if self.le > 0 {
                // A bare extended Le carries its own leading zero octet.
                len += if self.data.is_empty() { 3 } else { 2 };
            }
        }
        len
    }

    /// Encode into the canonical wire form.
    ///
    /// The short form is selected iff the data field fits one length
    /// octet and `le <= 256`; otherwise the extended form is used with
    /// the leading zero marker octet.
    pub fn encode(&self) -> Result<Bytes> {
        if self.data.len() > MAX_DATA_LEN {
            return Err(Error::LengthOverflow(self.data.len()));
        }
        if self.le > MAX_EXPECTED_LEN {
            return Err(Error::LengthOverflow(self.le as usize));
        }

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.cla);
        buf.put_u8(self.ins);
        buf.put_u8(self.p1);
        buf.put_u8(self.p2);

        if self.is_short() {
            if !self.data.is_empty() {
                buf.put_u8(self.data.len() as u8);
                buf.put_slice(&self.data);
            }
            if self.le > 0 {
                // 256 wraps to the zero octet.
                buf.put_u8(self.le as u8);
            }
        } else {
            if !self.data.is_empty() {
                buf.put_u8(0x00);
                buf.put_u16(self.data.len() as u16);
                buf.put_slice(&self.data);
            }
            if self.le > 0 {
                if self.data.is_empty() {
                    buf.put_u8(0x00);
                }
                // 65536 wraps to two zero octets.
                buf.put_u16(self.le as u16);
            }
        }

        Ok(buf.freeze())
    }

    /// Decode a command from its canonical wire form.
    ///
    /// Rejects truncation, trailing garbage, contradictory length fields
    /// and extended encodings of values the short form can carry.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(Error::Truncated {
                need: 4,
                got: bytes.len(),
            });
        }

        let mut cmd = Self::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        let body = &bytes[4..];

        match body.len() {
            0 => Ok(cmd),
            1 => {
                // Single octet: short Le, with zero meaning 256.
                cmd.le = match body[0] {
                    0 => 256,
                    le => le as u32,
                };
                Ok(cmd)
            }
            _ if body[0] != 0 => Self::decode_short(cmd, body),
            _ => Self::decode_extended(cmd, body),
        }
    }

    fn decode_short(mut cmd: Self, body: &[u8]) -> Result<Self> {
        let lc = body[0] as usize;
        let rest = &body[1..];
        if rest.len() < lc {
            return Err(Error::Truncated {
                need: 5 + lc,
                got: 4 + 1 + rest.len(),
            });
        }
        cmd.data = Bytes::copy_from_slice(&rest[..lc]);
        match rest.len() - lc {
            0 => Ok(cmd),
            1 => {
                cmd.le = match rest[lc] {
                    0 => 256,
                    le => le as u32,
                };
                Ok(cmd)
            }
            _ => Err(Error::Parse("trailing bytes after short-form command")),
        }
    }

    fn decode_extended(mut cmd: Self, body: &[u8]) -> Result<Self> {
        debug_assert_eq!(body[0], 0);
        if body.len() == 3 {
            // Bare extended Le: 00 LeHi LeLo.
            cmd.le = match u16::from_be_bytes([body[1], body[2]]) {
                0 => MAX_EXPECTED_LEN,
                le => le as u32,
            };
            if cmd.le <= 256 {
                return Err(Error::Parse("extended Le for a short-form value"));
            }
            return Ok(cmd);
        }
        if body.len() < 4 {
            return Err(Error::Truncated {
                need: 7,
                got: 4 + body.len(),
            });
        }

        let lc = u16::from_be_bytes([body[1], body[2]]) as usize;
        if lc == 0 {
            return Err(Error::Parse("extended Lc of zero"));
        }
        let rest = &body[3..];
        if rest.len() < lc {
            return Err(Error::Truncated {
                need: 7 + lc,
                got: 4 + 3 + rest.len(),
            });
        }
        cmd.data = Bytes::copy_from_slice(&rest[..lc]);
        match rest.len() - lc {
            0 => {}
            2 => {
                cmd.le = match u16::from_be_bytes([rest[lc], rest[lc + 1]]) {
                    0 => MAX_EXPECTED_LEN,
                    le => le as u32,
                };
            }
            _ => return Err(Error::Parse("trailing bytes after extended-form command")),
        }
        if cmd.is_short() {
            return Err(Error::Parse("extended encoding of a short-form command"));
        }
        Ok(cmd)
    }
}
