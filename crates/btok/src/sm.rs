//! Secure Messaging: authenticated wrapping of command and response
//! APDUs.
//!
//! Protected payloads travel in ISO 7816 data objects: the cryptogram in
//! DO-87 (padding indicator `0x02` followed by the belt-CTR keystream
//! cryptogram, same length as the plaintext), the expected response
//! length in DO-97, the 8-octet MAC in DO-8E, always in that order. A
//! response carries its status word as the plain APDU trailer; the MAC
//! input nevertheless includes a synthetic `99 02 SW1 SW2` object, so
//! the trailer is authenticated without being transmitted twice.
//!
//! Both endpoints advance a shared 16-octet big-endian counter in
//! lockstep: every wrap or unwrap must be preceded by exactly one
//! [`SmState::ctr_inc`], and the per-message cipher and MAC keys are
//! re-derived from `(K, ctr)`.

use bytes::{BufMut, Bytes, BytesMut};
use btok_apdu::{Command, Response};
use subtle::ConstantTimeEq;
use tracing::{debug, trace};
use zeroize::{Zeroize, Zeroizing};

use crate::tlv::{self, Reader};
use crate::traits::Suite;
use crate::{Error, Result};

const TAG_CRYPTOGRAM: u16 = 0x87;
const TAG_EXPECTED_LEN: u16 = 0x97;
const TAG_STATUS: u16 = 0x99;
const TAG_MAC: u16 = 0x8E;

const PADDING_INDICATOR: u8 = 0x02;
const MAC_LEN: usize = 8;
/// Secure-messaging indicator bit in the class byte.
const CLA_SM: u8 = 0x04;

const INFO_ENC: &[u8] = b"btok sm enc";
const INFO_MAC: &[u8] = b"btok sm mac";

// The wrapped data field must itself stay encodable, so the plaintext
// leaves room for the DO-87/97/8E framing.
const MAX_PROTECTED_CDF: usize = 65516;
const MAX_PROTECTED_RDF: usize = 65521;

/// Endpoint role of a secure-messaging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The terminal side; wraps commands, unwraps responses.
    Terminal,
    /// The card-terminal side; unwraps commands, wraps responses.
    CardTerminal,
}

/// Secure-messaging session state: the 32-octet session key and the
/// message counter.
///
/// Owned exclusively by one endpoint; deliberately not `Clone`. Key and
/// counter are zeroized on drop.
pub struct SmState<'a> {
    suite: Suite<'a>,
    key: [u8; 32],
    ctr: [u8; 16],
    role: Role,
    armed: bool,
}

impl core::fmt::Debug for SmState<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SmState")
            .field("role", &self.role)
            .field("ctr", &hex::encode(self.ctr))
            .finish_non_exhaustive()
    }
}

impl Drop for SmState<'_> {
    fn drop(&mut self) {
        self.key.zeroize();
        self.ctr.zeroize();
    }
}

impl<'a> SmState<'a> {
    /// Session key length in octets.
    pub const KEY_LEN: usize = 32;

    /// Start a session with key `key`; the counter begins at zero and
    /// must be advanced before the first message.
    pub fn start(key: [u8; SmState::KEY_LEN], role: Role, suite: Suite<'a>) -> Self {
        Self {
            suite,
            key,
            ctr: [0; 16],
            role,
            armed: false,
        }
    }

    /// Endpoint role.
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Current counter value.
    pub const fn counter(&self) -> &[u8; 16] {
        &self.ctr
    }

    /// Advance the message counter (big-endian increment).
    ///
    /// Must be called exactly once before each wrap or unwrap; the
    /// peer's state advances in lockstep.
    pub fn ctr_inc(&mut self) {
        for byte in self.ctr.iter_mut().rev() {
            *byte = byte.wrapping_add(1);
            if *byte != 0 {
                break;
            }
        }
        self.armed = true;
        trace!(ctr = %hex::encode(self.ctr), "counter advanced");
    }

    fn consume_arm(&mut self) -> Result<()> {
        if !self.armed {
            return Err(Error::BadLogic("counter not advanced"));
        }
        self.armed = false;
        Ok(())
    }

    /// Per-message encryption and MAC keys for the current counter.
    fn message_keys(&self) -> Result<(Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>)> {
        let mut enc = Zeroizing::new([0u8; 32]);
        let mut mac = Zeroizing::new([0u8; 32]);
        self.suite.kdf.derive(&self.key, &self.ctr, INFO_ENC, enc.as_mut())?;
        self.suite.kdf.derive(&self.key, &self.ctr, INFO_MAC, mac.as_mut())?;
        Ok((enc, mac))
    }
}

fn bad_sm(_err: tlv::TlvErr) -> Error {
    Error::BadSm("data object structure")
}

fn put_cryptogram(buf: &mut BytesMut, state: &SmState<'_>, key: &[u8; 32], plain: &[u8]) {
    let mut ct = plain.to_vec();
    state.suite.cipher.ctr_apply(key, &state.ctr, &mut ct);
    tlv::put_header(buf, TAG_CRYPTOGRAM, 1 + ct.len());
    buf.put_u8(PADDING_INDICATOR);
    buf.put_slice(&ct);
}

fn take_cryptogram(
    state: &SmState<'_>,
    key: &[u8; 32],
    value: &[u8],
) -> Result<Bytes> {
    if value.len() < 2 {
        return Err(Error::BadSm("empty cryptogram object"));
    }
    if value[0] != PADDING_INDICATOR {
        return Err(Error::BadPadding);
    }
    let mut plain = value[1..].to_vec();
    state.suite.cipher.ctr_apply(key, &state.ctr, &mut plain);
    Ok(plain.into())
}

fn expected_len_value(le: u32) -> Vec<u8> {
    if le <= 256 {
        vec![le as u8]
    } else {
        (le as u16).to_be_bytes().to_vec()
    }
}

fn parse_expected_len(value: &[u8]) -> Result<u32> {
    match value {
        [0] => Ok(256),
        [le] => Ok(*le as u32),
        [0, 0] => Ok(65536),
        [hi, lo] => {
            let le = u16::from_be_bytes([*hi, *lo]) as u32;
            if le <= 256 {
                return Err(Error::BadSm("non-canonical expected length"));
            }
            Ok(le)
        }
        _ => Err(Error::BadSm("expected length object")),
    }
}

/// Wrap a command APDU.
///
/// With no state the command is encoded plain, class byte untouched.
/// With a state the data field is encrypted into DO-87, the expected
/// length moves into DO-97, and DO-8E authenticates the header, the
/// counter and both objects.
pub fn wrap_command(cmd: &Command, state: Option<&mut SmState<'_>>) -> Result<Bytes> {
    let Some(state) = state else {
        return Ok(cmd.encode()?);
    };
    if cmd.data.len() > MAX_PROTECTED_CDF {
        return Err(Error::BadInput("data field too long to protect"));
    }
    state.consume_arm()?;
    let (enc_key, mac_key) = state.message_keys()?;

    let cla = cmd.cla | CLA_SM;
    let mut dos = BytesMut::new();
    if !cmd.data.is_empty() {
        put_cryptogram(&mut dos, state, &enc_key, &cmd.data);
    }
    if cmd.le > 0 {
        tlv::put(&mut dos, TAG_EXPECTED_LEN, &expected_len_value(cmd.le));
    }

    let mut mac_input = BytesMut::with_capacity(32 + dos.len());
    mac_input.put_slice(&[cla, cmd.ins, cmd.p1, cmd.p2]);
    mac_input.put_bytes(0, 12);
    mac_input.put_slice(&state.ctr);
    mac_input.put_slice(&dos);
    let tag = state.suite.mac.compute(&mac_key, &mac_input);
    tlv::put(&mut dos, TAG_MAC, &tag);

    // The wrapped command always expects response data; extended form
    // only when its own payload or the inner expectation demands it.
    let le = if dos.len() > 255 || cmd.le > 256 {
        65536
    } else {
        256
    };
    let wrapped = Command::new(cla, cmd.ins, cmd.p1, cmd.p2)
        .with_data(dos.freeze())
        .with_le(le);
    debug!(ins = cmd.ins, len = wrapped.encoded_len(), "command wrapped");
    Ok(wrapped.encode()?)
}

/// Unwrap a command APDU; the inverse of [`wrap_command`].
///
/// The MAC is verified in constant time before anything is decrypted.
pub fn unwrap_command(apdu: &[u8], state: Option<&mut SmState<'_>>) -> Result<Command> {
    let Some(state) = state else {
        return Ok(Command::decode(apdu)?);
    };
    state.consume_arm()?;
    let (enc_key, mac_key) = state.message_keys()?;

    let outer = Command::decode(apdu)?;
    if outer.cla & CLA_SM == 0 {
        return Err(Error::BadSm("secure-messaging indicator not set"));
    }

    let mut rd = Reader::new(&outer.data);
    let cryptogram = rd.read_optional(TAG_CRYPTOGRAM).map_err(bad_sm)?;
    let expected = rd.read_optional(TAG_EXPECTED_LEN).map_err(bad_sm)?;
    let tag = rd.read(TAG_MAC).map_err(bad_sm)?;
    rd.finish().map_err(bad_sm)?;
    if tag.len() != MAC_LEN {
        return Err(Error::BadSm("MAC length"));
    }

    let authed = outer.data.len() - tlv::field_len(TAG_MAC, MAC_LEN);
    let mut mac_input = BytesMut::with_capacity(32 + authed);
    mac_input.put_slice(&[outer.cla, outer.ins, outer.p1, outer.p2]);
    mac_input.put_bytes(0, 12);
    mac_input.put_slice(&state.ctr);
    mac_input.put_slice(&outer.data[..authed]);
    let computed = state.suite.mac.compute(&mac_key, &mac_input);
    if !bool::from(computed.ct_eq(tag)) {
        return Err(Error::BadMac);
    }

    let data = match cryptogram {
        Some(value) => take_cryptogram(state, &enc_key, value)?,
        None => Bytes::new(),
    };
    let le = match expected {
        Some(value) => parse_expected_len(value)?,
        None => 0,
    };
    trace!(ins = outer.ins, "command unwrapped");
    Ok(Command::new(outer.cla & !CLA_SM, outer.ins, outer.p1, outer.p2)
        .with_data(data)
        .with_le(le))
}

/// Wrap a response APDU.
///
/// Plain encoding with no state. With a state the data field is
/// encrypted into DO-87 and DO-8E authenticates the counter, the
/// cryptogram and the status word; the status word itself stays in the
/// plain trailer.
pub fn wrap_response(resp: &Response, state: Option<&mut SmState<'_>>) -> Result<Bytes> {
    let Some(state) = state else {
        return Ok(resp.encode()?);
    };
    if resp.data.len() > MAX_PROTECTED_RDF {
        return Err(Error::BadInput("data field too long to protect"));
    }
    state.consume_arm()?;
    let (enc_key, mac_key) = state.message_keys()?;

    let mut dos = BytesMut::new();
    if !resp.data.is_empty() {
        put_cryptogram(&mut dos, state, &enc_key, &resp.data);
    }

    let mut mac_input = BytesMut::with_capacity(16 + dos.len() + 4);
    mac_input.put_slice(&state.ctr);
    mac_input.put_slice(&dos);
    mac_input.put_slice(&[TAG_STATUS as u8, 2, resp.status.sw1, resp.status.sw2]);
    let tag = state.suite.mac.compute(&mac_key, &mac_input);
    tlv::put(&mut dos, TAG_MAC, &tag);

    let wrapped = Response {
        data: dos.freeze(),
        status: resp.status,
    };
    debug!(status = %resp.status, len = wrapped.encoded_len(), "response wrapped");
    Ok(wrapped.encode()?)
}

/// Unwrap a response APDU; the inverse of [`wrap_response`].
///
/// The status word in the trailer participates in the MAC, so a forged
/// trailer fails exactly like a forged cryptogram.
pub fn unwrap_response(apdu: &[u8], state: Option<&mut SmState<'_>>) -> Result<Response> {
    let Some(state) = state else {
        return Ok(Response::decode(apdu)?);
    };
    state.consume_arm()?;
    let (enc_key, mac_key) = state.message_keys()?;

    let outer = Response::decode(apdu)?;
    let mut rd = Reader::new(&outer.data);
    let cryptogram = rd.read_optional(TAG_CRYPTOGRAM).map_err(bad_sm)?;
    let tag = rd.read(TAG_MAC).map_err(bad_sm)?;
    rd.finish().map_err(bad_sm)?;
    if tag.len() != MAC_LEN {
        return Err(Error::BadSm("MAC length"));
    }

    let authed = outer.data.len() - tlv::field_len(TAG_MAC, MAC_LEN);
    let mut mac_input = BytesMut::with_capacity(16 + authed + 4);
    mac_input.put_slice(&state.ctr);
    mac_input.put_slice(&outer.data[..authed]);
    mac_input.put_slice(&[TAG_STATUS as u8, 2, outer.status.sw1, outer.status.sw2]);
    let computed = state.suite.mac.compute(&mac_key, &mac_input);
    if !bool::from(computed.ct_eq(tag)) {
        return Err(Error::BadMac);
    }

    let data = match cryptogram {
        Some(value) => take_cryptogram(state, &enc_key, value)?,
        None => Bytes::new(),
    };
    trace!(status = %outer.status, "response unwrapped");
    Ok(Response {
        data,
        status: outer.status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belt;
    use btok_apdu::StatusWord;
    use hex_literal::hex;

    fn key() -> [u8; 32] {
        hex!("8504FA9D1BB6C7AC252E72C202FDCE0D 5BE3D61217B96181FE6786AD716B890B")
    }

    fn pair<'a>() -> (SmState<'a>, SmState<'a>) {
        (
            SmState::start(key(), Role::Terminal, belt::suite()),
            SmState::start(key(), Role::CardTerminal, belt::suite()),
        )
    }

    fn test_command() -> Command {
        Command::new(0x00, 0xA4, 0x04, 0x04)
            .with_data(hex!("54657374").to_vec())
            .with_le(256)
    }

    fn test_response() -> Response {
        Response {
            data: hex!("E012C00401FF8010C00402FF8010C00403FF8010").to_vec().into(),
            status: StatusWord::SUCCESS,
        }
    }

    #[test]
    fn plain_command_passthrough() {
        let wire = wrap_command(&test_command(), None).unwrap();
        assert_eq!(wire.as_ref(), hex!("00A40404045465737400"));
        let cmd = unwrap_command(&wire, None).unwrap();
        assert_eq!(cmd, test_command());
    }

    #[test]
    fn plain_response_passthrough() {
        let wire = wrap_response(&test_response(), None).unwrap();
        assert_eq!(
            wire.as_ref(),
            hex!("E012C00401FF8010C00402FF8010C00403FF80109000")
        );
        let resp = unwrap_response(&wire, None).unwrap();
        assert_eq!(resp, test_response());
    }

    #[test]
    fn protected_command_structure_and_roundtrip() {
        let (mut t, mut ct) = pair();
        t.ctr_inc();
        ct.ctr_inc();

        let wire = wrap_command(&test_command(), Some(&mut t)).unwrap();
        // CLA with the SM bit, Lc = DO-87(7) + DO-97(3) + DO-8E(10).
        assert_eq!(&wire[..5], hex!("04A4040414"));
        assert_eq!(&wire[5..7], hex!("8705"));
        assert_eq!(wire[7], 0x02);
        assert_eq!(&wire[12..15], hex!("970100"));
        assert_eq!(&wire[15..17], hex!("8E08"));
        assert_eq!(wire[25], 0x00);
        assert_eq!(wire.len(), 26);
        // Keystream cryptogram: same length as the plaintext, not equal
        // to it.
        assert_ne!(&wire[8..12], hex!("54657374"));

        let cmd = unwrap_command(&wire, Some(&mut ct)).unwrap();
        assert_eq!(cmd, test_command());
    }

    #[test]
    fn protected_response_structure_and_roundtrip() {
        let (mut t, mut ct) = pair();
        // Counters advance in lockstep: command exchange first.
        t.ctr_inc();
        ct.ctr_inc();
        let wire = wrap_command(&test_command(), Some(&mut t)).unwrap();
        unwrap_command(&wire, Some(&mut ct)).unwrap();

        ct.ctr_inc();
        t.ctr_inc();
        let wire = wrap_response(&test_response(), Some(&mut ct)).unwrap();
        // DO-87(23) + DO-8E(10) + SW(2).
        assert_eq!(wire.len(), 35);
        assert_eq!(&wire[..2], hex!("8715"));
        assert_eq!(wire[2], 0x02);
        assert_eq!(&wire[23..25], hex!("8E08"));
        assert_eq!(&wire[33..], hex!("9000"));

        let resp = unwrap_response(&wire, Some(&mut t)).unwrap();
        assert_eq!(resp, test_response());
    }

    #[test]
    fn counter_mismatch_is_a_mac_failure() {
        let (mut t, mut ct) = pair();
        t.ctr_inc();
        let wire = wrap_command(&test_command(), Some(&mut t)).unwrap();

        // Peer advanced twice: derived keys differ.
        ct.ctr_inc();
        ct.ctr_inc();
        assert!(matches!(
            unwrap_command(&wire, Some(&mut ct)),
            Err(Error::BadMac)
        ));
    }

    #[test]
    fn wrap_without_ctr_inc_is_rejected() {
        let (mut t, mut ct) = pair();
        assert!(matches!(
            wrap_command(&test_command(), Some(&mut t)),
            Err(Error::BadLogic(_))
        ));

        t.ctr_inc();
        let wire = wrap_command(&test_command(), Some(&mut t)).unwrap();
        // A second wrap on the same counter is out of order.
        assert!(matches!(
            wrap_command(&test_command(), Some(&mut t)),
            Err(Error::BadLogic(_))
        ));
        ct.ctr_inc();
        unwrap_command(&wire, Some(&mut ct)).unwrap();
        assert!(matches!(
            unwrap_command(&wire, Some(&mut ct)),
            Err(Error::BadLogic(_))
        ));
    }

    #[test]
    fn tampering_is_detected_everywhere() {
        let (mut t, _) = pair();
        t.ctr_inc();
        let wire = wrap_command(&test_command(), Some(&mut t)).unwrap();

        // Everything except the trailing Le byte is authenticated; a
        // header flip is caught by the MAC or the structure checks.
        for at in 0..wire.len() - 1 {
            let mut bad = wire.to_vec();
            bad[at] ^= 0x40;
            let mut ct = SmState::start(key(), Role::CardTerminal, belt::suite());
            ct.ctr_inc();
            assert!(
                unwrap_command(&bad, Some(&mut ct)).is_err(),
                "flip at {at} accepted"
            );
        }
    }

    #[test]
    fn tampered_status_word_is_detected() {
        let (mut t, mut ct) = pair();
        ct.ctr_inc();
        let wire = wrap_response(&test_response(), Some(&mut ct)).unwrap();

        let mut bad = wire.to_vec();
        let len = bad.len();
        bad[len - 1] = 0x01;
        t.ctr_inc();
        assert!(matches!(
            unwrap_response(&bad, Some(&mut t)),
            Err(Error::BadMac)
        ));
    }

    #[test]
    fn wrong_do_order_is_rejected() {
        let (mut t, mut ct) = pair();
        t.ctr_inc();
        let wire = wrap_command(&test_command(), Some(&mut t)).unwrap();

        // Move DO-97 in front of DO-87: 5..12 is DO-87, 12..15 is DO-97.
        let mut swapped = wire[..5].to_vec();
        swapped.extend_from_slice(&wire[12..15]);
        swapped.extend_from_slice(&wire[5..12]);
        swapped.extend_from_slice(&wire[15..]);
        ct.ctr_inc();
        assert!(matches!(
            unwrap_command(&swapped, Some(&mut ct)),
            Err(Error::BadSm(_) | Error::BadMac)
        ));
    }

    #[test]
    fn empty_fields_omit_their_objects() {
        let (mut t, mut ct) = pair();
        t.ctr_inc();
        ct.ctr_inc();

        let bare = Command::new(0x00, 0x20, 0x00, 0x01);
        let wire = wrap_command(&bare, Some(&mut t)).unwrap();
        // Only DO-8E inside.
        assert_eq!(&wire[5..7], hex!("8E08"));
        let cmd = unwrap_command(&wire, Some(&mut ct)).unwrap();
        assert_eq!(cmd, bare);

        ct.ctr_inc();
        t.ctr_inc();
        let empty = Response::new(StatusWord::new(0x6A, 0x82));
        let wire = wrap_response(&empty, Some(&mut ct)).unwrap();
        assert_eq!(&wire[..2], hex!("8E08"));
        assert_eq!(&wire[wire.len() - 2..], hex!("6A82"));
        let resp = unwrap_response(&wire, Some(&mut t)).unwrap();
        assert_eq!(resp, empty);
    }

    #[test]
    fn length_boundary_sweep() {
        let (mut t, mut ct) = pair();
        for data_len in [0usize, 1, 127, 128, 255, 256, 257] {
            for le in [0u32, 1, 255, 256, 257, 65535, 65536] {
                let cmd = Command::new(0x00, 0xA4, 0x04, 0x04)
                    .with_data(vec![0x3C; data_len])
                    .with_le(le);
                t.ctr_inc();
                let wire = wrap_command(&cmd, Some(&mut t)).unwrap();
                ct.ctr_inc();
                assert_eq!(unwrap_command(&wire, Some(&mut ct)).unwrap(), cmd);

                let resp = Response::success(vec![0x5A; data_len]);
                ct.ctr_inc();
                let wire = wrap_response(&resp, Some(&mut ct)).unwrap();
                t.ctr_inc();
                assert_eq!(unwrap_response(&wire, Some(&mut t)).unwrap(), resp);
            }
        }
    }

    #[test]
    fn wrong_padding_indicator() {
        let (mut t, _) = pair();
        t.ctr_inc();
        t.consume_arm().unwrap();
        let (enc_key, _) = t.message_keys().unwrap();

        // A cryptogram object must start with the 0x02 indicator.
        assert!(matches!(
            take_cryptogram(&t, &enc_key, &[0x01, 0xAA, 0xBB]),
            Err(Error::BadPadding)
        ));
        assert!(matches!(
            take_cryptogram(&t, &enc_key, &[0x02]),
            Err(Error::BadSm(_))
        ));
    }

    #[test]
    fn state_does_not_leak_key_in_debug() {
        let (t, _) = pair();
        let rendered = format!("{t:?}");
        assert!(rendered.contains("Terminal"));
        assert!(!rendered.contains(&hex::encode(key())));
    }
}
