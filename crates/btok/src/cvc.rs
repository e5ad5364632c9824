//! CV-certificate codec: issuance, parsing and chain validation.
//!
//! The certificate is a BER-TLV structure with DER definite lengths and
//! a fixed field order:
//!
//! ```text
//! 7F21 (certificate)
//!   7F4E (to-be-signed)
//!     5F29  profile version (one octet, zero)
//!     42    authority reference
//!     7F49 (public key)
//!       06  signature-scheme OID
//!       86  public key, little-endian x ‖ y
//!     5F20  holder reference
//!     7F4C (eId authorization)   06 OID, 53 mask
//!     7F4C (eSign authorization) 06 OID, 53 mask
//!     5F25  valid-from  (six decimal-digit octets, YYMMDD)
//!     5F24  valid-until (same form)
//!   5F37  signature over the complete 7F4E data object
//! ```
//!
//! Parsing is strict: any deviation from the canonical encoding, the
//! field order or the declared sizes is [`Error::BadCert`].

use bytes::{Bytes, BytesMut};
use subtle::ConstantTimeEq;
use tracing::{debug, trace};

use crate::tlv::{self, Reader, TlvErr};
use crate::traits::{Level, SigScheme};
use crate::{Error, Result};

const TAG_CERT: u16 = 0x7F21;
const TAG_TBS: u16 = 0x7F4E;
const TAG_PROFILE: u16 = 0x5F29;
const TAG_AUTHORITY: u16 = 0x42;
const TAG_PUBKEY: u16 = 0x7F49;
const TAG_OID: u16 = 0x06;
const TAG_PUBKEY_VALUE: u16 = 0x86;
const TAG_HOLDER: u16 = 0x5F20;
const TAG_HAT: u16 = 0x7F4C;
const TAG_HAT_VALUE: u16 = 0x53;
const TAG_FROM: u16 = 0x5F25;
const TAG_UNTIL: u16 = 0x5F24;
const TAG_SIG: u16 = 0x5F37;

const PROFILE_VERSION: u8 = 0x00;

/// Length of the eId effective-authorization mask.
pub const HAT_EID_LEN: usize = 5;
/// Length of the eSign effective-authorization mask.
pub const HAT_ESIGN_LEN: usize = 2;

/// Shortest permitted authority/holder name.
pub const NAME_MIN_LEN: usize = 8;
/// Longest permitted authority/holder name.
pub const NAME_MAX_LEN: usize = 12;

// 1.2.112.0.2.0.34.101.45.3.{1,2,3}
const OID_BIGN_128: [u8; 10] = [0x2A, 0x70, 0x00, 0x02, 0x00, 0x22, 0x65, 0x2D, 0x03, 0x01];
const OID_BIGN_192: [u8; 10] = [0x2A, 0x70, 0x00, 0x02, 0x00, 0x22, 0x65, 0x2D, 0x03, 0x02];
const OID_BIGN_256: [u8; 10] = [0x2A, 0x70, 0x00, 0x02, 0x00, 0x22, 0x65, 0x2D, 0x03, 0x03];

// 1.2.112.0.2.0.34.101.79.6.{1,2}
const OID_HAT_EID: [u8; 10] = [0x2A, 0x70, 0x00, 0x02, 0x00, 0x22, 0x65, 0x4F, 0x06, 0x01];
const OID_HAT_ESIGN: [u8; 10] = [0x2A, 0x70, 0x00, 0x02, 0x00, 0x22, 0x65, 0x4F, 0x06, 0x02];

const fn level_oid(level: Level) -> &'static [u8; 10] {
    match level {
        Level::L128 => &OID_BIGN_128,
        Level::L192 => &OID_BIGN_192,
        Level::L256 => &OID_BIGN_256,
    }
}

fn level_from_oid(oid: &[u8]) -> Option<Level> {
    if oid == OID_BIGN_128 {
        Some(Level::L128)
    } else if oid == OID_BIGN_192 {
        Some(Level::L192)
    } else if oid == OID_BIGN_256 {
        Some(Level::L256)
    } else {
        None
    }
}

/// Certificate validity date: six octets, one decimal digit each,
/// reading `YYMMDD`.
///
/// Ordering is lexicographic on the octets, which coincides with
/// chronological order for the two-digit-year window the format covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Date(pub [u8; 6]);

impl Date {
    /// Build a date from six ASCII digits, e.g. `b"220707"`.
    pub fn from_ascii(digits: &[u8; 6]) -> Result<Self> {
        let mut out = [0u8; 6];
        for (o, d) in out.iter_mut().zip(digits) {
            if !d.is_ascii_digit() {
                return Err(Error::BadInput("date digit"));
            }
            *o = d - b'0';
        }
        let date = Self(out);
        date.check()?;
        Ok(date)
    }

    /// Validate digit range and a plausible calendar reading.
    pub fn check(&self) -> Result<()> {
        if self.0.iter().any(|&d| d > 9) {
            return Err(Error::BadInput("date digit"));
        }
        let month = self.0[2] * 10 + self.0[3];
        let day = self.0[4] * 10 + self.0[5];
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return Err(Error::BadInput("calendar date"));
        }
        Ok(())
    }
}

/// Parsed CV-certificate fields.
///
/// `pubkey` is either empty (to be filled from the signer key during
/// self-signed wrapping) or exactly `level.public_key_len()` octets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvcFields {
    /// Issuing-authority reference, 8–12 printable ASCII octets.
    pub authority: String,
    /// Holder reference, 8–12 printable ASCII octets.
    pub holder: String,
    /// First day of validity.
    pub from: Date,
    /// Last day of validity.
    pub until: Date,
    /// eId effective-authorization mask.
    pub hat_eid: [u8; HAT_EID_LEN],
    /// eSign effective-authorization mask.
    pub hat_esign: [u8; HAT_ESIGN_LEN],
    /// Subject public key, little-endian `x ‖ y`; empty when not yet
    /// generated.
    pub pubkey: Vec<u8>,
}

fn name_ok(name: &str) -> bool {
    (NAME_MIN_LEN..=NAME_MAX_LEN).contains(&name.len())
        && name.bytes().all(|b| (0x20..0x7F).contains(&b))
}

/// Constant-time name equality; names are compared octet-wise after the
/// parser has already right-trimmed any NUL padding.
fn names_match(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

impl CvcFields {
    /// Security level implied by the public-key length.
    pub fn level(&self) -> Result<Level> {
        Level::from_public_key_len(self.pubkey.len())
            .ok_or(Error::BadInput("public key length"))
    }

    /// Validate field ranges and date ordering.
    ///
    /// Pure value validation: no curve arithmetic runs, but a public key
    /// of all zero octets is rejected as out of range, so a certificate
    /// skeleton fails here until a real key is filled in.
    pub fn check(&self) -> Result<()> {
        if !name_ok(&self.authority) {
            return Err(Error::BadInput("authority name"));
        }
        if !name_ok(&self.holder) {
            return Err(Error::BadInput("holder name"));
        }
        self.from.check()?;
        self.until.check()?;
        if self.from > self.until {
            return Err(Error::BadInput("validity interval"));
        }
        self.level()?;
        if self.pubkey.iter().all(|&b| b == 0) {
            return Err(Error::BadInput("public key out of range"));
        }
        Ok(())
    }
}

fn tbs_value_len(fields: &CvcFields) -> usize {
    let pubkey_inner =
        tlv::field_len(TAG_OID, 10) + tlv::field_len(TAG_PUBKEY_VALUE, fields.pubkey.len());
    let hat_eid_inner = tlv::field_len(TAG_OID, 10) + tlv::field_len(TAG_HAT_VALUE, HAT_EID_LEN);
    let hat_esign_inner =
        tlv::field_len(TAG_OID, 10) + tlv::field_len(TAG_HAT_VALUE, HAT_ESIGN_LEN);

    tlv::field_len(TAG_PROFILE, 1)
        + tlv::field_len(TAG_AUTHORITY, fields.authority.len())
        + tlv::field_len(TAG_PUBKEY, pubkey_inner)
        + tlv::field_len(TAG_HOLDER, fields.holder.len())
        + tlv::field_len(TAG_HAT, hat_eid_inner)
        + tlv::field_len(TAG_HAT, hat_esign_inner)
        + tlv::field_len(TAG_FROM, 6)
        + tlv::field_len(TAG_UNTIL, 6)
}

/// Exact encoded length of the certificate `fields` would wrap into,
/// signed at `signer` level.
///
/// `fields.pubkey` must already be filled; the companion of [`wrap`],
/// replacing the length-probe calling convention with a total function.
pub fn encoded_len(fields: &CvcFields, signer: Level) -> Result<usize> {
    fields.check()?;
    let tbs = tlv::field_len(TAG_TBS, tbs_value_len(fields));
    let sig = tlv::field_len(TAG_SIG, signer.signature_len());
    Ok(tlv::field_len(TAG_CERT, tbs + sig))
}

fn put_tbs(buf: &mut BytesMut, fields: &CvcFields, level: Level) {
    let value_len = tbs_value_len(fields);
    tlv::put_header(buf, TAG_TBS, value_len);

    tlv::put(buf, TAG_PROFILE, &[PROFILE_VERSION]);
    tlv::put(buf, TAG_AUTHORITY, fields.authority.as_bytes());

    let pubkey_inner =
        tlv::field_len(TAG_OID, 10) + tlv::field_len(TAG_PUBKEY_VALUE, fields.pubkey.len());
    tlv::put_header(buf, TAG_PUBKEY, pubkey_inner);
    tlv::put(buf, TAG_OID, level_oid(level));
    tlv::put(buf, TAG_PUBKEY_VALUE, &fields.pubkey);

    tlv::put(buf, TAG_HOLDER, fields.holder.as_bytes());

    let hat_eid_inner = tlv::field_len(TAG_OID, 10) + tlv::field_len(TAG_HAT_VALUE, HAT_EID_LEN);
    tlv::put_header(buf, TAG_HAT, hat_eid_inner);
    tlv::put(buf, TAG_OID, &OID_HAT_EID);
    tlv::put(buf, TAG_HAT_VALUE, &fields.hat_eid);

    let hat_esign_inner =
        tlv::field_len(TAG_OID, 10) + tlv::field_len(TAG_HAT_VALUE, HAT_ESIGN_LEN);
    tlv::put_header(buf, TAG_HAT, hat_esign_inner);
    tlv::put(buf, TAG_OID, &OID_HAT_ESIGN);
    tlv::put(buf, TAG_HAT_VALUE, &fields.hat_esign);

    tlv::put(buf, TAG_FROM, &fields.from.0);
    tlv::put(buf, TAG_UNTIL, &fields.until.0);
}

/// Serialize and sign `fields` under `private`.
///
/// When `fields.pubkey` is empty the subject key is recomputed from
/// `private` (the self-signed path); otherwise `private` only signs and
/// may belong to a different, higher-level issuer key.
pub fn wrap(fields: &CvcFields, scheme: &dyn SigScheme, private: &[u8]) -> Result<Bytes> {
    if private.len() != scheme.level().private_key_len() {
        return Err(Error::BadInput("private key length"));
    }

    let filled;
    let fields = if fields.pubkey.is_empty() {
        filled = CvcFields {
            pubkey: scheme.derive_pub(private)?,
            ..fields.clone()
        };
        &filled
    } else {
        fields
    };
    fields.check()?;
    let level = fields.level()?;

    let sig_len = scheme.level().signature_len();
    let tbs_len = tlv::field_len(TAG_TBS, tbs_value_len(fields));
    let body_len = tbs_len + tlv::field_len(TAG_SIG, sig_len);

    let mut buf = BytesMut::with_capacity(tlv::field_len(TAG_CERT, body_len));
    tlv::put_header(&mut buf, TAG_CERT, body_len);
    let tbs_at = buf.len();
    put_tbs(&mut buf, fields, level);
    debug_assert_eq!(buf.len() - tbs_at, tbs_len);

    let sig = scheme.sign(private, &buf[tbs_at..])?;
    if sig.len() != sig_len {
        return Err(Error::BadParams("signature length"));
    }
    tlv::put(&mut buf, TAG_SIG, &sig);

    debug!(
        holder = %fields.holder,
        authority = %fields.authority,
        len = buf.len(),
        "wrapped CV certificate"
    );
    Ok(buf.freeze())
}

/// Encoded length of the certificate starting at `bytes`, read from the
/// outer header alone.
///
/// Returns `None` when the header is malformed or the declared length
/// runs past the end of `bytes`.
pub fn len(bytes: &[u8]) -> Option<usize> {
    let (tag, value_len, header_len) = tlv::header(bytes).ok()?;
    if tag != TAG_CERT {
        return None;
    }
    let total = header_len + value_len;
    if total > bytes.len() {
        return None;
    }
    Some(total)
}

struct Parsed {
    fields: CvcFields,
    level: Level,
    tbs: Bytes,
    sig: Bytes,
}

fn bad(_err: TlvErr) -> Error {
    Error::BadCert("tlv structure")
}

fn parse(cert: &[u8]) -> Result<Parsed> {
    let mut outer = Reader::new(cert);
    let body = outer.read(TAG_CERT).map_err(bad)?;
    outer.finish().map_err(bad)?;

    let (tag, tbs_value_len, tbs_header_len) = tlv::header(body).map_err(bad)?;
    if tag != TAG_TBS {
        return Err(Error::BadCert("missing to-be-signed object"));
    }
    let tbs_total = tbs_header_len + tbs_value_len;
    if body.len() < tbs_total {
        return Err(Error::BadCert("tlv structure"));
    }
    let tbs = &body[..tbs_total];

    let mut rd = Reader::new(&body[tbs_total..]);
    let sig = rd.read(TAG_SIG).map_err(bad)?;
    rd.finish().map_err(bad)?;

    let mut rd = Reader::new(&tbs[tbs_header_len..]);
    let profile = rd.read(TAG_PROFILE).map_err(bad)?;
    if profile != [PROFILE_VERSION] {
        return Err(Error::BadCert("unsupported profile version"));
    }
    let authority = rd.read(TAG_AUTHORITY).map_err(bad)?;

    let pubkey_do = rd.read(TAG_PUBKEY).map_err(bad)?;
    let mut pk = Reader::new(pubkey_do);
    let oid = pk.read(TAG_OID).map_err(bad)?;
    let level = level_from_oid(oid).ok_or(Error::BadCert("unknown scheme identifier"))?;
    let pubkey = pk.read(TAG_PUBKEY_VALUE).map_err(bad)?;
    pk.finish().map_err(bad)?;
    if pubkey.len() != level.public_key_len() {
        return Err(Error::BadCert("public key length"));
    }

    let holder = rd.read(TAG_HOLDER).map_err(bad)?;

    let mut hat_eid = [0u8; HAT_EID_LEN];
    let mut hat_esign = [0u8; HAT_ESIGN_LEN];
    for (oid_want, out) in [
        (&OID_HAT_EID, &mut hat_eid[..]),
        (&OID_HAT_ESIGN, &mut hat_esign[..]),
    ] {
        let hat_do = rd.read(TAG_HAT).map_err(bad)?;
        let mut hat = Reader::new(hat_do);
        let oid = hat.read(TAG_OID).map_err(bad)?;
        if oid != *oid_want {
            return Err(Error::BadCert("authorization identifier"));
        }
        let mask = hat.read(TAG_HAT_VALUE).map_err(bad)?;
        hat.finish().map_err(bad)?;
        if mask.len() != out.len() {
            return Err(Error::BadCert("authorization mask length"));
        }
        out.copy_from_slice(mask);
    }

    let from = rd.read(TAG_FROM).map_err(bad)?;
    let until = rd.read(TAG_UNTIL).map_err(bad)?;
    rd.finish().map_err(bad)?;
    if from.len() != 6 || until.len() != 6 {
        return Err(Error::BadCert("date length"));
    }

    // Names arrive NUL-padded from fixed-size stores; trim the tail.
    let trim = |raw: &[u8]| -> Result<String> {
        let end = raw.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        let name = core::str::from_utf8(&raw[..end])
            .map_err(|_| Error::BadCert("name encoding"))?;
        if !name_ok(name) {
            return Err(Error::BadCert("name range"));
        }
        Ok(name.to_owned())
    };

    let mut from_digits = [0u8; 6];
    from_digits.copy_from_slice(from);
    let mut until_digits = [0u8; 6];
    until_digits.copy_from_slice(until);

    let fields = CvcFields {
        authority: trim(authority)?,
        holder: trim(holder)?,
        from: Date(from_digits),
        until: Date(until_digits),
        hat_eid,
        hat_esign,
        pubkey: pubkey.to_vec(),
    };
    fields.from.check().map_err(|_| Error::BadCert("date range"))?;
    fields.until.check().map_err(|_| Error::BadCert("date range"))?;
    if fields.from > fields.until {
        return Err(Error::BadCert("validity interval"));
    }

    Ok(Parsed {
        fields,
        level,
        tbs: Bytes::copy_from_slice(tbs),
        sig: Bytes::copy_from_slice(sig),
    })
}

/// Parse a certificate without verifying its signature.
///
/// Used to lift the subject public key out of a self-signed root or a
/// pre-certificate before any trust decision is made.
pub fn unwrap(cert: &[u8]) -> Result<CvcFields> {
    let parsed = parse(cert)?;
    if ![48, 72, 96].contains(&parsed.sig.len()) {
        return Err(Error::BadCert("signature length"));
    }
    Ok(parsed.fields)
}

/// Parse a certificate and verify its signature under `public`.
pub fn unwrap_verified(
    cert: &[u8],
    scheme: &dyn SigScheme,
    public: &[u8],
) -> Result<CvcFields> {
    let parsed = parse(cert)?;
    if parsed.sig.len() != scheme.level().signature_len() {
        return Err(Error::BadCert("signature length"));
    }
    if !scheme.verify(public, &parsed.tbs, &parsed.sig) {
        return Err(Error::BadCert("signature"));
    }
    trace!(holder = %parsed.fields.holder, "CV certificate signature verified");
    Ok(parsed.fields)
}

/// Check that `private` corresponds to the public key embedded in the
/// certificate, by recomputing the public key and comparing in constant
/// time.
pub fn matches(cert: &[u8], scheme: &dyn SigScheme, private: &[u8]) -> Result<()> {
    if private.len() != scheme.level().private_key_len() {
        return Err(Error::BadInput("private key length"));
    }
    let parsed = parse(cert)?;
    if parsed.level != scheme.level() {
        return Err(Error::BadParams("certificate level"));
    }
    let derived = scheme.derive_pub(private)?;
    if derived.len() != parsed.fields.pubkey.len()
        || !bool::from(derived.ct_eq(&parsed.fields.pubkey))
    {
        return Err(Error::BadCert("key mismatch"));
    }
    Ok(())
}

/// Issue a certificate for `subject` under the issuer's certificate and
/// private key.
///
/// Enforces the name chain (`subject.authority == issuer.holder`), the
/// issuer key correspondence, and that the subject level does not exceed
/// the issuer's.
pub fn issue(
    subject: &CvcFields,
    issuer_cert: &[u8],
    scheme: &dyn SigScheme,
    issuer_private: &[u8],
) -> Result<Bytes> {
    subject.check()?;
    matches(issuer_cert, scheme, issuer_private)?;
    let issuer = parse(issuer_cert)?;
    if !names_match(&subject.authority, &issuer.fields.holder) {
        return Err(Error::BadCert("authority chain"));
    }
    if subject.level()?.bits() > issuer.level.bits() {
        return Err(Error::BadParams("subject level above issuer level"));
    }
    wrap(subject, scheme, issuer_private)
}

fn check_window(fields: &CvcFields, now: Option<Date>) -> Result<()> {
    if let Some(now) = now {
        if now < fields.from || now > fields.until {
            return Err(Error::BadCert("outside validity window"));
        }
    }
    Ok(())
}

/// Validate `child` under `parent`: signature, name chain and, when
/// `now` is given, the validity window.
///
/// `scheme` must implement the parent's level. Returns the child fields.
pub fn validate(
    child: &[u8],
    parent: &[u8],
    now: Option<Date>,
    scheme: &dyn SigScheme,
) -> Result<CvcFields> {
    let parent = parse(parent)?;
    if parent.level != scheme.level() {
        return Err(Error::BadParams("parent level"));
    }
    let fields = unwrap_verified(child, scheme, &parent.fields.pubkey)?;
    if !names_match(&fields.authority, &parent.fields.holder) {
        return Err(Error::BadCert("authority chain"));
    }
    check_window(&fields, now)?;
    Ok(fields)
}

/// Validate `child` under already-parsed `parent` fields and require the
/// parsed child to equal `expected`.
pub fn validate_expected(
    expected: &CvcFields,
    child: &[u8],
    parent: &CvcFields,
    now: Option<Date>,
    scheme: &dyn SigScheme,
) -> Result<()> {
    if parent.level()? != scheme.level() {
        return Err(Error::BadParams("parent level"));
    }
    let fields = unwrap_verified(child, scheme, &parent.pubkey)?;
    if !names_match(&fields.authority, &parent.holder) {
        return Err(Error::BadCert("authority chain"));
    }
    check_window(&fields, now)?;
    if fields != *expected {
        return Err(Error::BadCert("fields mismatch"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockScheme;

    fn fields(authority: &str, holder: &str) -> CvcFields {
        CvcFields {
            authority: authority.into(),
            holder: holder.into(),
            from: Date::from_ascii(b"220707").unwrap(),
            until: Date::from_ascii(b"990707").unwrap(),
            hat_eid: [0xEE; HAT_EID_LEN],
            hat_esign: [0x77; HAT_ESIGN_LEN],
            pubkey: Vec::new(),
        }
    }

    #[test]
    fn check_rejects_skeleton_until_key_is_filled() {
        let scheme = MockScheme::new(Level::L256);
        let mut root = fields("BYCA00000000", "BYCA00000000");

        // All-zero key: out of range.
        root.pubkey = vec![0; 128];
        assert!(matches!(root.check(), Err(Error::BadInput(_))));

        let private = scheme.test_private(1);
        root.pubkey = scheme.derive_pub(&private).unwrap();
        root.check().unwrap();
    }

    #[test]
    fn check_rejects_bad_values() {
        let scheme = MockScheme::new(Level::L128);
        let private = scheme.test_private(2);
        let mut f = fields("BYCA0000", "BYCA0000");
        f.pubkey = scheme.derive_pub(&private).unwrap();
        f.check().unwrap();

        let mut bad = f.clone();
        bad.authority = "SHORT".into();
        assert!(bad.check().is_err());

        let mut bad = f.clone();
        bad.holder = "WAYTOOLONGNAME".into();
        assert!(bad.check().is_err());

        let mut bad = f.clone();
        bad.until = Date::from_ascii(b"210101").unwrap();
        assert!(bad.check().is_err());

        let mut bad = f.clone();
        bad.pubkey.pop();
        assert!(bad.check().is_err());

        assert!(Date::from_ascii(b"221301").is_err());
        assert!(Date::from_ascii(b"220100").is_err());
        assert!(Date::from_ascii(b"2201!1").is_err());
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let scheme = MockScheme::new(Level::L256);
        let private = scheme.test_private(3);
        let mut root = fields("BYCA0000", "BYCA0000");
        root.pubkey = scheme.derive_pub(&private).unwrap();

        let cert = wrap(&root, &scheme, &private).unwrap();
        assert_eq!(cert.len(), encoded_len(&root, Level::L256).unwrap());

        let parsed = unwrap(&cert).unwrap();
        assert_eq!(parsed, root);
        let verified = unwrap_verified(&cert, &scheme, &root.pubkey).unwrap();
        assert_eq!(verified, root);

        matches(&cert, &scheme, &private).unwrap();
        let other = scheme.test_private(4);
        assert!(matches(&cert, &scheme, &other).is_err());
    }

    #[test]
    fn wrap_fills_subject_key_from_signer() {
        let scheme = MockScheme::new(Level::L192);
        let private = scheme.test_private(5);
        let root = fields("BYCA0000", "BYCA1000");
        assert!(root.pubkey.is_empty());

        let cert = wrap(&root, &scheme, &private).unwrap();
        let parsed = unwrap(&cert).unwrap();
        assert_eq!(parsed.pubkey, scheme.derive_pub(&private).unwrap());
    }

    #[test]
    fn len_probe_tracks_the_outer_header() {
        let scheme = MockScheme::new(Level::L128);
        let private = scheme.test_private(6);
        let cert = wrap(&fields("BYCA0000", "BYCA0000"), &scheme, &private).unwrap();

        assert_eq!(len(&cert), Some(cert.len()));
        // Trailing bytes beyond the declared length are ignored.
        let mut longer = cert.to_vec();
        longer.push(0xFF);
        assert_eq!(len(&longer), Some(cert.len()));
        // A buffer shorter than the declared length is invalid.
        assert_eq!(len(&cert[..cert.len() - 1]), None);
        assert_eq!(len(&[]), None);
    }

    #[test]
    fn issuance_chain() {
        let s256 = MockScheme::new(Level::L256);
        let s192 = MockScheme::new(Level::L192);
        let s128 = MockScheme::new(Level::L128);

        let root_priv = s256.test_private(7);
        let root = {
            let mut f = fields("BYCA0000", "BYCA0000");
            f.pubkey = s256.derive_pub(&root_priv).unwrap();
            f
        };
        let root_cert = wrap(&root, &s256, &root_priv).unwrap();

        // Pre-certificate: the intermediate self-signs its request.
        let ca_priv = s192.test_private(8);
        let mut ca = fields("BYCA0000", "BYCA1000");
        ca.pubkey = s192.derive_pub(&ca_priv).unwrap();
        let pre = wrap(&ca, &s192, &ca_priv).unwrap();
        let pre_fields = unwrap(&pre).unwrap();
        assert_eq!(pre_fields, ca);
        unwrap_verified(&pre, &s192, &pre_fields.pubkey).unwrap();
        assert_eq!(pre_fields.authority, root.holder);

        // The root issues the real intermediate certificate.
        let ca_cert = issue(&ca, &root_cert, &s256, &root_priv).unwrap();
        validate(&ca_cert, &root_cert, None, &s256).unwrap();

        // The intermediate issues a holder certificate.
        let holder_priv = s128.test_private(9);
        let mut holder = fields("BYCA1000", "590082394654");
        holder.pubkey = s128.derive_pub(&holder_priv).unwrap();
        holder.hat_eid = [0x88; HAT_EID_LEN];
        holder.hat_esign = [0x11; HAT_ESIGN_LEN];
        let holder_cert = issue(&holder, &ca_cert, &s192, &ca_priv).unwrap();

        validate(&holder_cert, &ca_cert, None, &s192).unwrap();
        validate_expected(&holder, &holder_cert, &unwrap(&ca_cert).unwrap(), None, &s192)
            .unwrap();
    }

    #[test]
    fn issue_rejects_bad_issuers() {
        let s192 = MockScheme::new(Level::L192);
        let s256 = MockScheme::new(Level::L256);
        let ca_priv = s192.test_private(10);
        let mut ca = fields("BYCA0000", "BYCA1000");
        ca.pubkey = s192.derive_pub(&ca_priv).unwrap();
        let ca_cert = wrap(&ca, &s192, &ca_priv).unwrap();

        let mut subject = fields("BYCA1000", "590082394654");
        let s128 = MockScheme::new(Level::L128);
        subject.pubkey = s128.derive_pub(&s128.test_private(11)).unwrap();

        // Truncated issuer certificate.
        assert!(issue(&subject, &ca_cert[..ca_cert.len() - 1], &s192, &ca_priv).is_err());
        // Wrong private key length for the scheme.
        let mut long = ca_priv.to_vec();
        long.push(0);
        assert!(issue(&subject, &ca_cert, &s192, &long).is_err());
        // Broken name chain.
        let mut stranger = subject.clone();
        stranger.authority = "BYCA9999".into();
        assert!(matches!(
            issue(&stranger, &ca_cert, &s192, &ca_priv),
            Err(Error::BadCert(_))
        ));
        // Subject level above the issuer's.
        let mut ambitious = subject.clone();
        ambitious.pubkey = s256.derive_pub(&s256.test_private(12)).unwrap();
        assert!(matches!(
            issue(&ambitious, &ca_cert, &s192, &ca_priv),
            Err(Error::BadParams(_))
        ));
    }

    #[test]
    fn validate_enforces_dates_and_chain() {
        let s256 = MockScheme::new(Level::L256);
        let root_priv = s256.test_private(13);
        let mut root = fields("BYCA0000", "BYCA0000");
        root.pubkey = s256.derive_pub(&root_priv).unwrap();
        let root_cert = wrap(&root, &s256, &root_priv).unwrap();

        let child_priv = s256.test_private(14);
        let mut child = fields("BYCA0000", "BYCA1000");
        child.from = Date::from_ascii(b"220712").unwrap();
        child.until = Date::from_ascii(b"391231").unwrap();
        child.pubkey = s256.derive_pub(&child_priv).unwrap();
        let child_cert = issue(&child, &root_cert, &s256, &root_priv).unwrap();

        validate(&child_cert, &root_cert, None, &s256).unwrap();
        let inside = Date::from_ascii(b"230101").unwrap();
        validate(&child_cert, &root_cert, Some(inside), &s256).unwrap();

        // Before the window and after it.
        let early = Date::from_ascii(b"220707").unwrap();
        assert!(matches!(
            validate(&child_cert, &root_cert, Some(early), &s256),
            Err(Error::BadCert(_))
        ));
        let late = Date::from_ascii(b"400101").unwrap();
        assert!(matches!(
            validate(&child_cert, &root_cert, Some(late), &s256),
            Err(Error::BadCert(_))
        ));
    }

    #[test]
    fn tampered_certificates_are_rejected() {
        let scheme = MockScheme::new(Level::L128);
        let private = scheme.test_private(15);
        let mut f = fields("BYCA0000", "BYCA0000");
        f.pubkey = scheme.derive_pub(&private).unwrap();
        let cert = wrap(&f, &scheme, &private).unwrap();

        // Any body flip breaks the signature; header flips break parsing.
        for at in [1usize, 10, cert.len() / 2, cert.len() - 1] {
            let mut bad = cert.to_vec();
            bad[at] ^= 0x01;
            assert!(
                unwrap_verified(&bad, &scheme, &f.pubkey).is_err(),
                "flip at {at} accepted"
            );
        }
        // Truncation is caught structurally.
        assert!(unwrap(&cert[..cert.len() - 2]).is_err());
    }
}
