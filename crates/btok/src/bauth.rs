//! BAUTH: authenticated key agreement between a terminal and a
//! card-terminal.
//!
//! Five steps over three transit messages, driven as a strict state
//! machine. Let `U` be the ephemeral public keys, `d`/`Q` the long-term
//! pairs, and `Z1 = DH(u_T, U_CT)`, `Z2 = DH(d_T, U_CT)`,
//! `Z3 = DH(d_CT, U_T)` the shared points:
//!
//! ```text
//! CT -> T   M2 = U_CT ‖ tag2                (tag2 present when the
//!                                            terminal certificate is
//!                                            pinned; keyed off Q_T)
//! T  -> CT  M3 = U_T ‖ tag_T ‖ E(cert_T)    (cryptogram when kca; the
//!                                            confirmation key folds in
//!                                            Z2, so tag_T proves d_T)
//! CT -> T   M4 = tag_CT ‖ cert_CT           (present when kcb; the
//!                                            confirmation key folds in
//!                                            Z3, so tag_CT proves d_CT)
//! ```
//!
//! Every transmitted byte enters a running transcript; the session key
//! is derived from the transcript hash, so a single transit bit flip
//! leaves the endpoints with diverging keys or a failed confirmation
//! tag. Any error, including an out-of-order call, parks the state in a
//! terminal failure.

use rand_core::CryptoRngCore;
use subtle::ConstantTimeEq;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::sm::Role;
use crate::traits::{CertValidator, SigScheme, Suite};
use crate::{Error, Result};

const TAG_LEN: usize = 8;
/// Length of the agreed session key.
pub const KEY_LEN: usize = 32;

const INFO_M2: &[u8] = b"btok bauth m2";
const INFO_WRAP: &[u8] = b"btok bauth wrap";
const INFO_SEED: &[u8] = b"btok bauth seed";
const INFO_CONFIRM_T: &[u8] = b"btok bauth confirm";
const INFO_CONFIRM_CT: &[u8] = b"btok bauth confirm ct";
const INFO_KEY: &[u8] = b"btok bauth key";

const LABEL_M2: &[u8] = b"bauth m2";
const LABEL_KCA: &[u8] = b"bauth kca";
const LABEL_KCB: &[u8] = b"bauth kcb";

/// Protocol settings, fixed at start and identical on both sides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BauthSettings {
    /// Authenticate the terminal to the card-terminal; requires the
    /// terminal certificate pinned at step 2 and shipped in M3.
    pub kca: bool,
    /// Authenticate the card-terminal to the terminal; adds M4.
    pub kcb: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Ready,
    AwaitM2,
    AwaitM3,
    AwaitM4,
    Done,
    Failed,
}

/// Protocol state for one endpoint.
///
/// Long-term and ephemeral private scalars and the derived seed are
/// zeroized when the state drops, on success or failure alike.
pub struct BauthState<'a> {
    role: Role,
    scheme: &'a dyn SigScheme,
    suite: Suite<'a>,
    settings: BauthSettings,
    private: Zeroizing<Vec<u8>>,
    own_cert: Vec<u8>,
    eph_private: Zeroizing<Vec<u8>>,
    eph_public: Vec<u8>,
    /// Pinned terminal certificate and its public key (card-terminal).
    pin: Option<(Vec<u8>, Vec<u8>)>,
    seed: Zeroizing<Vec<u8>>,
    transcript: Vec<u8>,
    stage: Stage,
}

impl core::fmt::Debug for BauthState<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BauthState")
            .field("role", &self.role)
            .field("stage", &self.stage)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<'a> BauthState<'a> {
    /// Initialize an endpoint: store the long-term key and certificate,
    /// draw the ephemeral pair from the injected randomness source.
    pub fn start(
        role: Role,
        scheme: &'a dyn SigScheme,
        suite: Suite<'a>,
        settings: BauthSettings,
        private: &[u8],
        own_cert: &[u8],
        rng: &mut dyn CryptoRngCore,
    ) -> Result<Self> {
        if private.len() != scheme.level().private_key_len() {
            return Err(Error::BadInput("private key length"));
        }
        if own_cert.is_empty() {
            return Err(Error::BadInput("own certificate"));
        }
        let (eph_private, eph_public) = scheme.gen_keypair(rng)?;
        debug!(?role, ?settings, "bauth state initialized");
        Ok(Self {
            role,
            scheme,
            suite,
            settings,
            private: Zeroizing::new(private.to_vec()),
            own_cert: own_cert.to_vec(),
            eph_private,
            eph_public,
            pin: None,
            seed: Zeroizing::new(Vec::new()),
            transcript: Vec::new(),
            stage: match role {
                Role::Terminal => Stage::AwaitM2,
                Role::CardTerminal => Stage::Ready,
            },
        })
    }

    /// Endpoint role.
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Whether the protocol has completed on this endpoint.
    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    fn expect(&self, role: Role, stage: Stage) -> Result<()> {
        if self.role != role || self.stage != stage {
            return Err(Error::BadLogic("protocol step out of order"));
        }
        Ok(())
    }

    fn kdf(&self, ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        let mut out = Zeroizing::new([0u8; 32]);
        self.suite.kdf.derive(ikm, salt, info, out.as_mut())?;
        Ok(out)
    }

    /// MAC key for the M2 hello tag, derived from the terminal public
    /// key.
    fn m2_key(&self, terminal_public: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        self.kdf(terminal_public, &[], INFO_M2)
    }

    fn derive_seed(&mut self, z1: &[u8], z2: Option<&[u8]>) -> Result<()> {
        let mut ikm = Zeroizing::new(z1.to_vec());
        if let Some(z2) = z2 {
            ikm.extend_from_slice(z2);
        }
        let seed = self.kdf(&ikm, &[], INFO_SEED)?;
        self.seed = Zeroizing::new(seed.to_vec());
        Ok(())
    }

    /// Confirmation tag for M3, proving knowledge of the seed (and of
    /// `d_T` through `Z2` when the terminal authenticates).
    fn terminal_tag(&self, h3: &[u8; 32]) -> Result<[u8; TAG_LEN]> {
        let key = self.kdf(&self.seed, h3, INFO_CONFIRM_T)?;
        Ok(self.suite.mac.compute(&key, LABEL_KCA))
    }

    /// Confirmation tag for M4, proving knowledge of `d_CT` through
    /// `Z3`.
    fn card_terminal_tag(&self, z3: &[u8], h4: &[u8; 32]) -> Result<[u8; TAG_LEN]> {
        let mut ikm = Zeroizing::new(z3.to_vec());
        ikm.extend_from_slice(&self.seed);
        let key = self.kdf(&ikm, h4, INFO_CONFIRM_CT)?;
        Ok(self.suite.mac.compute(&key, LABEL_KCB))
    }

    fn cert_cryptogram(&self, z1: &[u8], terminal_eph: &[u8], cert: &mut [u8]) -> Result<()> {
        // Keyed per session: the salt binds both ephemerals, the key is
        // used once, so the zero IV is fine.
        let mut salted = self.transcript.clone();
        salted.extend_from_slice(terminal_eph);
        let salt = self.suite.hash.digest(&salted);
        let key = self.kdf(z1, &salt, INFO_WRAP)?;
        self.suite.cipher.ctr_apply(&key, &[0u8; 16], cert);
        Ok(())
    }

    /// Card-terminal step 2: emit M2.
    ///
    /// `terminal_cert` pins the certificate the terminal must later
    /// present (mandatory when `kca`); its public key is extracted
    /// through `validator`.
    pub fn step2(
        &mut self,
        terminal_cert: Option<&[u8]>,
        validator: &dyn CertValidator,
    ) -> Result<Vec<u8>> {
        match self.step2_inner(terminal_cert, validator) {
            Ok(m2) => Ok(m2),
            Err(err) => {
                self.stage = Stage::Failed;
                Err(err)
            }
        }
    }

    fn step2_inner(
        &mut self,
        terminal_cert: Option<&[u8]>,
        validator: &dyn CertValidator,
    ) -> Result<Vec<u8>> {
        self.expect(Role::CardTerminal, Stage::Ready)?;
        if self.settings.kca && terminal_cert.is_none() {
            return Err(Error::BadInput("terminal certificate required"));
        }

        let mut m2 = self.eph_public.clone();
        if let Some(cert) = terminal_cert {
            let public = validator.validate(cert)?;
            if public.len() != self.scheme.level().public_key_len()
                || !self.scheme.validate_pubkey(&public)
            {
                return Err(Error::BadCert("terminal public key"));
            }
            let key = self.m2_key(&public)?;
            let mut msg = self.eph_public.clone();
            msg.extend_from_slice(LABEL_M2);
            m2.extend_from_slice(&self.suite.mac.compute(&key, &msg));
            self.pin = Some((cert.to_vec(), public));
        }

        self.transcript.extend_from_slice(&m2);
        self.stage = Stage::AwaitM3;
        trace!(len = m2.len(), "M2 emitted");
        Ok(m2)
    }

    /// Terminal step 3: consume M2, emit M3.
    pub fn step3(&mut self, m2: &[u8]) -> Result<Vec<u8>> {
        match self.step3_inner(m2) {
            Ok(m3) => Ok(m3),
            Err(err) => {
                self.stage = Stage::Failed;
                Err(err)
            }
        }
    }

    fn step3_inner(&mut self, m2: &[u8]) -> Result<Vec<u8>> {
        self.expect(Role::Terminal, Stage::AwaitM2)?;
        let point_len = self.scheme.level().public_key_len();
        let expected = point_len + if self.settings.kca { TAG_LEN } else { 0 };
        if m2.len() != expected {
            return Err(Error::BadInput("message 2 length"));
        }

        let peer_eph = &m2[..point_len];
        if !self.scheme.validate_pubkey(peer_eph) {
            return Err(Error::BadParams("peer ephemeral key"));
        }
        if self.settings.kca {
            let own_public = self.scheme.derive_pub(&self.private)?;
            let key = self.m2_key(&own_public)?;
            let mut msg = peer_eph.to_vec();
            msg.extend_from_slice(LABEL_M2);
            let tag = self.suite.mac.compute(&key, &msg);
            if !bool::from(tag.ct_eq(&m2[point_len..])) {
                return Err(Error::BadMac);
            }
        }

        self.transcript.extend_from_slice(m2);

        let z1 = self.scheme.dh(&self.eph_private, peer_eph)?;
        let z2 = if self.settings.kca {
            Some(self.scheme.dh(&self.private, peer_eph)?)
        } else {
            None
        };
        self.derive_seed(&z1, z2.as_ref().map(|z| z.as_slice()))?;

        let mut ect = Vec::new();
        if self.settings.kca {
            ect = self.own_cert.clone();
            self.cert_cryptogram(&z1, &self.eph_public, &mut ect)?;
        }

        let mut h3_input = self.transcript.clone();
        h3_input.extend_from_slice(&self.eph_public);
        h3_input.extend_from_slice(&ect);
        let h3 = self.suite.hash.digest(&h3_input);
        let tag = self.terminal_tag(&h3)?;

        let mut m3 = self.eph_public.clone();
        m3.extend_from_slice(&tag);
        m3.extend_from_slice(&ect);
        self.transcript.extend_from_slice(&m3);

        self.stage = if self.settings.kcb {
            Stage::AwaitM4
        } else {
            Stage::Done
        };
        trace!(len = m3.len(), "M3 emitted");
        Ok(m3)
    }

    /// Card-terminal step 4: consume M3; emit M4 when `kcb` is set.
    pub fn step4(&mut self, m3: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.step4_inner(m3) {
            Ok(m4) => Ok(m4),
            Err(err) => {
                self.stage = Stage::Failed;
                Err(err)
            }
        }
    }

    fn step4_inner(&mut self, m3: &[u8]) -> Result<Option<Vec<u8>>> {
        self.expect(Role::CardTerminal, Stage::AwaitM3)?;
        let point_len = self.scheme.level().public_key_len();
        let pinned_len = self.pin.as_ref().map_or(0, |(cert, _)| cert.len());
        let cert_len = if self.settings.kca { pinned_len } else { 0 };
        if m3.len() != point_len + TAG_LEN + cert_len {
            return Err(Error::BadInput("message 3 length"));
        }

        let peer_eph = &m3[..point_len];
        if !self.scheme.validate_pubkey(peer_eph) {
            return Err(Error::BadParams("peer ephemeral key"));
        }
        let tag = &m3[point_len..point_len + TAG_LEN];
        let ect = &m3[point_len + TAG_LEN..];

        let z1 = self.scheme.dh(&self.eph_private, peer_eph)?;
        let z2 = if self.settings.kca {
            let mut cert = ect.to_vec();
            self.cert_cryptogram(&z1, peer_eph, &mut cert)?;
            let (pinned, public) = self.pin.as_ref().ok_or(Error::BadLogic(
                "terminal certificate was not pinned",
            ))?;
            if cert.len() != pinned.len() || !bool::from(cert.ct_eq(pinned)) {
                return Err(Error::BadCert("terminal certificate mismatch"));
            }
            Some(self.scheme.dh(&self.eph_private, public)?)
        } else {
            None
        };
        self.derive_seed(&z1, z2.as_ref().map(|z| z.as_slice()))?;

        let mut h3_input = self.transcript.clone();
        h3_input.extend_from_slice(peer_eph);
        h3_input.extend_from_slice(ect);
        let h3 = self.suite.hash.digest(&h3_input);
        let expected = self.terminal_tag(&h3)?;
        if !bool::from(expected.ct_eq(tag)) {
            return Err(Error::BadMac);
        }

        self.transcript.extend_from_slice(m3);

        if !self.settings.kcb {
            self.stage = Stage::Done;
            return Ok(None);
        }

        let z3 = self.scheme.dh(&self.private, peer_eph)?;
        let h4 = self.suite.hash.digest(&self.transcript);
        let tag = self.card_terminal_tag(&z3, &h4)?;
        let mut m4 = tag.to_vec();
        m4.extend_from_slice(&self.own_cert);
        self.transcript.extend_from_slice(&m4);

        self.stage = Stage::Done;
        trace!(len = m4.len(), "M4 emitted");
        Ok(Some(m4))
    }

    /// Terminal step 5: consume M4, validating the card-terminal
    /// certificate through the caller-supplied hook. Required exactly
    /// when `kcb` is set.
    pub fn step5(&mut self, m4: &[u8], validator: &dyn CertValidator) -> Result<()> {
        match self.step5_inner(m4, validator) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.stage = Stage::Failed;
                Err(err)
            }
        }
    }

    fn step5_inner(&mut self, m4: &[u8], validator: &dyn CertValidator) -> Result<()> {
        self.expect(Role::Terminal, Stage::AwaitM4)?;
        if m4.len() <= TAG_LEN {
            return Err(Error::BadInput("message 4 length"));
        }
        let tag = &m4[..TAG_LEN];
        let cert = &m4[TAG_LEN..];

        let public = validator.validate(cert)?;
        if public.len() != self.scheme.level().public_key_len()
            || !self.scheme.validate_pubkey(&public)
        {
            return Err(Error::BadCert("card-terminal public key"));
        }

        let z3 = self.scheme.dh(&self.eph_private, &public)?;
        let h4 = self.suite.hash.digest(&self.transcript);
        let expected = self.card_terminal_tag(&z3, &h4)?;
        if !bool::from(expected.ct_eq(tag)) {
            return Err(Error::BadMac);
        }

        self.transcript.extend_from_slice(m4);
        self.stage = Stage::Done;
        trace!("M4 verified");
        Ok(())
    }

    /// Extract the agreed session key; permitted only once the state
    /// reaches `Done`.
    pub fn session_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        if self.stage != Stage::Done {
            return Err(Error::BadLogic("key agreement incomplete"));
        }
        let h = self.suite.hash.digest(&self.transcript);
        self.kdf(&self.seed, &h, INFO_KEY)
    }
}
