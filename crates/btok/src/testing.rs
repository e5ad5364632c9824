//! Deterministic signature-scheme double for tests.
//!
//! Levels 192 and 256 have no Rust curve arithmetic to back them, so the
//! codec and protocol tests run against this stand-in: public keys are an
//! invertible expansion of the private scalar, signatures are keyed belt
//! hashes, and the shared secret is symmetric in the two key pairs. None
//! of it is cryptography; all of it is deterministic and
//! length-faithful.

use belt_hash::{digest::Digest, BeltHash};
use rand_core::CryptoRngCore;
use zeroize::Zeroizing;

use crate::traits::{Level, SigScheme};
use crate::{Error, Result};

const EXPAND_MASK: u8 = 0x5C;

pub(crate) struct MockScheme {
    level: Level,
}

impl MockScheme {
    pub(crate) fn new(level: Level) -> Self {
        Self { level }
    }

    /// Deterministic private key for a test index.
    pub(crate) fn test_private(&self, index: u8) -> Vec<u8> {
        (0..self.level.private_key_len())
            .map(|i| index.wrapping_mul(37).wrapping_add(i as u8) | 1)
            .collect()
    }

    fn recover(&self, public: &[u8]) -> Result<Vec<u8>> {
        if public.len() != self.level.public_key_len() {
            return Err(Error::BadInput("public key length"));
        }
        Ok(public[..self.level.private_key_len()]
            .iter()
            .enumerate()
            .map(|(i, &b)| b ^ EXPAND_MASK ^ i as u8)
            .collect())
    }

    fn keyed_digest(&self, private: &[u8], msg: &[u8], out_len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(out_len);
        let mut round = 0u8;
        while out.len() < out_len {
            let mut hasher = BeltHash::new();
            hasher.update([round]);
            hasher.update(private);
            hasher.update(msg);
            out.extend_from_slice(&hasher.finalize());
            round += 1;
        }
        out.truncate(out_len);
        out
    }
}

impl SigScheme for MockScheme {
    fn level(&self) -> Level {
        self.level
    }

    fn gen_keypair(
        &self,
        rng: &mut dyn CryptoRngCore,
    ) -> Result<(Zeroizing<Vec<u8>>, Vec<u8>)> {
        let mut private = Zeroizing::new(vec![0u8; self.level.private_key_len()]);
        rng.try_fill_bytes(&mut private)
            .map_err(|_| Error::BadEntropy)?;
        // Zero scalars are out of range; nudge instead of redrawing so
        // seeded test runs stay reproducible.
        if private.iter().all(|&b| b == 0) {
            private[0] = 1;
        }
        let public = self.derive_pub(&private)?;
        Ok((private, public))
    }

    fn derive_pub(&self, private: &[u8]) -> Result<Vec<u8>> {
        if private.len() != self.level.private_key_len() {
            return Err(Error::BadInput("private key length"));
        }
        let n = private.len();
        Ok((0..self.level.public_key_len())
            .map(|i| private[i % n] ^ EXPAND_MASK ^ i as u8)
            .collect())
    }

    fn sign(&self, private: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
        if private.len() != self.level.private_key_len() {
            return Err(Error::BadInput("private key length"));
        }
        Ok(self.keyed_digest(private, msg, self.level.signature_len()))
    }

    fn verify(&self, public: &[u8], msg: &[u8], sig: &[u8]) -> bool {
        let Ok(private) = self.recover(public) else {
            return false;
        };
        sig.len() == self.level.signature_len()
            && sig == self.keyed_digest(&private, msg, self.level.signature_len()).as_slice()
    }

    fn dh(&self, private: &[u8], public: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if private.len() != self.level.private_key_len() {
            return Err(Error::BadInput("private key length"));
        }
        let peer = self.recover(public)?;
        let (lo, hi) = if private <= peer.as_slice() {
            (private, peer.as_slice())
        } else {
            (peer.as_slice(), private)
        };
        let mut joined = Vec::with_capacity(lo.len() + hi.len());
        joined.extend_from_slice(lo);
        joined.extend_from_slice(hi);
        Ok(Zeroizing::new(self.keyed_digest(
            &joined,
            b"dh",
            self.level.private_key_len(),
        )))
    }

    fn validate_pubkey(&self, public: &[u8]) -> bool {
        public.len() == self.level.public_key_len() && public.iter().any(|&b| b != 0)
    }
}
