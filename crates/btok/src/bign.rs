//! Level-128 signature scheme over the bign-curve256v1 group.
//!
//! Backed by the `bign256` crate (STB 34.101.45). Public keys travel in
//! the standard's little-endian `x ‖ y` form, 64 octets; private keys
//! are 32-octet scalars; signatures are 48 octets. The 192- and 256-bit
//! levels have no published Rust curve arithmetic, so they stay behind
//! the [`SigScheme`] seam for callers to supply.

use bign256::{
    dsa::{
        signature::{Signer, Verifier},
        Signature, SigningKey, VerifyingKey,
    },
    PublicKey, SecretKey,
};
use elliptic_curve::ecdh;
use rand_core::CryptoRngCore;
use zeroize::Zeroizing;

use crate::traits::{Level, SigScheme};
use crate::{Error, Result};

/// STB 34.101.45 signature scheme at security level 128.
#[derive(Debug, Default, Clone, Copy)]
pub struct Bign128;

impl Bign128 {
    fn secret_key(&self, private: &[u8]) -> Result<SecretKey> {
        if private.len() != Level::L128.private_key_len() {
            return Err(Error::BadInput("private key length"));
        }
        SecretKey::from_slice(private).map_err(|_| Error::BadParams("private scalar out of range"))
    }

    fn public_key(&self, public: &[u8]) -> Result<PublicKey> {
        if public.len() != Level::L128.public_key_len() {
            return Err(Error::BadInput("public key length"));
        }
        PublicKey::from_bytes(public).map_err(|_| Error::BadParams("point not on curve"))
    }
}

impl SigScheme for Bign128 {
    fn level(&self) -> Level {
        Level::L128
    }

    fn gen_keypair(
        &self,
        mut rng: &mut dyn CryptoRngCore,
    ) -> Result<(Zeroizing<Vec<u8>>, Vec<u8>)> {
        let secret = SecretKey::random(&mut rng);
        let public = secret.public_key().to_bytes().to_vec();
        let private = Zeroizing::new(secret.to_bytes().to_vec());
        Ok((private, public))
    }

    fn derive_pub(&self, private: &[u8]) -> Result<Vec<u8>> {
        let secret = self.secret_key(private)?;
        Ok(secret.public_key().to_bytes().to_vec())
    }

    fn sign(&self, private: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
        let secret = self.secret_key(private)?;
        let key = SigningKey::new(&secret).map_err(|_| Error::BadParams("signing key"))?;
        let sig: Signature = key
            .try_sign(msg)
            .map_err(|_| Error::BadParams("signature generation"))?;
        Ok(sig.to_bytes().to_vec())
    }

    fn verify(&self, public: &[u8], msg: &[u8], sig: &[u8]) -> bool {
        let Ok(key) = self.public_key(public).and_then(|pk| {
            VerifyingKey::new(pk).map_err(|_| Error::BadParams("verifying key"))
        }) else {
            return false;
        };
        let Ok(sig) = Signature::try_from(sig) else {
            return false;
        };
        key.verify(msg, &sig).is_ok()
    }

    fn dh(&self, private: &[u8], public: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let secret = self.secret_key(private)?;
        let public = self.public_key(public)?;
        let shared = ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
        Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
    }

    fn validate_pubkey(&self, public: &[u8]) -> bool {
        self.public_key(public).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn keypair_signs_and_verifies() {
        let scheme = Bign128;
        let mut rng = StdRng::seed_from_u64(7);
        let (private, public) = scheme.gen_keypair(&mut rng).unwrap();
        assert_eq!(private.len(), 32);
        assert_eq!(public.len(), 64);
        assert_eq!(scheme.derive_pub(&private).unwrap(), public);

        let sig = scheme.sign(&private, b"attested bytes").unwrap();
        assert_eq!(sig.len(), Level::L128.signature_len());
        assert!(scheme.verify(&public, b"attested bytes", &sig));
        assert!(!scheme.verify(&public, b"attested bytez", &sig));

        let mut bad = sig.clone();
        bad[0] ^= 1;
        assert!(!scheme.verify(&public, b"attested bytes", &bad));
    }

    #[test]
    fn dh_commutes() {
        let scheme = Bign128;
        let mut rng = StdRng::seed_from_u64(8);
        let (da, qa) = scheme.gen_keypair(&mut rng).unwrap();
        let (db, qb) = scheme.gen_keypair(&mut rng).unwrap();
        let zab = scheme.dh(&da, &qb).unwrap();
        let zba = scheme.dh(&db, &qa).unwrap();
        assert_eq!(zab.as_slice(), zba.as_slice());
    }

    #[test]
    fn rejects_malformed_keys() {
        let scheme = Bign128;
        assert!(scheme.derive_pub(&[0u8; 31]).is_err());
        assert!(!scheme.validate_pubkey(&[0u8; 64]));
        assert!(!scheme.validate_pubkey(&[0u8; 63]));
    }
}
