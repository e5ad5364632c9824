//! Capability traits for the cryptographic primitives the core consumes.
//!
//! The protocol layers never name an algorithm directly; they are handed
//! a [`Suite`] of symmetric capabilities and a [`SigScheme`] and drive
//! everything through dynamic dispatch. The default belt/bign-backed
//! implementations live in [`crate::belt`] and [`crate::bign`].

use rand_core::CryptoRngCore;
use zeroize::Zeroizing;

use crate::Result;

/// Security level of a signature scheme, in bits.
///
/// The level fixes every key and signature length used by the
/// certificate format: private keys are `bits/4` octets, public keys
/// `bits/2`, signatures `3·bits/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// 128-bit security, bign-curve256v1.
    L128,
    /// 192-bit security, bign-curve384v1.
    L192,
    /// 256-bit security, bign-curve512v1.
    L256,
}

impl Level {
    /// Security parameter in bits.
    pub const fn bits(self) -> usize {
        match self {
            Self::L128 => 128,
            Self::L192 => 192,
            Self::L256 => 256,
        }
    }

    /// Private-key length in octets.
    pub const fn private_key_len(self) -> usize {
        self.bits() / 4
    }

    /// Public-key length in octets (two field elements).
    pub const fn public_key_len(self) -> usize {
        self.bits() / 2
    }

    /// Signature length in octets.
    pub const fn signature_len(self) -> usize {
        3 * self.bits() / 8
    }

    /// Level matching a public-key length, if any.
    pub const fn from_public_key_len(len: usize) -> Option<Self> {
        match len {
            64 => Some(Self::L128),
            96 => Some(Self::L192),
            128 => Some(Self::L256),
            _ => None,
        }
    }

    /// Level matching a private-key length, if any.
    pub const fn from_private_key_len(len: usize) -> Option<Self> {
        match len {
            32 => Some(Self::L128),
            48 => Some(Self::L192),
            64 => Some(Self::L256),
            _ => None,
        }
    }
}

/// Symmetric cipher capability: belt-CTR keystream application.
///
/// Encryption and decryption are the same operation.
pub trait Cipher {
    /// XOR the keystream for `(key, iv)` into `buf` in place.
    fn ctr_apply(&self, key: &[u8; 32], iv: &[u8; 16], buf: &mut [u8]);
}

/// Message-authentication capability with a 64-bit tag.
pub trait Mac {
    /// Compute the tag of `msg` under `key`.
    fn compute(&self, key: &[u8; 32], msg: &[u8]) -> [u8; 8];
}

/// Hash capability with a 256-bit digest.
pub trait Hash {
    /// Digest `msg`.
    fn digest(&self, msg: &[u8]) -> [u8; 32];
}

/// Key-derivation capability.
pub trait Kdf {
    /// Fill `out` with key material derived from `(ikm, salt, info)`.
    fn derive(&self, ikm: &[u8], salt: &[u8], info: &[u8], out: &mut [u8]) -> Result<()>;
}

/// Signature scheme over an elliptic-curve group at a fixed [`Level`].
///
/// Keys, signatures and shared secrets cross this boundary as plain
/// octet strings in the scheme's native encoding; private material is
/// wrapped in [`Zeroizing`].
pub trait SigScheme {
    /// Security level of the scheme.
    fn level(&self) -> Level;

    /// Generate a key pair with the injected randomness source.
    ///
    /// The private scalar is drawn from `[1, q-1]`; out-of-range
    /// candidates are rejected and redrawn.
    fn gen_keypair(&self, rng: &mut dyn CryptoRngCore)
        -> Result<(Zeroizing<Vec<u8>>, Vec<u8>)>;

    /// Recompute the public key of `private`.
    fn derive_pub(&self, private: &[u8]) -> Result<Vec<u8>>;

    /// Sign `msg` under `private`.
    fn sign(&self, private: &[u8], msg: &[u8]) -> Result<Vec<u8>>;

    /// Verify `sig` over `msg` under `public`.
    fn verify(&self, public: &[u8], msg: &[u8], sig: &[u8]) -> bool;

    /// Diffie-Hellman: the x-coordinate of `private · public`.
    fn dh(&self, private: &[u8], public: &[u8]) -> Result<Zeroizing<Vec<u8>>>;

    /// Whether `public` encodes a valid non-identity group element.
    fn validate_pubkey(&self, public: &[u8]) -> bool;
}

/// Certificate trust hook injected by the caller.
///
/// Given an opaque certificate byte string, returns the subject public
/// key when the certificate is acceptable.
pub trait CertValidator {
    /// Validate `cert` and extract the subject public key.
    fn validate(&self, cert: &[u8]) -> Result<Vec<u8>>;
}

impl<F> CertValidator for F
where
    F: Fn(&[u8]) -> Result<Vec<u8>>,
{
    fn validate(&self, cert: &[u8]) -> Result<Vec<u8>> {
        self(cert)
    }
}

/// Bundle of symmetric capabilities handed to the protocol layers.
#[derive(Clone, Copy)]
pub struct Suite<'a> {
    /// CTR-mode cipher.
    pub cipher: &'a dyn Cipher,
    /// 64-bit MAC.
    pub mac: &'a dyn Mac,
    /// 256-bit hash.
    pub hash: &'a dyn Hash,
    /// Key derivation.
    pub kdf: &'a dyn Kdf,
}
