//! Default symmetric suite over the belt (STB 34.101.31) primitives.
//!
//! The block cipher, MAC and hash come straight from the RustCrypto
//! `belt-block`, `belt-mac` and `belt-hash` crates; the only glue written
//! here is the CTR driver, which turns the block primitive into the
//! counter-mode keystream the secure-messaging layer consumes, and the
//! HKDF binding for the key-derivation capability.

use belt_block::BeltBlock;
use belt_hash::{digest::Digest, BeltHash};
use belt_mac::{BeltMac, Mac as _};
use cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use hkdf::Hkdf;

use crate::traits::{Cipher, Hash, Kdf, Mac, Suite};
use crate::{Error, Result};

/// belt-CTR keystream over [`BeltBlock`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BeltCipher;

/// belt MAC with a 64-bit tag.
#[derive(Debug, Default, Clone, Copy)]
pub struct BeltTag;

/// belt hash with a 256-bit digest.
#[derive(Debug, Default, Clone, Copy)]
pub struct BeltDigest;

/// HKDF over the belt hash.
#[derive(Debug, Default, Clone, Copy)]
pub struct BeltKdf;

/// The default suite bundle.
pub const fn suite() -> Suite<'static> {
    Suite {
        cipher: &BeltCipher,
        mac: &BeltTag,
        hash: &BeltDigest,
        kdf: &BeltKdf,
    }
}

impl Cipher for BeltCipher {
    fn ctr_apply(&self, key: &[u8; 32], iv: &[u8; 16], buf: &mut [u8]) {
        let cipher = BeltBlock::new(key.into());

        // s <- F(iv); each keystream block is F(s + i), the counter
        // incremented as a little-endian 128-bit word.
        let mut counter = GenericArray::clone_from_slice(iv);
        cipher.encrypt_block(&mut counter);

        for chunk in buf.chunks_mut(16) {
            for byte in counter.iter_mut() {
                *byte = byte.wrapping_add(1);
                if *byte != 0 {
                    break;
                }
            }
            let mut gamma = counter;
            cipher.encrypt_block(&mut gamma);
            for (b, g) in chunk.iter_mut().zip(gamma.iter()) {
                *b ^= g;
            }
        }
    }
}

impl Mac for BeltTag {
    fn compute(&self, key: &[u8; 32], msg: &[u8]) -> [u8; 8] {
        let mut mac = <BeltMac as belt_mac::Mac>::new(key.into());
        mac.update(msg);
        let full = mac.finalize().into_bytes();
        let mut tag = [0u8; 8];
        tag.copy_from_slice(&full[..8]);
        tag
    }
}

impl Hash for BeltDigest {
    fn digest(&self, msg: &[u8]) -> [u8; 32] {
        BeltHash::digest(msg).into()
    }
}

impl Kdf for BeltKdf {
    fn derive(&self, ikm: &[u8], salt: &[u8], info: &[u8], out: &mut [u8]) -> Result<()> {
        let salt = if salt.is_empty() { None } else { Some(salt) };
        Hkdf::<BeltHash>::new(salt, ikm)
            .expand(info, out)
            .map_err(|_| Error::BadParams("kdf output length"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const KEY: [u8; 32] = hex!("E9DEE72C8F0C0FA62DDB49F46F739647 06075316ED247A3739CBA38303A98BF6");
    const IV: [u8; 16] = hex!("BE32971343FC9A48A02A885F194B09A1");

    #[test]
    fn ctr_is_an_involution() {
        let plain = b"counter mode keystream".to_vec();
        let mut buf = plain.clone();
        suite().cipher.ctr_apply(&KEY, &IV, &mut buf);
        assert_ne!(buf, plain);
        suite().cipher.ctr_apply(&KEY, &IV, &mut buf);
        assert_eq!(buf, plain);
    }

    #[test]
    fn ctr_keystream_depends_on_iv() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        let mut iv2 = IV;
        iv2[15] ^= 1;
        suite().cipher.ctr_apply(&KEY, &IV, &mut a);
        suite().cipher.ctr_apply(&KEY, &iv2, &mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn mac_separates_keys_and_messages() {
        let mac = suite().mac;
        let tag = mac.compute(&KEY, b"message");
        assert_eq!(tag, mac.compute(&KEY, b"message"));
        assert_ne!(tag, mac.compute(&KEY, b"messagf"));
        let mut other = KEY;
        other[0] ^= 1;
        assert_ne!(tag, mac.compute(&other, b"message"));
    }

    #[test]
    fn kdf_is_deterministic_and_label_separated() {
        let kdf = suite().kdf;
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        kdf.derive(&KEY, &IV, b"label one", &mut a).unwrap();
        kdf.derive(&KEY, &IV, b"label one", &mut b).unwrap();
        assert_eq!(a, b);
        kdf.derive(&KEY, &IV, b"label two", &mut b).unwrap();
        assert_ne!(a, b);
    }
}
