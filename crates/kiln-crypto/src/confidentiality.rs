//! AES-CBC-128 payload confidentiality.
//!
//! Encrypted payloads are laid out as a 16-byte IV followed by CBC
//! ciphertext. The plaintext carries confidentiality padding of
//! 0x01, 0x02, … followed by a pad-count byte, sized so the padded length
//! is a whole number of cipher blocks. The cipher key is the first 16 bytes
//! of K2.

use aes::Aes128;
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroizing;

use crate::{CryptoError, CryptoResult, rng};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

const BLOCK_LEN: usize = 16;
const KEY_LEN: usize = 16;

/// Confidentiality algorithm identifiers (IPMI 2.0 table 13-19).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConfidentialityAlgorithm {
    AesCbc128 = 0x01,
}

impl ConfidentialityAlgorithm {
    /// Decodes the 6-bit algorithm field of an Open Session request,
    /// returning `None` for anything outside the supported set.
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::AesCbc128),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A session's installed confidentiality state.
#[derive(Debug)]
pub struct CryptContext {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl CryptContext {
    /// Builds the context from K2; only the first 16 bytes key the cipher.
    pub fn new(k2: &[u8]) -> CryptoResult<Self> {
        if k2.len() < KEY_LEN {
            return Err(CryptoError::KeyTooShort(k2.len()));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&k2[..KEY_LEN]);
        Ok(Self {
            key: Zeroizing::new(key),
        })
    }

    /// Encrypts a payload under a fresh random IV. Returns IV ‖ ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        self.encrypt_with_iv(rng::random_bytes(), plaintext)
    }

    fn encrypt_with_iv(&self, iv: [u8; BLOCK_LEN], plaintext: &[u8]) -> Vec<u8> {
        let mut padded = plaintext.to_vec();
        let overhang = (padded.len() + 1) % BLOCK_LEN;
        let pad_len = if overhang == 0 {
            0
        } else {
            BLOCK_LEN - overhang
        };
        // Pad bytes count up from 1 so the receiver can validate them.
        for n in 1..=pad_len {
            padded.push(n as u8);
        }
        padded.push(pad_len as u8);

        let cipher = Aes128CbcEnc::new((&*self.key).into(), &iv.into());
        let ciphertext = cipher.encrypt_padded_vec_mut::<NoPadding>(&padded);

        let mut out = Vec::with_capacity(BLOCK_LEN + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Decrypts an IV ‖ ciphertext payload and strips the confidentiality
    /// padding.
    pub fn decrypt(&self, payload: &[u8]) -> CryptoResult<Vec<u8>> {
        if payload.len() < 2 * BLOCK_LEN {
            return Err(CryptoError::MalformedCiphertext("shorter than IV + one block"));
        }
        let (iv, ciphertext) = payload.split_at(BLOCK_LEN);
        if ciphertext.len() % BLOCK_LEN != 0 {
            return Err(CryptoError::MalformedCiphertext("partial cipher block"));
        }

        let iv: [u8; BLOCK_LEN] = iv.try_into().expect("split at BLOCK_LEN");
        let cipher = Aes128CbcDec::new((&*self.key).into(), &iv.into());
        let mut plaintext = cipher
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .map_err(|_| CryptoError::MalformedCiphertext("unpad failure"))?;

        let pad_len = usize::from(*plaintext.last().expect("at least one block"));
        if pad_len >= BLOCK_LEN || pad_len + 1 > plaintext.len() {
            return Err(CryptoError::MalformedCiphertext("pad count out of range"));
        }
        // The pad bytes count up from 1; anything else is corruption.
        let data_len = plaintext.len() - pad_len - 1;
        for (i, &byte) in plaintext[data_len..data_len + pad_len].iter().enumerate() {
            if byte != (i + 1) as u8 {
                return Err(CryptoError::MalformedCiphertext("bad pad byte"));
            }
        }
        plaintext.truncate(data_len);
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> CryptContext {
        CryptContext::new(&[0x7E; 20]).unwrap()
    }

    #[test]
    fn key_must_cover_cipher_width() {
        assert_eq!(
            CryptContext::new(&[0u8; 8]).unwrap_err(),
            CryptoError::KeyTooShort(8)
        );
        assert!(CryptContext::new(&[0u8; 16]).is_ok());
        // K2 from SHA-256 is 32 bytes; only the first 16 key the cipher.
        assert!(CryptContext::new(&[0u8; 32]).is_ok());
    }

    #[test]
    fn roundtrip_various_lengths() {
        let ctx = context();
        for len in [0usize, 1, 15, 16, 17, 31, 32, 100, 255] {
            let plaintext: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let sealed = ctx.encrypt(&plaintext);
            assert_eq!(sealed.len() % 16, 0);
            assert_eq!(ctx.decrypt(&sealed).unwrap(), plaintext, "len {len}");
        }
    }

    #[test]
    fn iv_is_fresh_per_encryption() {
        let ctx = context();
        let a = ctx.encrypt(b"same plaintext");
        let b = ctx.encrypt(b"same plaintext");
        assert_ne!(a[..16], b[..16]);
        assert_ne!(a[16..], b[16..]);
    }

    #[test]
    fn deterministic_under_fixed_iv() {
        let ctx = context();
        let iv = [0x0F; 16];
        assert_eq!(
            ctx.encrypt_with_iv(iv, b"payload"),
            ctx.encrypt_with_iv(iv, b"payload")
        );
    }

    #[test]
    fn truncated_and_ragged_payloads_rejected() {
        let ctx = context();
        assert!(ctx.decrypt(&[0u8; 16]).is_err());
        assert!(ctx.decrypt(&[0u8; 17]).is_err());
        assert!(ctx.decrypt(&[0u8; 47]).is_err());
    }

    #[test]
    fn corrupt_pad_rejected() {
        let ctx = context();
        let mut sealed = ctx.encrypt(&[0xAB; 10]);
        // Flip a bit in the last ciphertext block; the pad check catches it
        // with overwhelming probability.
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        assert!(ctx.decrypt(&sealed).is_err());
    }

    #[test]
    fn wrong_key_does_not_roundtrip() {
        let sealed = context().encrypt(b"secret console bytes");
        let other = CryptContext::new(&[0x11; 16]).unwrap();
        match other.decrypt(&sealed) {
            Err(_) => {}
            Ok(plain) => assert_ne!(plain, b"secret console bytes"),
        }
    }

    // ========================================================================
    // Property-based tests
    // ========================================================================

    use proptest::prelude::*;

    proptest! {
        /// Property: Decrypt(Encrypt(m, K2)) = m for all m up to the SOL
        /// payload ceiling.
        #[test]
        fn prop_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..=255)) {
            let ctx = context();
            let sealed = ctx.encrypt(&plaintext);
            prop_assert_eq!(ctx.decrypt(&sealed).unwrap(), plaintext);
        }
    }
}
