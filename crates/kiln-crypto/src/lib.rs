//! # kiln-crypto: Cryptographic primitives for RMCP+ sessions
//!
//! Everything keyed during session establishment lives here:
//! - [`rakp`] - the RAKP authentication context: user-key HMACs for the key
//!   exchange, session-integrity-key derivation, and the RAKP4 integrity
//!   check value.
//! - [`integrity`] - per-packet AuthCodes (HMAC-SHA1-96 / HMAC-SHA256-128)
//!   keyed by K1, plus the Kn derivation used for both K1 and K2.
//! - [`confidentiality`] - AES-CBC-128 payload encryption keyed by K2.
//! - [`rng`] - CSPRNG helpers for session ids, nonces, and IVs.
//!
//! Key material is wrapped in [`zeroize::Zeroizing`] so it is wiped on drop,
//! and every MAC comparison goes through [`subtle`] constant-time equality.

pub mod confidentiality;
pub mod integrity;
pub mod rakp;
pub mod rng;

use thiserror::Error;

/// Maximum user-key (password) length; shorter passwords are zero-padded to
/// this length before keying HMACs.
pub const USER_KEY_MAX_LENGTH: usize = 20;

/// Length of the RAKP random numbers (both console and BMC).
pub const RANDOM_NUMBER_LEN: usize = 16;

/// Length of the BMC GUID.
pub const GUID_LEN: usize = 16;

/// The constant block hashed with the SIK to derive K1 (packet integrity).
pub const CONST_1: [u8; 20] = [0x01; 20];

/// The constant block hashed with the SIK to derive K2 (confidentiality).
pub const CONST_2: [u8; 20] = [0x02; 20];

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors from the cryptographic layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The session integrity key is derived exactly once per session.
    #[error("session integrity key already derived")]
    SikAlreadyDerived,

    /// An operation needed the SIK before RAKP3 derived it.
    #[error("session integrity key not yet derived")]
    SikMissing,

    /// The derived confidentiality key was shorter than the cipher key.
    #[error("confidentiality key too short: {0} bytes")]
    KeyTooShort(usize),

    /// An encrypted payload failed structural validation.
    #[error("malformed encrypted payload: {0}")]
    MalformedCiphertext(&'static str),
}

/// Constant-time byte-slice equality.
///
/// Slices of different lengths compare unequal without inspecting contents.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

pub(crate) fn hmac_sha1(key: &[u8], data: &[u8]) -> Vec<u8> {
    use hmac::{Hmac, Mac};
    use sha1::Sha1;

    let mut mac =
        <Hmac<Sha1> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut mac =
        <Hmac<Sha256> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ct_eq_matches_plain_equality() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
        assert!(!ct_eq(b"abc", b"abcd"));
        assert!(ct_eq(b"", b""));
    }

    #[test]
    fn hmac_sha1_rfc2202_vector() {
        // RFC 2202 test case 2: key "Jefe", data "what do ya want for nothing?"
        let out = hmac_sha1(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            out,
            [
                0xef, 0xfc, 0xdf, 0x6a, 0xe5, 0xeb, 0x2f, 0xa2, 0xd2, 0x74, 0x16, 0xd5, 0xf1,
                0x84, 0xdf, 0x9c, 0x25, 0x9a, 0x7c, 0x79
            ]
        );
    }

    #[test]
    fn hmac_sha256_rfc4231_vector() {
        // RFC 4231 test case 2.
        let out = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            out,
            [
                0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08,
                0x95, 0x75, 0xc7, 0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83, 0x9d, 0xec,
                0x58, 0xb9, 0x64, 0xec, 0x38, 0x43
            ]
        );
    }
}
