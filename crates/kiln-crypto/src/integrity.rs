//! Per-packet integrity (AuthCode) generation and verification.
//!
//! Once RAKP completes, authenticated packets carry an AuthCode over the
//! range from the session-format byte up to the byte immediately preceding
//! the AuthCode itself. The MAC is keyed by K1 = HMAC(SIK, const_1), not by
//! the SIK directly, so a compromise of packet-level keys never exposes the
//! key-exchange secret.

use zeroize::Zeroizing;

use crate::{CONST_1, ct_eq, hmac_sha1, hmac_sha256};

/// Integrity algorithm identifiers (IPMI 2.0 table 13-18).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IntegrityAlgorithm {
    HmacSha1_96 = 0x01,
    HmacSha256_128 = 0x04,
}

impl IntegrityAlgorithm {
    /// Decodes the 6-bit algorithm field of an Open Session request,
    /// returning `None` for anything outside the supported set.
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::HmacSha1_96),
            0x04 => Some(Self::HmacSha256_128),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Length of the truncated AuthCode carried in the packet trailer.
    pub fn auth_code_len(self) -> usize {
        match self {
            Self::HmacSha1_96 => 12,
            Self::HmacSha256_128 => 16,
        }
    }

    fn hmac(self, key: &[u8], data: &[u8]) -> Vec<u8> {
        match self {
            Self::HmacSha1_96 => hmac_sha1(key, data),
            Self::HmacSha256_128 => hmac_sha256(key, data),
        }
    }
}

/// Derives Kn = HMAC(SIK, const_n) under the session's integrity hash.
///
/// K1 keys packet AuthCodes; K2 (const_2) keys payload confidentiality.
pub fn derive_kn(algorithm: IntegrityAlgorithm, sik: &[u8], const_n: &[u8; 20]) -> Vec<u8> {
    algorithm.hmac(sik, const_n)
}

/// A session's installed packet-integrity state: algorithm plus K1.
#[derive(Debug)]
pub struct IntegrityContext {
    algorithm: IntegrityAlgorithm,
    k1: Zeroizing<Vec<u8>>,
}

impl IntegrityContext {
    /// Builds the context from the session integrity key.
    pub fn new(algorithm: IntegrityAlgorithm, sik: &[u8]) -> Self {
        Self {
            algorithm,
            k1: Zeroizing::new(derive_kn(algorithm, sik, &CONST_1)),
        }
    }

    pub fn algorithm(&self) -> IntegrityAlgorithm {
        self.algorithm
    }

    pub fn auth_code_len(&self) -> usize {
        self.algorithm.auth_code_len()
    }

    /// AuthCode over the covered range, truncated to the trailer length.
    pub fn generate(&self, covered: &[u8]) -> Vec<u8> {
        let mut mac = self.algorithm.hmac(&self.k1, covered);
        mac.truncate(self.auth_code_len());
        mac
    }

    /// Constant-time verification of a received AuthCode.
    pub fn verify(&self, covered: &[u8], auth_code: &[u8]) -> bool {
        ct_eq(&self.generate(covered), auth_code)
    }
}
