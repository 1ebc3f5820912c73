//! RAKP authentication context.
//!
//! The authentication algorithm negotiated at Open Session time determines
//! the hash used for every keyed operation in the handshake: the Key
//! Exchange Authentication Codes in RAKP 2 and 3, the Session Integrity Key
//! derivation, and the Integrity Check Value in RAKP 4.
//!
//! The context also carries the handshake nonces and the user key, because
//! the algorithm object is the only place they are all needed together -
//! the session installs its packet-level integrity and confidentiality
//! objects only after the handshake succeeds.

use zeroize::Zeroizing;

use crate::{
    CryptoError, CryptoResult, RANDOM_NUMBER_LEN, USER_KEY_MAX_LENGTH, hmac_sha1, hmac_sha256,
};

/// RAKP authentication algorithm identifiers (IPMI 2.0 table 13-17).
///
/// RAKP-None is deliberately absent: "cipher 0" lets authentication be
/// bypassed entirely and is the subject of a standing US-CERT alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RakpAlgorithm {
    HmacSha1 = 0x01,
    HmacSha256 = 0x03,
}

impl RakpAlgorithm {
    /// Decodes the 6-bit algorithm field of an Open Session request,
    /// returning `None` for anything outside the supported set.
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::HmacSha1),
            0x03 => Some(Self::HmacSha256),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Length of the RAKP4 Integrity Check Value for this algorithm:
    /// HMAC-SHA1-96 truncates to 12 bytes, HMAC-SHA256-128 to 16.
    pub fn icv_len(self) -> usize {
        match self {
            Self::HmacSha1 => 12,
            Self::HmacSha256 => 16,
        }
    }

    /// Full digest length, which is also the length of the Key Exchange
    /// Authentication Codes and the SIK.
    pub fn digest_len(self) -> usize {
        match self {
            Self::HmacSha1 => 20,
            Self::HmacSha256 => 32,
        }
    }

    fn hmac(self, key: &[u8], data: &[u8]) -> Vec<u8> {
        match self {
            Self::HmacSha1 => hmac_sha1(key, data),
            Self::HmacSha256 => hmac_sha256(key, data),
        }
    }
}

/// Per-session RAKP state: negotiated algorithm, user key, nonces, SIK.
#[derive(Debug)]
pub struct AuthContext {
    algorithm: RakpAlgorithm,
    /// User password zero-padded to 20 bytes, exactly as it keys the HMACs.
    user_key: Zeroizing<[u8; USER_KEY_MAX_LENGTH]>,
    /// Managed-system random number, generated when RAKP1 arrives.
    bmc_random: [u8; RANDOM_NUMBER_LEN],
    /// Remote-console random number, copied out of RAKP1.
    console_random: [u8; RANDOM_NUMBER_LEN],
    /// Session Integrity Key, derived once during RAKP 3→4.
    sik: Option<Zeroizing<Vec<u8>>>,
}

impl AuthContext {
    pub fn new(algorithm: RakpAlgorithm) -> Self {
        Self {
            algorithm,
            user_key: Zeroizing::new([0u8; USER_KEY_MAX_LENGTH]),
            bmc_random: [0u8; RANDOM_NUMBER_LEN],
            console_random: [0u8; RANDOM_NUMBER_LEN],
            sik: None,
        }
    }

    pub fn algorithm(&self) -> RakpAlgorithm {
        self.algorithm
    }

    /// Installs the user password as the HMAC key, zero-padded to 20 bytes.
    /// Longer passwords are truncated to the keying length.
    pub fn set_user_key(&mut self, password: &[u8]) {
        let mut key = [0u8; USER_KEY_MAX_LENGTH];
        let len = password.len().min(USER_KEY_MAX_LENGTH);
        key[..len].copy_from_slice(&password[..len]);
        *self.user_key = key;
    }

    pub fn set_bmc_random(&mut self, random: [u8; RANDOM_NUMBER_LEN]) {
        self.bmc_random = random;
    }

    pub fn set_console_random(&mut self, random: [u8; RANDOM_NUMBER_LEN]) {
        self.console_random = random;
    }

    pub fn bmc_random(&self) -> &[u8; RANDOM_NUMBER_LEN] {
        &self.bmc_random
    }

    pub fn console_random(&self) -> &[u8; RANDOM_NUMBER_LEN] {
        &self.console_random
    }

    /// Key Exchange Authentication Code: HMAC over `input` keyed by the
    /// padded user password. Used for RAKP2 generation and RAKP3 checking.
    pub fn kex_hmac(&self, input: &[u8]) -> Vec<u8> {
        self.algorithm.hmac(self.user_key.as_slice(), input)
    }

    /// Derives and stores the Session Integrity Key.
    ///
    /// The SIK is set exactly once, during the RAKP 3→4 transition; a second
    /// derivation on the same session is a protocol-state bug.
    pub fn derive_sik(&mut self, input: &[u8]) -> CryptoResult<()> {
        if self.sik.is_some() {
            return Err(CryptoError::SikAlreadyDerived);
        }
        let sik = self.algorithm.hmac(self.user_key.as_slice(), input);
        self.sik = Some(Zeroizing::new(sik));
        Ok(())
    }

    pub fn sik(&self) -> CryptoResult<&[u8]> {
        self.sik
            .as_deref()
            .map(Vec::as_slice)
            .ok_or(CryptoError::SikMissing)
    }

    /// RAKP4 Integrity Check Value: HMAC over `input` keyed by the SIK,
    /// truncated to the algorithm's ICV length.
    pub fn icv(&self, input: &[u8]) -> CryptoResult<Vec<u8>> {
        let sik = self.sik()?;
        let mut out = self.algorithm.hmac(sik, input);
        out.truncate(self.algorithm.icv_len());
        Ok(out)
    }
}
