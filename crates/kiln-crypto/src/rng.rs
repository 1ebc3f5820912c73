//! CSPRNG helpers.
//!
//! Session ids, RAKP nonces, and CBC IVs all come from the operating
//! system's entropy source. None of them may be predictable: session ids
//! gate lookup, nonces feed the key exchange, and IV reuse would leak
//! plaintext relationships.

use rand::RngCore;
use rand::rngs::OsRng;

/// Fills and returns an N-byte array of OS randomness.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

/// A random 32-bit value from the OS entropy source.
pub fn random_u32() -> u32 {
    OsRng.next_u32()
}
