//! # kiln-wire: RMCP+ packet framing and codecs
//!
//! Bit-exact encoders and decoders for the daemon's wire surface:
//! - [`rmcp`] - the outer RMCP header and the IPMI 1.5 / 2.0 session
//!   headers, including the integrity trailer and payload confidentiality.
//! - [`rakp`] - Open Session request/response and RAKP messages 1-4.
//! - [`sol`] - the four-byte SOL payload header and character data.
//! - [`ipmi`] - the IPMI LAN sub-frame (headers, checksums) carried in
//!   IPMI-type payloads.
//!
//! Parsing never panics on attacker-controlled input; every failure is a
//! typed [`WireError`]. Multi-byte fields are little-endian on the wire per
//! the IPMI convention.

pub mod ipmi;
pub mod rakp;
pub mod rmcp;
pub mod sol;

use thiserror::Error;

/// Result type for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors raised while parsing or building packets.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Packet shorter than the structure being parsed.
    #[error("packet truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    /// Outer RMCP header fields deviate from the specification.
    #[error("invalid RMCP header")]
    BadRmcpHeader,

    /// Session-format selector is neither IPMI 1.5 nor IPMI 2.0.
    #[error("unsupported session format {0:#04x}")]
    UnsupportedFormat(u8),

    /// Payload-type bits name no payload this daemon routes.
    #[error("unknown payload type {0:#04x}")]
    UnknownPayloadType(u8),

    /// A status byte outside the RAKP status-code set.
    #[error("unknown status code {0:#04x}")]
    UnknownStatusCode(u8),

    /// Declared payload length disagrees with the packet size.
    #[error("payload length mismatch")]
    LengthMismatch,

    /// Integrity pad bytes or pad length are malformed.
    #[error("invalid integrity pad")]
    BadIntegrityPad,

    /// AuthCode verification failed. The packet is dropped silently at the
    /// transport; this error never generates a response.
    #[error("integrity check failed")]
    IntegrityCheckFailed,

    /// Packet is authenticated but the session has no integrity context.
    #[error("no integrity context installed")]
    MissingIntegrityContext,

    /// Packet is encrypted but the session has no confidentiality context.
    #[error("no confidentiality context installed")]
    MissingCryptContext,

    /// Confidentiality layer rejected the payload.
    #[error(transparent)]
    Crypto(#[from] kiln_crypto::CryptoError),
}
