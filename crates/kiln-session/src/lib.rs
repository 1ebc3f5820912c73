//! # kiln-session: RMCP+ session management and the RAKP handshake
//!
//! This crate owns everything between "Open Session request arrives" and
//! "authenticated traffic flows":
//! - [`Session`] - one RMCP+ conversation: ids, privilege, sequence
//!   numbers, negotiated algorithms, key material, lifecycle state.
//! - [`SessionManager`] - creation (with the stale-session reaper), lookup
//!   by id / console id / handle, and teardown.
//! - [`handshake`] - the Open Session and RAKP 1-4 handlers.
//! - [`commands`] - Close Session and Set Session Privilege.
//! - [`user`] - the narrow seam to the per-channel user database.
//!
//! The session map is owned by the event loop and mutated only from it;
//! nothing in this crate locks or suspends.

pub mod commands;
pub mod handshake;
mod manager;
mod session;
pub mod user;

pub use manager::SessionManager;
pub use session::Session;

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors from session management.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// No session with the requested id.
    #[error("session {0:#010x} not found")]
    NotFound(u32),

    /// The per-channel session cap is reached.
    #[error("no free sessions left")]
    InsufficientResources,

    /// Operation needed an algorithm object the session has not installed.
    #[error("authentication algorithm not installed")]
    AuthAlgoMissing,

    /// Cryptographic failure.
    #[error(transparent)]
    Crypto(#[from] kiln_crypto::CryptoError),
}
