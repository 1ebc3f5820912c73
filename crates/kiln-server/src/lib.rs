//! # kiln-server: the RMCP+ network daemon
//!
//! A single-threaded mio poll loop drives one non-blocking UDP socket, the
//! host console pipe, and the per-instance SOL timers. Every mutation of
//! shared state happens on the loop; nothing holds a lock across a
//! suspension point because there are no locks and no suspension points.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          kilnd                               │
//! │  UDP 623 ─▶ dispatch ─▶ sessions / RAKP / commands / SOL     │
//! │  console ─▶ SOL accumulate ─▶ outbound SOL payloads          │
//! │  timers  ─▶ SOL retry / accumulate, session reaping          │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod command_table;
mod config;
pub mod console;
pub mod dispatch;
mod event_loop;
pub mod timers;

pub use command_table::{BuiltinCommand, CommandDispatcher, CommandTable, Continuation};
pub use config::{
    ConsoleConfig, ConsoleEndpoint, DaemonConfig, NetworkConfig, SolConfig, UserConfig,
};
pub use dispatch::{ServerEffects, Services};
pub use event_loop::Server;

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while bringing up or running the daemon.
#[derive(Debug, Error)]
pub enum ServerError {
    /// I/O error from the socket, poll, or console pipe.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to bind the UDP socket.
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        addr: String,
        source: std::io::Error,
    },

    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Config(String),
}
