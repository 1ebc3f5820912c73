//! # kiln-sol: Serial-over-LAN payload instances
//!
//! SOL rides host serial console bytes over an established RMCP+ session.
//! This crate owns:
//! - [`ConsoleBuffer`] - the FIFO of bytes produced by the host console.
//! - [`SolContext`] - per-payload-instance state: 4-bit sequence spaces,
//!   the cached in-flight payload, retry accounting.
//! - [`SolManager`] - the instance table, console fan-in, and the SOL
//!   configuration parameters.
//! - [`commands`] - Activate/Deactivate Payload, payload status/info, and
//!   Set/Get SOL Configuration.
//!
//! Timers and I/O belong to the event loop; the context requests them
//! through the [`SolServices`] seam and never blocks.

mod console;
mod context;
mod manager;

pub mod commands;

pub use console::ConsoleBuffer;
pub use context::SolContext;
pub use manager::{SolManager, SolParams};

use std::time::Duration;

use kiln_types::SessionId;

/// The two timers every active SOL instance owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolTimerKind {
    /// Character-accumulate interval: fires to flush buffered console
    /// bytes when the send threshold was never reached.
    Accumulate,
    /// Retry interval: fires when the last payload went unacknowledged.
    Retry,
}

/// Effects a SOL instance needs from its surroundings. Implemented by the
/// event loop; every call is synchronous and non-blocking.
pub trait SolServices {
    /// Writes remote-console bytes to the host console.
    fn write_console(&mut self, data: &[u8]) -> std::io::Result<()>;

    /// Frames and transmits a SOL payload on the owning session.
    fn send_payload(&mut self, session_id: SessionId, payload: &[u8]);

    /// Sends the unsolicited "SOL activating" notification on the session.
    fn send_activating(&mut self, instance: u8, session_id: SessionId);

    /// (Re)arms one of the instance's timers.
    fn arm_timer(&mut self, instance: u8, kind: SolTimerKind, after: Duration);

    /// Cancels one of the instance's timers.
    fn cancel_timer(&mut self, instance: u8, kind: SolTimerKind);
}
