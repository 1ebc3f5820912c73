//! # kiln-flash: staged firmware-update blob state machine
//!
//! A host pushes a firmware image and its signature to the BMC through the
//! blob RPC as path-addressed blobs, then drives verification and
//! installation by committing on synthetic blobs that appear and disappear
//! as the update cycle advances. This crate owns:
//! - [`FirmwareBlobHandler`] - the state machine behind every blob
//!   operation.
//! - [`transport`] - how upload bytes reach the BMC (in-band payloads or a
//!   memory window the host fills).
//! - [`image`] - where staged bytes land ([`ImageWriter`], [`FileWriter`]).
//! - [`actions`] - the prepare/verify/update triggers whose status the
//!   host polls.
//! - [`config`] - the JSON blob-handler configuration.
//!
//! Blob operations never fail across the RPC boundary with an error value:
//! every failure is a `false`/`None` return and leaves the listing and
//! state untouched.

pub mod actions;
pub mod config;
mod handler;
pub mod image;
pub mod transport;

pub use actions::{ActionPack, ActionStatus, ActionTrigger, SkipAction};
pub use handler::{ActionMap, FirmwareBlobHandler, ImagePack, UpdateState};
pub use image::{FileWriter, ImageWriter};
pub use transport::{MemoryWindow, TransportPack};

use thiserror::Error;

/// Result type for firmware-handler construction and configuration.
pub type FlashResult<T> = Result<T, FlashError>;

/// Errors outside the blob RPC boundary (construction, configuration).
#[derive(Debug, Error)]
pub enum FlashError {
    /// Handler construction rejected its inputs.
    #[error("invalid firmware handler construction: {0}")]
    Construction(&'static str),

    /// A configuration entry failed validation.
    #[error("invalid blob configuration: {0}")]
    Config(String),
}

/// Well-known blob paths.
pub mod blob_ids {
    /// The signature blob; always listed.
    pub const HASH: &str = "/flash/hash";
    /// Synthetic: commit here to start verification.
    pub const VERIFY: &str = "/flash/verify";
    /// Synthetic: commit here to start the update.
    pub const UPDATE: &str = "/flash/update";
    /// Synthetic: present while an image upload is underway.
    pub const ACTIVE_IMAGE: &str = "/flash/active/image";
    /// Synthetic: present while a signature upload is underway.
    pub const ACTIVE_HASH: &str = "/flash/active/hash";
    /// Always listed; commit here to force-reset the state machine.
    pub const CLEANUP: &str = "/flash/cleanup";
    /// Conventional static-layout image blob.
    pub const STATIC_IMAGE: &str = "/flash/image";
    /// Conventional UBI tarball blob.
    pub const TARBALL: &str = "/flash/tarball";
}

/// Blob state flags carried in stat replies (blob protocol definitions).
pub mod state_flags {
    pub const OPEN_READ: u16 = 1 << 0;
    pub const OPEN_WRITE: u16 = 1 << 1;
    pub const COMMITTING: u16 = 1 << 2;
    pub const COMMITTED: u16 = 1 << 3;
    pub const COMMIT_ERROR: u16 = 1 << 4;
}

/// Metadata returned by blob stat operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobMeta {
    /// For path stat: the supported-transports mask. For session stat: the
    /// open flags plus commit state.
    pub blob_state: u16,
    /// Staged byte count (session stat) or 0 (path stat).
    pub size: u32,
    /// Trigger status byte and/or transport window metadata.
    pub metadata: Vec<u8>,
}

/// The blob RPC surface consumed by the external IPMI dispatcher.
///
/// Paths are UTF-8 blob ids; sessions are 16-bit handles opaque to this
/// crate. No method returns an error: failures are `false`, `None`, or an
/// empty buffer.
pub trait BlobHandler {
    /// Whether this handler serves `path` (consulted before every routed
    /// operation).
    fn can_handle(&self, path: &str) -> bool;

    /// The current blob listing, synthetic entries included.
    fn blob_ids(&self) -> Vec<String>;

    /// Host-initiated abort of a pending cycle.
    fn delete(&mut self, path: &str) -> bool;

    /// Stat by path.
    fn stat(&self, path: &str) -> Option<BlobMeta>;

    /// Opens a blob for a session. Flag low bits are read/write; an 8-bit
    /// field selects the transport.
    fn open(&mut self, session: u16, flags: u16, path: &str) -> bool;

    /// Reads staged data back. Not currently supported; always empty.
    fn read(&mut self, session: u16, offset: u32, requested: u32) -> Vec<u8>;

    /// Writes payload bytes (or a transport chunk header) at an offset.
    fn write(&mut self, session: u16, offset: u32, data: &[u8]) -> bool;

    /// Forwards transport window configuration.
    fn write_meta(&mut self, session: u16, offset: u32, data: &[u8]) -> bool;

    /// Fires the verification or update trigger, or force-resets on the
    /// cleanup blob.
    fn commit(&mut self, session: u16, data: &[u8]) -> bool;

    /// Closes the session, advancing or aborting the cycle per state.
    fn close(&mut self, session: u16) -> bool;

    /// Stat by open session; polls trigger status during verify/update.
    fn session_stat(&mut self, session: u16) -> Option<BlobMeta>;

    /// Session expiry; maps to the abort path.
    fn expire(&mut self, session: u16) -> bool;
}
