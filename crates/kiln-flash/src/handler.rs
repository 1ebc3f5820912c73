//! The firmware update state machine.

use std::collections::HashMap;

use crate::actions::{ActionPack, ActionStatus};
use crate::image::ImageWriter;
use crate::transport::{TransportPack, flags, parse_chunk_header};
use crate::{BlobHandler, BlobMeta, FlashError, FlashResult, blob_ids, state_flags};

/// Map from firmware kind (its blob path) to the action pack driving it.
pub type ActionMap = HashMap<String, ActionPack>;

/// The state of the firmware update process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    /// The initial state.
    NotYetStarted,
    /// The BMC is expecting to receive bytes.
    UploadInProgress,
    /// The BMC is ready for verification or more bytes.
    VerificationPending,
    /// The verification process has started; no more writes allowed.
    VerificationStarted,
    /// The verification process has completed.
    VerificationCompleted,
    /// The update process is pending.
    UpdatePending,
    /// The update process has started.
    UpdateStarted,
    /// The update has completed (optional state to reach).
    UpdateCompleted,
}

/// A firmware kind and the writer its staged bytes land in.
pub struct ImagePack {
    pub blob_id: String,
    pub writer: Box<dyn ImageWriter>,
}

impl ImagePack {
    pub fn new(blob_id: impl Into<String>, writer: Box<dyn ImageWriter>) -> Self {
        Self {
            blob_id: blob_id.into(),
            writer,
        }
    }
}

impl std::fmt::Debug for ImagePack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePack")
            .field("blob_id", &self.blob_id)
            .finish_non_exhaustive()
    }
}

/// What an open session is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionKind {
    /// An image or signature upload; the index selects the writer.
    Upload { writer: usize },
    Verify,
    Update,
    Cleanup,
}

/// The single open firmware session.
#[derive(Debug)]
struct OpenSession {
    id: u16,
    kind: SessionKind,
    flags: u16,
    /// Index into the transport table; uploads only.
    transport: Option<usize>,
}

/// The firmware blob handler: one state machine multiplexing every blob
/// operation for the update process.
///
/// At most one session is open at a time across all blobs - a single
/// uploader owns the cycle until it closes or aborts. Writers, transports,
/// and action packs are owned here; sessions refer to them by index.
pub struct FirmwareBlobHandler {
    writers: Vec<ImagePack>,
    transports: Vec<TransportPack>,
    actions: ActionMap,

    /// The live blob listing, synthetic entries included.
    blob_list: Vec<String>,

    open_session: Option<OpenSession>,
    state: UpdateState,

    /// The image kind chosen for this cycle; exactly one kind per cycle.
    opened_firmware_kind: Option<String>,
    /// The prepare trigger fires at most once per cycle.
    preparation_triggered: bool,

    last_verification_status: ActionStatus,
    last_update_status: ActionStatus,
}

impl std::fmt::Debug for FirmwareBlobHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirmwareBlobHandler")
            .field("state", &self.state)
            .field("blob_list", &self.blob_list)
            .field("opened_firmware_kind", &self.opened_firmware_kind)
            .finish_non_exhaustive()
    }
}

impl FirmwareBlobHandler {
    /// Builds the handler.
    ///
    /// Requires the signature blob plus at least one image kind, at least
    /// one transport, and a non-empty action map.
    pub fn new(
        firmwares: Vec<ImagePack>,
        transports: Vec<TransportPack>,
        actions: ActionMap,
    ) -> FlashResult<Self> {
        if firmwares.len() < 2 {
            return Err(FlashError::Construction(
                "need the hash blob and at least one firmware kind",
            ));
        }
        if !firmwares.iter().any(|pack| pack.blob_id == blob_ids::HASH) {
            return Err(FlashError::Construction("hash blob handler missing"));
        }
        if transports.is_empty() {
            return Err(FlashError::Construction("no transports"));
        }
        if actions.is_empty() {
            return Err(FlashError::Construction("no action packs"));
        }

        let mut blob_list: Vec<String> =
            firmwares.iter().map(|pack| pack.blob_id.clone()).collect();
        blob_list.push(blob_ids::CLEANUP.to_string());

        Ok(Self {
            writers: firmwares,
            transports,
            actions,
            blob_list,
            open_session: None,
            state: UpdateState::NotYetStarted,
            opened_firmware_kind: None,
            preparation_triggered: false,
            last_verification_status: ActionStatus::Unknown,
            last_update_status: ActionStatus::Unknown,
        })
    }

    /// The current update state.
    pub fn state(&self) -> UpdateState {
        self.state
    }

    fn file_open(&self) -> bool {
        self.open_session.is_some()
    }

    fn add_blob_id(&mut self, blob: &str) {
        if !self.blob_list.iter().any(|id| id == blob) {
            self.blob_list.push(blob.to_string());
        }
    }

    fn remove_blob_id(&mut self, blob: &str) {
        self.blob_list.retain(|id| id != blob);
    }

    fn listed(&self, blob: &str) -> bool {
        self.blob_list.iter().any(|id| id == blob)
    }

    /// The action pack for the image kind chosen this cycle. Absent when
    /// only the hash was opened so far, which is a legal ordering.
    fn action_pack(&mut self) -> Option<&mut ActionPack> {
        let kind = self.opened_firmware_kind.as_ref()?;
        self.actions.get_mut(kind)
    }

    fn change_state(&mut self, next: UpdateState) {
        self.state = next;
        match next {
            UpdateState::NotYetStarted => {
                // A fresh cycle may trigger preparation again.
                self.preparation_triggered = false;
            }
            UpdateState::UploadInProgress => {
                if !self.preparation_triggered {
                    let fired = match self.action_pack() {
                        Some(pack) => {
                            pack.preparation.trigger();
                            true
                        }
                        None => false,
                    };
                    if fired {
                        self.preparation_triggered = true;
                    }
                }
            }
            _ => {}
        }
    }

    /// Tears the cycle down: synthetic blobs out of the listing, open
    /// handles closed, the chosen kind cleared, state back to the start.
    /// Idempotent.
    pub fn abort_process(&mut self) {
        self.remove_blob_id(blob_ids::VERIFY);
        self.remove_blob_id(blob_ids::UPDATE);
        self.remove_blob_id(blob_ids::ACTIVE_IMAGE);
        self.remove_blob_id(blob_ids::ACTIVE_HASH);

        self.close_open_handles();
        self.opened_firmware_kind = None;
        self.change_state(UpdateState::NotYetStarted);
        tracing::debug!("firmware update cycle aborted");
    }

    fn close_open_handles(&mut self) {
        if let Some(open) = self.open_session.take() {
            if let Some(idx) = open.transport {
                if let Some(window) = self.transports[idx].window.as_mut() {
                    window.close();
                }
            }
            if let SessionKind::Upload { writer } = open.kind {
                self.writers[writer].writer.close();
            }
        }
    }

    fn abort_verification(&mut self) {
        if let Some(pack) = self.action_pack() {
            pack.verification.abort();
        }
    }

    fn trigger_verification(&mut self) -> bool {
        let Some(pack) = self.action_pack() else {
            return false;
        };
        let started = pack.verification.trigger();
        if started {
            self.change_state(UpdateState::VerificationStarted);
        }
        started
    }

    fn abort_update(&mut self) {
        if let Some(pack) = self.action_pack() {
            pack.update.abort();
        }
    }

    fn trigger_update(&mut self) -> bool {
        let Some(pack) = self.action_pack() else {
            return false;
        };
        let started = pack.update.trigger();
        if started {
            self.change_state(UpdateState::UpdateStarted);
        }
        started
    }

    /// Polls the trigger relevant to the current state, latching the last
    /// observed verification/update status.
    fn action_status(&mut self) -> ActionStatus {
        match self.state {
            UpdateState::VerificationStarted => {
                let Some(pack) = self.action_pack() else {
                    return ActionStatus::Unknown;
                };
                let status = pack.verification.status();
                self.last_verification_status = status;
                status
            }
            UpdateState::VerificationCompleted => self.last_verification_status,
            UpdateState::UpdateStarted => {
                let Some(pack) = self.action_pack() else {
                    return ActionStatus::Unknown;
                };
                let status = pack.update.status();
                self.last_update_status = status;
                status
            }
            UpdateState::UpdateCompleted => self.last_update_status,
            _ => ActionStatus::Unknown,
        }
    }

    /// Validates an upload open and resolves its transport and writer
    /// indices. No state is mutated; a rejected open leaves the machine
    /// byte-identical.
    fn resolve_upload_open(&mut self, flags_word: u16, path: &str) -> Option<(usize, usize)> {
        // One image kind per cycle: opening a different kind after the
        // first is rejected until the cycle resets.
        if path != blob_ids::HASH {
            if let Some(kind) = &self.opened_firmware_kind {
                if kind != path {
                    tracing::warn!(
                        opened = %kind,
                        requested = %path,
                        "alternate firmware kind while another is unfinished"
                    );
                    return None;
                }
            }
        }

        let transport_flag = flags_word & flags::TRANSPORT_MASK;
        let transport = self
            .transports
            .iter()
            .position(|pack| pack.bitmask == transport_flag)?;

        let writer = self
            .writers
            .iter()
            .position(|pack| pack.blob_id == path)?;

        if let Some(window) = self.transports[transport].window.as_mut() {
            if !window.open() {
                return None;
            }
        }
        if !self.writers[writer].writer.open(path) {
            if let Some(window) = self.transports[transport].window.as_mut() {
                window.close();
            }
            return None;
        }

        Some((transport, writer))
    }
}

impl BlobHandler for FirmwareBlobHandler {
    fn can_handle(&self, path: &str) -> bool {
        self.listed(path)
    }

    fn blob_ids(&self) -> Vec<String> {
        self.blob_list.clone()
    }

    /// Delete means abort. Only meaningful while a cycle is parked between
    /// sessions (verification or update pending).
    fn delete(&mut self, _path: &str) -> bool {
        match self.state {
            UpdateState::VerificationPending | UpdateState::UpdatePending => {
                self.abort_process();
                true
            }
            _ => false,
        }
    }

    fn stat(&self, path: &str) -> Option<BlobMeta> {
        if !self.listed(path) {
            return None;
        }
        // The synthetic blobs indicate state or allow actions; they are
        // not stat-able as-is.
        if matches!(
            path,
            blob_ids::VERIFY | blob_ids::UPDATE | blob_ids::ACTIVE_IMAGE | blob_ids::ACTIVE_HASH
        ) {
            return None;
        }

        // Older host tools expect the blob state to carry a bitmask of
        // available transports; report the full mask for compatibility.
        Some(BlobMeta {
            blob_state: flags::TRANSPORT_MASK,
            size: 0,
            metadata: Vec::new(),
        })
    }

    fn open(&mut self, session: u16, flags_word: u16, path: &str) -> bool {
        // Only one open session across all blobs.
        if self.file_open() {
            return false;
        }

        // The active blobs only mark that an upload is underway; they are
        // not openable themselves.
        if path == blob_ids::ACTIVE_IMAGE || path == blob_ids::ACTIVE_HASH {
            return false;
        }

        // Read-back is not supported; every open is for writing.
        if flags_word & flags::OPEN_WRITE == 0 {
            return false;
        }

        // The cleanup blob opens in any state; committing on it resets the
        // machine. No transport is involved.
        if path == blob_ids::CLEANUP {
            self.open_session = Some(OpenSession {
                id: session,
                kind: SessionKind::Cleanup,
                flags: flags_word,
                transport: None,
            });
            return true;
        }

        match self.state {
            UpdateState::NotYetStarted | UpdateState::UploadInProgress => {}
            UpdateState::VerificationPending => {
                // The verify blob is only in the listing in this state. A
                // transport is irrelevant for it. Opening an image or hash
                // blob instead transitions back into upload.
                if path == blob_ids::VERIFY {
                    self.open_session = Some(OpenSession {
                        id: session,
                        kind: SessionKind::Verify,
                        flags: flags_word,
                        transport: None,
                    });
                    return true;
                }
            }
            UpdateState::VerificationStarted | UpdateState::VerificationCompleted => {
                return false;
            }
            UpdateState::UpdatePending => {
                // Only the update blob may be opened from here.
                if path == blob_ids::UPDATE {
                    self.open_session = Some(OpenSession {
                        id: session,
                        kind: SessionKind::Update,
                        flags: flags_word,
                        transport: None,
                    });
                    return true;
                }
                return false;
            }
            UpdateState::UpdateStarted | UpdateState::UpdateCompleted => {
                return false;
            }
        }

        let Some((transport, writer)) = self.resolve_upload_open(flags_word, path) else {
            return false;
        };

        if path != blob_ids::HASH {
            self.opened_firmware_kind = Some(path.to_string());
        }

        self.open_session = Some(OpenSession {
            id: session,
            kind: SessionKind::Upload { writer },
            flags: flags_word,
            transport: Some(transport),
        });

        let active = if path == blob_ids::HASH {
            blob_ids::ACTIVE_HASH
        } else {
            blob_ids::ACTIVE_IMAGE
        };
        self.add_blob_id(active);
        self.remove_blob_id(blob_ids::VERIFY);

        self.change_state(UpdateState::UploadInProgress);
        true
    }

    /// Read-back is not currently supported.
    fn read(&mut self, _session: u16, _offset: u32, _requested: u32) -> Vec<u8> {
        Vec::new()
    }

    fn write(&mut self, session: u16, offset: u32, data: &[u8]) -> bool {
        let Some(open) = self.open_session.as_ref() else {
            return false;
        };
        if open.id != session {
            return false;
        }

        // No writes once verification has begun, and never to the
        // synthetic blobs.
        if self.state == UpdateState::VerificationStarted {
            return false;
        }
        let SessionKind::Upload { writer } = open.kind else {
            return false;
        };

        let bytes = if open.flags & flags::IN_BAND != 0 {
            data.to_vec()
        } else {
            let Some(length) = parse_chunk_header(data) else {
                return false;
            };
            let transport = open.transport.expect("bridged uploads carry a transport");
            let Some(window) = self.transports[transport].window.as_mut() else {
                return false;
            };
            window.copy_from(length)
        };

        self.writers[writer].writer.write(offset, &bytes)
    }

    fn write_meta(&mut self, session: u16, _offset: u32, data: &[u8]) -> bool {
        let Some(open) = self.open_session.as_ref() else {
            return false;
        };
        if open.id != session {
            return false;
        }
        // Window negotiation is meaningless for the in-band transport and
        // for sessions without one (verify/update/cleanup).
        if open.flags & flags::IN_BAND != 0 {
            return false;
        }
        let Some(transport) = open.transport else {
            return false;
        };
        match self.transports[transport].window.as_mut() {
            Some(window) => window.write_meta(data),
            None => false,
        }
    }

    fn commit(&mut self, session: u16, _data: &[u8]) -> bool {
        let kind = match self.open_session.as_ref() {
            Some(open) if open.id == session => open.kind,
            _ => return false,
        };

        match kind {
            SessionKind::Cleanup => {
                self.abort_process();
                return true;
            }
            SessionKind::Verify | SessionKind::Update => {}
            SessionKind::Upload { .. } => {
                tracing::warn!("commit on a non-committable blob");
                return false;
            }
        }

        let mark_committing = |handler: &mut Self| {
            if let Some(open) = handler.open_session.as_mut() {
                open.flags |= state_flags::COMMITTING;
            }
        };

        match self.state {
            UpdateState::VerificationPending => {
                mark_committing(self);
                self.trigger_verification()
            }
            // Repeat commits within a started process are no-ops.
            UpdateState::VerificationStarted => true,
            UpdateState::UpdatePending => {
                mark_committing(self);
                self.trigger_update()
            }
            UpdateState::UpdateStarted => true,
            // Committing after completion (or anywhere else) fails.
            _ => false,
        }
    }

    fn close(&mut self, session: u16) -> bool {
        match self.open_session.as_ref() {
            Some(open) if open.id == session => {}
            _ => return false,
        }

        match self.state {
            UpdateState::UploadInProgress => {
                // A data pathway is closing; verification becomes possible
                // once an image has actually been staged.
                self.change_state(UpdateState::VerificationPending);
                if self.listed(blob_ids::ACTIVE_IMAGE) {
                    self.add_blob_id(blob_ids::VERIFY);
                }
            }
            UpdateState::VerificationPending => {
                // Closing without having committed is uninteresting.
            }
            UpdateState::VerificationStarted => {
                // Abort without checking whether it happened to finish;
                // callers must stat() deliberately.
                self.abort_verification();
                self.abort_process();
            }
            UpdateState::VerificationCompleted => {
                if self.last_verification_status == ActionStatus::Success {
                    self.change_state(UpdateState::UpdatePending);
                    self.add_blob_id(blob_ids::UPDATE);
                    self.remove_blob_id(blob_ids::VERIFY);
                } else {
                    self.abort_process();
                }
            }
            UpdateState::UpdatePending => {}
            UpdateState::UpdateStarted => {
                self.abort_update();
                self.abort_process();
            }
            UpdateState::UpdateCompleted => {
                if self.last_update_status == ActionStatus::Failed {
                    tracing::warn!("firmware update failed");
                }
                // The update either rebooted the BMC or finished; reset
                // regardless of outcome.
                self.abort_process();
            }
            UpdateState::NotYetStarted => {}
        }

        self.close_open_handles();
        true
    }

    fn session_stat(&mut self, session: u16) -> Option<BlobMeta> {
        let open = self.open_session.as_ref()?;
        if open.id != session {
            return None;
        }
        let kind = open.kind;
        let transport = open.transport;

        let size = match kind {
            SessionKind::Upload { writer } => self.writers[writer].writer.size(),
            _ => 0,
        };

        let mut metadata = Vec::new();
        if matches!(kind, SessionKind::Verify | SessionKind::Update) {
            let status = self.action_status();
            metadata.push(status.as_u8());

            if matches!(status, ActionStatus::Success | ActionStatus::Failed) {
                let next = if kind == SessionKind::Verify {
                    UpdateState::VerificationCompleted
                } else {
                    UpdateState::UpdateCompleted
                };
                self.change_state(next);

                let open = self.open_session.as_mut().expect("session checked above");
                open.flags &= !state_flags::COMMITTING;
                open.flags |= if status == ActionStatus::Success {
                    state_flags::COMMITTED
                } else {
                    state_flags::COMMIT_ERROR
                };
            }
        }

        // Bridged transports expose their window configuration ahead of
        // the status byte (the host needs it to locate the mapping).
        if let Some(idx) = transport {
            if let Some(window) = self.transports[idx].window.as_mut() {
                let mut bytes = window.read_meta();
                bytes.extend_from_slice(&metadata);
                metadata = bytes;
            }
        }

        let open = self.open_session.as_ref().expect("session checked above");
        Some(BlobMeta {
            blob_state: open.flags,
            size,
            metadata,
        })
    }

    fn expire(&mut self, _session: u16) -> bool {
        self.abort_process();
        true
    }
}
