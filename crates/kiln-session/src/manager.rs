//! Session creation, lookup, and teardown.

use std::collections::HashMap;
use std::time::Instant;

use kiln_crypto::confidentiality::ConfidentialityAlgorithm;
use kiln_crypto::integrity::IntegrityAlgorithm;
use kiln_crypto::rakp::RakpAlgorithm;
use kiln_crypto::rng;
use kiln_types::{
    ChannelInstance, MAX_SESSIONS_PER_CHANNEL, SessionHandle, SessionId, SessionState,
};

use crate::{Session, SessionError, SessionResult};

/// Owns every live session for one channel daemon.
///
/// The map always contains the pseudo-session for id 0; it is created at
/// construction and lives for the manager's lifetime.
#[derive(Debug)]
pub struct SessionManager {
    instance: ChannelInstance,
    sessions: HashMap<SessionId, Session>,
    /// Handle slots 1..=15; slot 0 is the reserved invalid handle. Each
    /// occupied slot holds the session id it was assigned to.
    handle_slots: [Option<SessionId>; MAX_SESSIONS_PER_CHANNEL + 1],
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(instance: ChannelInstance) -> Self {
        let mut sessions = HashMap::new();
        sessions.insert(SessionId::ZERO, Session::session_zero());
        Self {
            instance,
            sessions,
            handle_slots: [None; MAX_SESSIONS_PER_CHANNEL + 1],
            max_sessions: MAX_SESSIONS_PER_CHANNEL,
        }
    }

    /// Overrides the per-channel session cap (configuration hook).
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.min(MAX_SESSIONS_PER_CHANNEL);
        self
    }

    pub fn instance(&self) -> ChannelInstance {
        self.instance
    }

    /// Creates a session for an Open Session request.
    ///
    /// Sweeps stale sessions first, enforces the per-channel cap, draws a
    /// collision-free session id from the CSPRNG, and assigns a short
    /// handle.
    pub fn create(
        &mut self,
        console_session_id: SessionId,
        req_max_priv: u8,
        auth_algo: RakpAlgorithm,
        integrity_algo: IntegrityAlgorithm,
        confidentiality_algo: ConfidentialityAlgorithm,
    ) -> SessionResult<&mut Session> {
        self.reap(Instant::now());

        // The pseudo-session does not count against the cap.
        if self.sessions.len() - 1 >= self.max_sessions {
            tracing::info!("no free RMCP+ sessions left");
            return Err(SessionError::InsufficientResources);
        }

        let bmc_session_id = loop {
            let id = SessionId::compose(rng::random_u32(), self.instance);
            // Collisions against the live set (and the reserved id 0, which
            // a zero draw would produce on instance 0) are retried.
            if !id.is_zero() && !self.sessions.contains_key(&id) {
                break id;
            }
        };

        let slot = self
            .free_slot()
            .ok_or(SessionError::InsufficientResources)?;
        let handle = SessionHandle::compose(slot, self.instance);
        self.handle_slots[usize::from(slot)] = Some(bmc_session_id);

        let session = Session::new(
            bmc_session_id,
            console_session_id,
            handle,
            req_max_priv,
            auth_algo,
            integrity_algo,
            confidentiality_algo,
        );
        tracing::debug!(
            session = %bmc_session_id,
            handle = %handle,
            "session created"
        );

        Ok(self
            .sessions
            .entry(bmc_session_id)
            .or_insert(session))
    }

    fn free_slot(&self) -> Option<u8> {
        (1..=self.max_sessions as u8).find(|&slot| self.handle_slots[usize::from(slot)].is_none())
    }

    pub fn get(&self, id: SessionId) -> SessionResult<&Session> {
        self.sessions
            .get(&id)
            .ok_or(SessionError::NotFound(id.as_u32()))
    }

    pub fn get_mut(&mut self, id: SessionId) -> SessionResult<&mut Session> {
        self.sessions
            .get_mut(&id)
            .ok_or(SessionError::NotFound(id.as_u32()))
    }

    /// Lookup by the remote console's session id.
    pub fn get_by_console_id(&self, console_id: SessionId) -> Option<&Session> {
        self.sessions
            .values()
            .find(|s| !s.bmc_session_id().is_zero() && s.console_session_id() == console_id)
    }

    /// Resolves a handle slot to the session id it was assigned to.
    pub fn session_id_by_handle(&self, handle: SessionHandle) -> Option<SessionId> {
        let slot = usize::from(handle.slot());
        if slot == 0 || slot > self.max_sessions {
            return None;
        }
        self.handle_slots[slot]
    }

    /// Marks a session for teardown; the owning loop performs the release.
    pub fn request_teardown(&mut self, id: SessionId) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) if !id.is_zero() => {
                session.state = SessionState::TearDownInProgress;
                true
            }
            _ => false,
        }
    }

    /// Removes a session outright, releasing its handle slot.
    pub fn remove(&mut self, id: SessionId) -> bool {
        if id.is_zero() {
            return false;
        }
        if let Some(session) = self.sessions.remove(&id) {
            self.handle_slots[usize::from(session.handle().slot())] = None;
            tracing::debug!(session = %id, "session removed");
            true
        } else {
            false
        }
    }

    /// Evicts every session whose activity predicate fails at `now`.
    /// Session 0 is never evicted. Returns the evicted ids so the caller
    /// can release dependent state (SOL contexts, timers).
    pub fn reap(&mut self, now: Instant) -> Vec<SessionId> {
        let stale: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(id, session)| !id.is_zero() && !session.is_active(now))
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.remove(*id);
            tracing::debug!(session = %id, "stale session reaped");
        }
        stale
    }

    /// Count of sessions currently in the `Active` state.
    pub fn active_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| !s.bmc_session_id().is_zero() && s.state == SessionState::Active)
            .count()
    }

    /// Total live sessions excluding the pseudo-session.
    pub fn live_count(&self) -> usize {
        self.sessions.len() - 1
    }

    /// Iterates live sessions (excluding session 0).
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions
            .values()
            .filter(|s| !s.bmc_session_id().is_zero())
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, id: SessionId, before: std::time::Duration) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.set_last_activity(Instant::now() - before);
        }
    }
}
