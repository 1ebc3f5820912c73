//! The per-conversation session record.

use std::net::SocketAddr;
use std::time::Instant;

use kiln_crypto::confidentiality::{ConfidentialityAlgorithm, CryptContext};
use kiln_crypto::integrity::{IntegrityAlgorithm, IntegrityContext};
use kiln_crypto::rakp::{AuthContext, RakpAlgorithm};
use kiln_types::{
    Privilege, SessionHandle, SessionId, SessionSeqNumbers, SessionState,
};
use kiln_wire::rmcp::SessionCrypto;

use crate::{SessionError, SessionResult};

/// One established (or establishing) RMCP+ conversation.
///
/// The pseudo-session for id 0 uses the same type with no algorithms
/// installed; it exists so pre-session commands flow through the same
/// lookup path as everything else.
#[derive(Debug)]
pub struct Session {
    bmc_session_id: SessionId,
    console_session_id: SessionId,
    handle: SessionHandle,

    /// Lifecycle state. After `TearDownInProgress` the only permitted
    /// operation is destruction by the owning manager.
    pub state: SessionState,

    /// Privilege currently granted to the session.
    pub current_privilege: Privilege,
    /// Raw requested-maximum-privilege byte. Open Session seeds it with the
    /// normalized nibble; RAKP1 overwrites it with the console's exact byte
    /// (lookup-mode bit included) because that byte feeds the handshake
    /// HMACs.
    pub req_max_priv: u8,

    /// User identity bound at RAKP1 time.
    pub user_name: Vec<u8>,
    pub user_id: Option<u8>,
    pub channel: u8,
    /// Privilege ceilings discovered during RAKP1.
    pub user_priv_limit: Privilege,
    pub channel_priv_limit: Privilege,
    /// Whether IPMI messaging is enabled for this session's channel.
    pub ipmi_enabled: bool,

    /// Authenticated session sequence numbers.
    pub seq: SessionSeqNumbers,

    /// Where the last packet for this session came from; replies return to
    /// the same address.
    pub remote_addr: Option<SocketAddr>,

    negotiated_integrity: IntegrityAlgorithm,
    negotiated_confidentiality: ConfidentialityAlgorithm,

    auth: Option<AuthContext>,
    integrity: Option<IntegrityContext>,
    confidentiality: Option<CryptContext>,

    last_activity: Instant,
}

impl Session {
    /// Builds a session in `SetupInProgress` with the negotiated algorithm
    /// set recorded; key material arrives during RAKP.
    pub fn new(
        bmc_session_id: SessionId,
        console_session_id: SessionId,
        handle: SessionHandle,
        req_max_priv: u8,
        auth_algo: RakpAlgorithm,
        integrity_algo: IntegrityAlgorithm,
        confidentiality_algo: ConfidentialityAlgorithm,
    ) -> Self {
        Self {
            bmc_session_id,
            console_session_id,
            handle,
            state: SessionState::SetupInProgress,
            current_privilege: Privilege::User,
            req_max_priv,
            user_name: Vec::new(),
            user_id: None,
            channel: 0,
            user_priv_limit: Privilege::User,
            channel_priv_limit: Privilege::User,
            ipmi_enabled: true,
            seq: SessionSeqNumbers::default(),
            remote_addr: None,
            negotiated_integrity: integrity_algo,
            negotiated_confidentiality: confidentiality_algo,
            auth: Some(AuthContext::new(auth_algo)),
            integrity: None,
            confidentiality: None,
            last_activity: Instant::now(),
        }
    }

    /// The pseudo-session carrying pre-session traffic. Never holds keys
    /// and is never reaped.
    pub fn session_zero() -> Self {
        Self {
            bmc_session_id: SessionId::ZERO,
            console_session_id: SessionId::ZERO,
            handle: SessionHandle::INVALID,
            state: SessionState::Active,
            current_privilege: Privilege::HighestMatching,
            req_max_priv: 0,
            user_name: Vec::new(),
            user_id: None,
            channel: 0,
            user_priv_limit: Privilege::User,
            channel_priv_limit: Privilege::User,
            ipmi_enabled: true,
            seq: SessionSeqNumbers::default(),
            remote_addr: None,
            negotiated_integrity: IntegrityAlgorithm::HmacSha1_96,
            negotiated_confidentiality: ConfidentialityAlgorithm::AesCbc128,
            auth: None,
            integrity: None,
            confidentiality: None,
            last_activity: Instant::now(),
        }
    }

    pub fn bmc_session_id(&self) -> SessionId {
        self.bmc_session_id
    }

    pub fn console_session_id(&self) -> SessionId {
        self.console_session_id
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn negotiated_integrity(&self) -> IntegrityAlgorithm {
        self.negotiated_integrity
    }

    pub fn negotiated_confidentiality(&self) -> ConfidentialityAlgorithm {
        self.negotiated_confidentiality
    }

    /// Records activity now; the reaper measures idleness from this point.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub(crate) fn set_last_activity(&mut self, at: Instant) {
        self.last_activity = at;
    }

    /// Whether the session counts as active at `now`: the state's idle
    /// window must not have elapsed since the last transaction.
    pub fn is_active(&self, now: Instant) -> bool {
        match self.state.idle_window() {
            Some(window) => now.duration_since(self.last_activity) < window,
            None => false,
        }
    }

    pub fn auth(&self) -> SessionResult<&AuthContext> {
        self.auth.as_ref().ok_or(SessionError::AuthAlgoMissing)
    }

    pub fn auth_mut(&mut self) -> SessionResult<&mut AuthContext> {
        self.auth.as_mut().ok_or(SessionError::AuthAlgoMissing)
    }

    /// Installs the packet-integrity state; called once after RAKP4 is
    /// generated.
    pub fn install_integrity(&mut self, ctx: IntegrityContext) {
        self.integrity = Some(ctx);
    }

    /// Installs the payload-confidentiality state; called once after RAKP4.
    pub fn install_confidentiality(&mut self, ctx: CryptContext) {
        self.confidentiality = Some(ctx);
    }

    pub fn integrity(&self) -> Option<&IntegrityContext> {
        self.integrity.as_ref()
    }

    pub fn confidentiality(&self) -> Option<&CryptContext> {
        self.confidentiality.as_ref()
    }

    pub fn is_crypt_enabled(&self) -> bool {
        self.confidentiality.is_some()
    }

    /// Borrowed crypto view for the wire layer.
    pub fn crypto(&self) -> SessionCrypto<'_> {
        SessionCrypto {
            integrity: self.integrity.as_ref(),
            confidentiality: self.confidentiality.as_ref(),
        }
    }

    /// The outbound sequence number for the next packet: always 0 on the
    /// pseudo-session, pre-incremented otherwise.
    pub fn next_outbound_seq(&mut self) -> u32 {
        if self.bmc_session_id.is_zero() {
            0
        } else {
            self.seq.next_outbound()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_session() -> Session {
        Session::new(
            SessionId::new(0x4000_0001),
            SessionId::new(0x1000_0001),
            SessionHandle::new(0x41),
            0x04,
            RakpAlgorithm::HmacSha1,
            IntegrityAlgorithm::HmacSha1_96,
            ConfidentialityAlgorithm::AesCbc128,
        )
    }

    #[test]
    fn new_session_is_in_setup() {
        let session = sample_session();
        assert_eq!(session.state, SessionState::SetupInProgress);
        assert!(session.auth().is_ok());
        assert!(session.integrity().is_none());
        assert!(session.confidentiality().is_none());
    }

    #[test]
    fn session_zero_has_no_algorithms() {
        let zero = Session::session_zero();
        assert!(zero.bmc_session_id().is_zero());
        assert_eq!(zero.auth().unwrap_err(), SessionError::AuthAlgoMissing);
        assert!(!zero.is_crypt_enabled());
    }

    #[test]
    fn session_zero_outbound_seq_stays_zero() {
        let mut zero = Session::session_zero();
        assert_eq!(zero.next_outbound_seq(), 0);
        assert_eq!(zero.next_outbound_seq(), 0);

        let mut session = sample_session();
        assert_eq!(session.next_outbound_seq(), 1);
        assert_eq!(session.next_outbound_seq(), 2);
    }

    #[test]
    fn activity_windows_per_state() {
        let mut session = sample_session();
        let now = Instant::now();

        session.set_last_activity(now);
        assert!(session.is_active(now + Duration::from_secs(4)));
        assert!(!session.is_active(now + Duration::from_secs(5)));

        session.state = SessionState::Active;
        assert!(session.is_active(now + Duration::from_secs(59)));
        assert!(!session.is_active(now + Duration::from_secs(60)));

        session.state = SessionState::TearDownInProgress;
        assert!(!session.is_active(now));
    }
}
