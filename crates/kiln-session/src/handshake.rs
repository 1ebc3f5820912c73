//! Open Session and RAKP 1-4 handlers.
//!
//! Each handler consumes one inbound payload and produces the full response
//! payload, success or failure; the caller frames it. Failure responses
//! carry the echoed message tag and a status code with the MAC fields
//! absent. A failed handshake leaves the session in `SetupInProgress` for
//! the reaper, except for a RAKP3 authentication mismatch, which marks the
//! session for teardown immediately.

use kiln_crypto::confidentiality::{ConfidentialityAlgorithm, CryptContext};
use kiln_crypto::integrity::{self, IntegrityContext};
use kiln_crypto::rakp::RakpAlgorithm;
use kiln_crypto::{CONST_2, CryptoError, ct_eq, rng};
use kiln_types::{NAME_ONLY_LOOKUP, Privilege, RakpStatus, SessionId, SessionState};
use kiln_wire::WireError;
use kiln_wire::rakp::{
    GUID_LEN, OpenSessionRequest, OpenSessionResponse, Rakp1Request, Rakp2Response, Rakp3Request,
    Rakp4Response,
};

use crate::SessionManager;
use crate::user::UserStore;

/// Ambient facts the handshake needs beyond the session map: the user
/// database seam, this BMC's GUID, and the channel this daemon serves.
pub struct HandshakeContext<'a> {
    pub users: &'a dyn UserStore,
    pub guid: [u8; GUID_LEN],
    pub channel: u8,
}

/// Handles an RMCP+ Open Session request.
///
/// Validates the proposed cipher suite against the supported set, creates a
/// session in `SetupInProgress`, and echoes the console's session id and
/// algorithm descriptors alongside the newly allocated BMC session id.
pub fn open_session(manager: &mut SessionManager, payload: &[u8]) -> Vec<u8> {
    let request = match OpenSessionRequest::parse(payload) {
        Ok(request) => request,
        Err(_) => {
            return OpenSessionResponse::failure(
                payload.first().copied().unwrap_or(0),
                SessionId::ZERO,
                RakpStatus::IllegalParameter,
            )
            .to_bytes();
        }
    };

    let failure = |status| {
        OpenSessionResponse::failure(request.message_tag, request.console_session_id, status)
            .to_bytes()
    };

    let Some(auth_algo) = RakpAlgorithm::from_wire(request.auth.algorithm) else {
        return failure(RakpStatus::InvalidAuthAlgo);
    };
    let Some(integrity_algo) =
        integrity::IntegrityAlgorithm::from_wire(request.integrity.algorithm)
    else {
        return failure(RakpStatus::InvalidIntegrityAlgo);
    };
    let Some(confidentiality_algo) =
        ConfidentialityAlgorithm::from_wire(request.confidentiality.algorithm)
    else {
        return failure(RakpStatus::InvalidConfAlgo);
    };

    // 0h means "highest level matching the proposed algorithms"; the
    // session ceiling becomes Administrator until RAKP1 applies the user's
    // real limits.
    let max_priv = if request.max_priv == 0 {
        Privilege::Admin.as_u8()
    } else {
        request.max_priv
    };

    let session = match manager.create(
        request.console_session_id,
        max_priv,
        auth_algo,
        integrity_algo,
        confidentiality_algo,
    ) {
        Ok(session) => session,
        Err(err) => {
            tracing::info!(error = %err, "open session refused");
            return failure(RakpStatus::InsufficientResource);
        }
    };
    session.touch();

    OpenSessionResponse {
        message_tag: request.message_tag,
        status: RakpStatus::NoError,
        max_priv,
        console_session_id: request.console_session_id,
        bmc_session_id: session.bmc_session_id(),
        auth: request.auth,
        integrity: request.integrity,
        confidentiality: request.confidentiality,
    }
    .to_bytes()
}

/// Handles RAKP message 1, producing RAKP message 2.
pub fn rakp12(
    manager: &mut SessionManager,
    ctx: &HandshakeContext<'_>,
    payload: &[u8],
) -> Vec<u8> {
    let tag = payload.first().copied().unwrap_or(0);
    let request = match Rakp1Request::parse(payload) {
        Ok(request) => request,
        Err(WireError::LengthMismatch) => {
            return Rakp2Response::failure(tag, RakpStatus::InvalidNameLength).to_bytes();
        }
        Err(_) => {
            return Rakp2Response::failure(tag, RakpStatus::IllegalParameter).to_bytes();
        }
    };
    let failure = |status| Rakp2Response::failure(request.message_tag, status).to_bytes();

    // Session id zero is reserved for the setup exchange itself.
    if request.bmc_session_id.is_zero() {
        tracing::info!("rakp1 addressed to the reserved session id");
        return failure(RakpStatus::InvalidSessionId);
    }
    let Ok(session) = manager.get_mut(request.bmc_session_id) else {
        tracing::info!(session = %request.bmc_session_id, "rakp1 for unknown session");
        return failure(RakpStatus::InvalidSessionId);
    };

    session.user_name = request.user_name.clone();
    session.touch();

    let bmc_random: [u8; 16] = rng::random_bytes();

    // Sessions are established at USER privilege regardless of the request;
    // a ceiling at or below CALLBACK is unusable.
    let Some(req_priv) = Privilege::from_nibble(request.req_max_priv) else {
        return failure(RakpStatus::UnauthRolePriv);
    };
    if req_priv <= Privilege::Callback {
        return failure(RakpStatus::UnauthRolePriv);
    }
    session.current_privilege = Privilege::User;
    session.req_max_priv = request.req_max_priv;

    // Null usernames are rejected outright.
    if request.user_name.is_empty() {
        return failure(RakpStatus::UnauthName);
    }

    let Some(user) = ctx.users.lookup(&request.user_name) else {
        tracing::info!("rakp1 user lookup failed");
        return failure(RakpStatus::UnauthName);
    };
    if !user.enabled {
        return failure(RakpStatus::InactiveRole);
    }
    if user.password.is_empty() {
        return failure(RakpStatus::UnauthName);
    }

    let access = ctx.users.channel_access(ctx.channel);
    if !access.enabled {
        tracing::info!(channel = ctx.channel, "channel access mode disabled");
        return failure(RakpStatus::InactiveRole);
    }

    session.user_id = Some(user.user_id);
    session.channel = ctx.channel;
    session.user_priv_limit = user.privilege_limit;
    session.channel_priv_limit = access.privilege_limit;
    session.ipmi_enabled = access.ipmi_enabled;

    // The granted privilege starts at the floor of every limit in play.
    let min_priv = access.privilege_limit.min(user.privilege_limit);
    if session.current_privilege > min_priv {
        session.current_privilege = min_priv;
    }

    // Privilege-qualified lookup requires the requested level to match the
    // user's configured limit exactly.
    if request.req_max_priv & NAME_ONLY_LOOKUP == 0
        && Privilege::from_nibble(request.req_max_priv) != Some(user.privilege_limit)
    {
        tracing::info!("username/privilege lookup failed for requested privilege");
        return failure(RakpStatus::UnauthName);
    }

    let console_session_id = session.console_session_id();
    let bmc_session_id = session.bmc_session_id();

    let auth = match session.auth_mut() {
        Ok(auth) => auth,
        Err(err) => {
            tracing::error!(error = %err, "rakp1 on a session without auth state");
            return failure(RakpStatus::IllegalParameter);
        }
    };
    auth.set_user_key(&user.password);
    auth.set_console_random(request.console_random);
    auth.set_bmc_random(bmc_random);

    // RAKP2 authentication code input, IPMI 2.0 §13.31:
    //   SID_C ‖ SID_M ‖ R_C ‖ R_M ‖ GUID_M ‖ ROLE_C ‖ ULEN ‖ UNAME
    let mut input = Vec::with_capacity(4 + 4 + 16 + 16 + GUID_LEN + 2 + request.user_name.len());
    input.extend_from_slice(&console_session_id.as_u32().to_le_bytes());
    input.extend_from_slice(&bmc_session_id.as_u32().to_le_bytes());
    input.extend_from_slice(&request.console_random);
    input.extend_from_slice(&bmc_random);
    input.extend_from_slice(&ctx.guid);
    input.push(request.req_max_priv);
    input.push(request.user_name.len() as u8);
    input.extend_from_slice(&request.user_name);

    let key_exchange_auth_code = auth.kex_hmac(&input);

    Rakp2Response {
        message_tag: request.message_tag,
        status: RakpStatus::NoError,
        console_session_id,
        bmc_random,
        bmc_guid: ctx.guid,
        key_exchange_auth_code,
    }
    .to_bytes()
}

/// Handles RAKP message 3, producing RAKP message 4.
///
/// On success the session installs its integrity algorithm, derives K2 and
/// installs AES-CBC-128, and transitions to `Active`. On an authentication
/// mismatch the session is stopped.
pub fn rakp34(
    manager: &mut SessionManager,
    ctx: &HandshakeContext<'_>,
    payload: &[u8],
) -> Vec<u8> {
    let tag = payload.first().copied().unwrap_or(0);
    let request = match Rakp3Request::parse(payload) {
        Ok(request) => request,
        Err(_) => {
            return Rakp4Response::failure(tag, SessionId::ZERO, RakpStatus::InvalidIntegrityValue)
                .to_bytes();
        }
    };
    let failure = |sid, status| Rakp4Response::failure(request.message_tag, sid, status).to_bytes();

    if request.bmc_session_id.is_zero() {
        tracing::info!("rakp3 addressed to the reserved session id");
        return failure(SessionId::ZERO, RakpStatus::InvalidSessionId);
    }
    let Ok(session) = manager.get_mut(request.bmc_session_id) else {
        tracing::info!(session = %request.bmc_session_id, "rakp3 for unknown session");
        return failure(SessionId::ZERO, RakpStatus::InvalidSessionId);
    };
    session.touch();

    let console_session_id = session.console_session_id();
    let bmc_session_id = session.bmc_session_id();
    let req_max_priv = session.req_max_priv;
    let user_name = session.user_name.clone();
    let negotiated_integrity = session.negotiated_integrity();

    let auth = match session.auth_mut() {
        Ok(auth) => auth,
        Err(err) => {
            tracing::error!(error = %err, "rakp3 on a session without auth state");
            return failure(console_session_id, RakpStatus::InvalidSessionId);
        }
    };

    // Expected RAKP3 authentication code, IPMI 2.0 §13.31:
    //   R_M ‖ SID_C ‖ ROLE_C ‖ ULEN ‖ UNAME
    let mut input = Vec::with_capacity(16 + 4 + 2 + user_name.len());
    input.extend_from_slice(auth.bmc_random());
    input.extend_from_slice(&console_session_id.as_u32().to_le_bytes());
    input.push(req_max_priv);
    input.push(user_name.len() as u8);
    input.extend_from_slice(&user_name);
    let expected = auth.kex_hmac(&input);

    if !ct_eq(&expected, &request.key_exchange_auth_code) {
        tracing::info!(session = %bmc_session_id, "rakp3 authentication code mismatch");
        let response = failure(console_session_id, RakpStatus::InvalidIntegrityValue);
        manager.request_teardown(bmc_session_id);
        return response;
    }

    // Session Integrity Key input:
    //   R_C ‖ R_M ‖ ROLE_C ‖ ULEN ‖ UNAME
    let mut sik_input = Vec::with_capacity(32 + 2 + user_name.len());
    sik_input.extend_from_slice(auth.console_random());
    sik_input.extend_from_slice(auth.bmc_random());
    sik_input.push(req_max_priv);
    sik_input.push(user_name.len() as u8);
    sik_input.extend_from_slice(&user_name);

    match auth.derive_sik(&sik_input) {
        Ok(()) => {}
        // A retransmitted RAKP3 after success: the SIK is immutable once
        // set, so answer from the existing key.
        Err(CryptoError::SikAlreadyDerived) => {}
        Err(err) => {
            tracing::error!(error = %err, "sik derivation failed");
            return failure(console_session_id, RakpStatus::IllegalParameter);
        }
    }

    // Integrity Check Value input: R_C ‖ SID_M ‖ GUID_M
    let mut icv_input = Vec::with_capacity(16 + 4 + GUID_LEN);
    icv_input.extend_from_slice(auth.console_random());
    icv_input.extend_from_slice(&bmc_session_id.as_u32().to_le_bytes());
    icv_input.extend_from_slice(&ctx.guid);

    let (integrity_check_value, sik) = match auth.icv(&icv_input) {
        Ok(icv) => (icv, auth.sik().expect("sik derived above").to_vec()),
        Err(err) => {
            tracing::error!(error = %err, "icv generation failed");
            return failure(console_session_id, RakpStatus::IllegalParameter);
        }
    };

    let integrity_ctx = IntegrityContext::new(negotiated_integrity, &sik);
    let k2 = integrity::derive_kn(negotiated_integrity, &sik, &CONST_2);
    let crypt_ctx = match CryptContext::new(&k2) {
        Ok(ctx) => ctx,
        Err(err) => {
            tracing::error!(error = %err, "k2 installation failed");
            return failure(console_session_id, RakpStatus::IllegalParameter);
        }
    };

    let session = manager
        .get_mut(bmc_session_id)
        .expect("session looked up above");
    session.install_integrity(integrity_ctx);
    session.install_confidentiality(crypt_ctx);
    session.state = SessionState::Active;

    tracing::debug!(session = %bmc_session_id, "session active");

    Rakp4Response {
        message_tag: request.message_tag,
        status: RakpStatus::NoError,
        console_session_id,
        integrity_check_value,
    }
    .to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::{ChannelAccess, MemoryUserStore};
    use kiln_crypto::rakp::AuthContext;
    use kiln_types::ChannelInstance;
    use kiln_wire::rakp::AlgorithmDescriptor;

    const GUID: [u8; 16] = [0xA5; 16];
    const CONSOLE_RANDOM: [u8; 16] = [0x3C; 16];

    fn open_request(console_id: u32, auth: u8, integ: u8, conf: u8, max_priv: u8) -> Vec<u8> {
        OpenSessionRequest {
            message_tag: 0x21,
            max_priv,
            console_session_id: SessionId::new(console_id),
            auth: AlgorithmDescriptor {
                payload_kind: 0,
                payload_len: 8,
                algorithm: auth,
            },
            integrity: AlgorithmDescriptor {
                payload_kind: 1,
                payload_len: 8,
                algorithm: integ,
            },
            confidentiality: AlgorithmDescriptor {
                payload_kind: 2,
                payload_len: 8,
                algorithm: conf,
            },
        }
        .to_bytes()
    }

    fn store_with_admin() -> MemoryUserStore {
        let mut store = MemoryUserStore::new();
        store.add_user(b"admin", b"PASSW0RD", Privilege::Admin);
        store
    }

    fn ctx(store: &MemoryUserStore) -> HandshakeContext<'_> {
        HandshakeContext {
            users: store,
            guid: GUID,
            channel: 1,
        }
    }

    /// The remote console's half of the handshake, for computing the HMACs
    /// the BMC must match.
    struct Console {
        auth: AuthContext,
        console_session_id: SessionId,
        bmc_session_id: SessionId,
        req_max_priv: u8,
        user_name: Vec<u8>,
    }

    impl Console {
        fn new(password: &[u8], console_sid: u32, bmc_session_id: SessionId) -> Self {
            let mut auth = AuthContext::new(RakpAlgorithm::HmacSha1);
            auth.set_user_key(password);
            auth.set_console_random(CONSOLE_RANDOM);
            Self {
                auth,
                console_session_id: SessionId::new(console_sid),
                bmc_session_id,
                req_max_priv: 0x04,
                user_name: b"admin".to_vec(),
            }
        }

        fn expected_rakp2_code(&self, bmc_random: &[u8; 16]) -> Vec<u8> {
            let mut input = Vec::new();
            input.extend_from_slice(&self.console_session_id.as_u32().to_le_bytes());
            input.extend_from_slice(&self.bmc_session_id.as_u32().to_le_bytes());
            input.extend_from_slice(&CONSOLE_RANDOM);
            input.extend_from_slice(bmc_random);
            input.extend_from_slice(&GUID);
            input.push(self.req_max_priv);
            input.push(self.user_name.len() as u8);
            input.extend_from_slice(&self.user_name);
            self.auth.kex_hmac(&input)
        }

        fn rakp3_code(&self, bmc_random: &[u8; 16]) -> Vec<u8> {
            let mut input = Vec::new();
            input.extend_from_slice(bmc_random);
            input.extend_from_slice(&self.console_session_id.as_u32().to_le_bytes());
            input.push(self.req_max_priv);
            input.push(self.user_name.len() as u8);
            input.extend_from_slice(&self.user_name);
            self.auth.kex_hmac(&input)
        }

        fn expected_icv(&mut self, bmc_random: &[u8; 16]) -> Vec<u8> {
            let mut sik_input = Vec::new();
            sik_input.extend_from_slice(&CONSOLE_RANDOM);
            sik_input.extend_from_slice(bmc_random);
            sik_input.push(self.req_max_priv);
            sik_input.push(self.user_name.len() as u8);
            sik_input.extend_from_slice(&self.user_name);
            self.auth.set_bmc_random(*bmc_random);
            self.auth.derive_sik(&sik_input).unwrap();

            let mut icv_input = Vec::new();
            icv_input.extend_from_slice(&CONSOLE_RANDOM);
            icv_input.extend_from_slice(&self.bmc_session_id.as_u32().to_le_bytes());
            icv_input.extend_from_slice(&GUID);
            self.auth.icv(&icv_input).unwrap()
        }
    }

    fn open(manager: &mut SessionManager, console_sid: u32) -> SessionId {
        let response = open_session(manager, &open_request(console_sid, 1, 1, 1, 0));
        let parsed = OpenSessionResponse::parse(&response).unwrap();
        assert_eq!(parsed.status, RakpStatus::NoError);
        parsed.bmc_session_id
    }

    fn rakp1_payload(console: &Console) -> Vec<u8> {
        Rakp1Request {
            message_tag: 0x01,
            bmc_session_id: console.bmc_session_id,
            console_random: CONSOLE_RANDOM,
            req_max_priv: console.req_max_priv,
            user_name: console.user_name.clone(),
        }
        .to_bytes()
    }

    #[test]
    fn open_session_rejects_unsupported_algorithms() {
        let mut manager = SessionManager::new(ChannelInstance::new(0));

        let response = open_session(&mut manager, &open_request(1, 0x00, 0x01, 0x01, 0));
        let parsed = OpenSessionResponse::parse(&response).unwrap();
        assert_eq!(parsed.status, RakpStatus::InvalidAuthAlgo);
        assert_eq!(parsed.message_tag, 0x21);

        let response = open_session(&mut manager, &open_request(1, 0x01, 0x02, 0x01, 0));
        assert_eq!(
            OpenSessionResponse::parse(&response).unwrap().status,
            RakpStatus::InvalidIntegrityAlgo
        );

        let response = open_session(&mut manager, &open_request(1, 0x01, 0x01, 0x02, 0));
        assert_eq!(
            OpenSessionResponse::parse(&response).unwrap().status,
            RakpStatus::InvalidConfAlgo
        );

        // None of the failures created a session.
        assert_eq!(manager.live_count(), 0);
    }

    #[test]
    fn open_session_zero_priv_means_admin() {
        let mut manager = SessionManager::new(ChannelInstance::new(0));
        let response = open_session(&mut manager, &open_request(0x1000_0001, 1, 1, 1, 0));
        let parsed = OpenSessionResponse::parse(&response).unwrap();
        assert_eq!(parsed.status, RakpStatus::NoError);
        assert_eq!(parsed.max_priv, Privilege::Admin.as_u8());
        assert!(!parsed.bmc_session_id.is_zero());
        assert_eq!(parsed.console_session_id, SessionId::new(0x1000_0001));
    }

    #[test]
    fn open_session_over_cap_reports_insufficient_resource() {
        let mut manager =
            SessionManager::new(ChannelInstance::new(0)).with_max_sessions(1);
        open(&mut manager, 1);
        let response = open_session(&mut manager, &open_request(2, 1, 1, 1, 0));
        assert_eq!(
            OpenSessionResponse::parse(&response).unwrap().status,
            RakpStatus::InsufficientResource
        );
    }

    #[test]
    fn full_handshake_activates_session() {
        let store = store_with_admin();
        let mut manager = SessionManager::new(ChannelInstance::new(0));
        let bmc_sid = open(&mut manager, 0x1000_0001);
        let mut console = Console::new(b"PASSW0RD", 0x1000_0001, bmc_sid);

        // RAKP 1 → 2
        let response = rakp12(&mut manager, &ctx(&store), &rakp1_payload(&console));
        let rakp2 = Rakp2Response::parse(&response).unwrap();
        assert_eq!(rakp2.status, RakpStatus::NoError);
        assert_eq!(rakp2.message_tag, 0x01);
        assert_eq!(rakp2.console_session_id, SessionId::new(0x1000_0001));
        assert_eq!(rakp2.bmc_guid, GUID);
        assert_eq!(
            rakp2.key_exchange_auth_code,
            console.expected_rakp2_code(&rakp2.bmc_random)
        );

        // RAKP 3 → 4
        let rakp3 = Rakp3Request {
            message_tag: 0x02,
            status: 0,
            bmc_session_id: bmc_sid,
            key_exchange_auth_code: console.rakp3_code(&rakp2.bmc_random),
        };
        let response = rakp34(&mut manager, &ctx(&store), &rakp3.to_bytes());
        let rakp4 = Rakp4Response::parse(&response).unwrap();
        assert_eq!(rakp4.status, RakpStatus::NoError);
        assert_eq!(rakp4.message_tag, 0x02);
        assert_eq!(
            rakp4.integrity_check_value,
            console.expected_icv(&rakp2.bmc_random)
        );

        let session = manager.get(bmc_sid).unwrap();
        assert_eq!(session.state, SessionState::Active);
        assert!(session.integrity().is_some());
        assert!(session.confidentiality().is_some());
        assert_eq!(session.current_privilege, Privilege::Admin);
        assert_eq!(session.user_name, b"admin");
    }

    #[test]
    fn rakp3_wrong_password_tears_down_session() {
        let store = store_with_admin();
        let mut manager = SessionManager::new(ChannelInstance::new(0));
        let bmc_sid = open(&mut manager, 0x1000_0001);
        let console = Console::new(b"PASSW0RD", 0x1000_0001, bmc_sid);

        let response = rakp12(&mut manager, &ctx(&store), &rakp1_payload(&console));
        let rakp2 = Rakp2Response::parse(&response).unwrap();

        // The console signs RAKP3 with the wrong key.
        let mut wrong = Console::new(b"wrong-password", 0x1000_0001, bmc_sid);
        wrong.auth.set_console_random(CONSOLE_RANDOM);
        let rakp3 = Rakp3Request {
            message_tag: 0x02,
            status: 0,
            bmc_session_id: bmc_sid,
            key_exchange_auth_code: wrong.rakp3_code(&rakp2.bmc_random),
        };
        let response = rakp34(&mut manager, &ctx(&store), &rakp3.to_bytes());
        let rakp4 = Rakp4Response::parse(&response).unwrap();
        assert_eq!(rakp4.status, RakpStatus::InvalidIntegrityValue);
        assert!(rakp4.integrity_check_value.is_empty());

        assert_eq!(
            manager.get(bmc_sid).unwrap().state,
            SessionState::TearDownInProgress
        );
    }

    #[test]
    fn retransmitted_rakp3_is_idempotent() {
        let store = store_with_admin();
        let mut manager = SessionManager::new(ChannelInstance::new(0));
        let bmc_sid = open(&mut manager, 0x1000_0001);
        let console = Console::new(b"PASSW0RD", 0x1000_0001, bmc_sid);

        let response = rakp12(&mut manager, &ctx(&store), &rakp1_payload(&console));
        let rakp2 = Rakp2Response::parse(&response).unwrap();
        let rakp3 = Rakp3Request {
            message_tag: 0x02,
            status: 0,
            bmc_session_id: bmc_sid,
            key_exchange_auth_code: console.rakp3_code(&rakp2.bmc_random),
        }
        .to_bytes();

        let first = rakp34(&mut manager, &ctx(&store), &rakp3);
        let second = rakp34(&mut manager, &ctx(&store), &rakp3);
        assert_eq!(first, second);
        assert_eq!(manager.get(bmc_sid).unwrap().state, SessionState::Active);
    }

    #[test]
    fn rakp1_rejects_session_zero_and_unknown_sessions() {
        let store = store_with_admin();
        let mut manager = SessionManager::new(ChannelInstance::new(0));

        let console = Console::new(b"PASSW0RD", 1, SessionId::ZERO);
        let response = rakp12(&mut manager, &ctx(&store), &rakp1_payload(&console));
        assert_eq!(
            Rakp2Response::parse(&response).unwrap().status,
            RakpStatus::InvalidSessionId
        );

        let console = Console::new(b"PASSW0RD", 1, SessionId::new(0xDEAD_BEEF));
        let response = rakp12(&mut manager, &ctx(&store), &rakp1_payload(&console));
        assert_eq!(
            Rakp2Response::parse(&response).unwrap().status,
            RakpStatus::InvalidSessionId
        );
    }

    #[test]
    fn rakp1_user_checks() {
        let mut store = store_with_admin();
        store.add_user(b"op", b"oppw", Privilege::Operator);
        store.add_user(b"ghost", b"", Privilege::User);
        let mut manager = SessionManager::new(ChannelInstance::new(0));

        // Unknown user.
        let bmc_sid = open(&mut manager, 1);
        let mut console = Console::new(b"x", 1, bmc_sid);
        console.user_name = b"nobody".to_vec();
        console.req_max_priv = 0x14; // name-only lookup
        let response = rakp12(&mut manager, &ctx(&store), &rakp1_payload(&console));
        assert_eq!(
            Rakp2Response::parse(&response).unwrap().status,
            RakpStatus::UnauthName
        );

        // Disabled user.
        store.set_enabled(b"op", false);
        let bmc_sid = open(&mut manager, 2);
        let mut console = Console::new(b"oppw", 2, bmc_sid);
        console.user_name = b"op".to_vec();
        console.req_max_priv = 0x13;
        let response = rakp12(&mut manager, &ctx(&store), &rakp1_payload(&console));
        assert_eq!(
            Rakp2Response::parse(&response).unwrap().status,
            RakpStatus::InactiveRole
        );

        // Empty password.
        let bmc_sid = open(&mut manager, 3);
        let mut console = Console::new(b"", 3, bmc_sid);
        console.user_name = b"ghost".to_vec();
        console.req_max_priv = 0x12;
        let response = rakp12(&mut manager, &ctx(&store), &rakp1_payload(&console));
        assert_eq!(
            Rakp2Response::parse(&response).unwrap().status,
            RakpStatus::UnauthName
        );

        // Null username.
        let bmc_sid = open(&mut manager, 4);
        let mut console = Console::new(b"x", 4, bmc_sid);
        console.user_name = Vec::new();
        let response = rakp12(&mut manager, &ctx(&store), &rakp1_payload(&console));
        assert_eq!(
            Rakp2Response::parse(&response).unwrap().status,
            RakpStatus::UnauthName
        );
    }

    #[test]
    fn rakp1_rejects_callback_ceiling() {
        let store = store_with_admin();
        let mut manager = SessionManager::new(ChannelInstance::new(0));
        let bmc_sid = open(&mut manager, 1);
        let mut console = Console::new(b"PASSW0RD", 1, bmc_sid);
        console.req_max_priv = 0x01; // Callback
        let response = rakp12(&mut manager, &ctx(&store), &rakp1_payload(&console));
        assert_eq!(
            Rakp2Response::parse(&response).unwrap().status,
            RakpStatus::UnauthRolePriv
        );
    }

    #[test]
    fn rakp1_rejects_disabled_channel() {
        let mut store = store_with_admin();
        store.set_channel_access(ChannelAccess {
            enabled: false,
            ..ChannelAccess::default()
        });
        let mut manager = SessionManager::new(ChannelInstance::new(0));
        let bmc_sid = open(&mut manager, 1);
        let console = Console::new(b"PASSW0RD", 1, bmc_sid);
        let response = rakp12(&mut manager, &ctx(&store), &rakp1_payload(&console));
        assert_eq!(
            Rakp2Response::parse(&response).unwrap().status,
            RakpStatus::InactiveRole
        );
    }

    #[test]
    fn rakp1_privilege_lookup_must_match_user_limit() {
        let store = store_with_admin();
        let mut manager = SessionManager::new(ChannelInstance::new(0));
        let bmc_sid = open(&mut manager, 1);
        let mut console = Console::new(b"PASSW0RD", 1, bmc_sid);
        // Privilege-qualified lookup (bit 4 clear) for Operator, but the
        // user's limit is Admin.
        console.req_max_priv = 0x03;
        let response = rakp12(&mut manager, &ctx(&store), &rakp1_payload(&console));
        assert_eq!(
            Rakp2Response::parse(&response).unwrap().status,
            RakpStatus::UnauthName
        );
    }

    #[test]
    fn rakp1_oversized_name_is_invalid_length() {
        let store = store_with_admin();
        let mut manager = SessionManager::new(ChannelInstance::new(0));
        let bmc_sid = open(&mut manager, 1);
        let mut console = Console::new(b"PASSW0RD", 1, bmc_sid);
        console.user_name = vec![b'x'; 17];
        let response = rakp12(&mut manager, &ctx(&store), &rakp1_payload(&console));
        assert_eq!(
            Rakp2Response::parse(&response).unwrap().status,
            RakpStatus::InvalidNameLength
        );
    }

    #[test]
    fn rakp3_for_unknown_session_fails() {
        let store = store_with_admin();
        let mut manager = SessionManager::new(ChannelInstance::new(0));
        let rakp3 = Rakp3Request {
            message_tag: 9,
            status: 0,
            bmc_session_id: SessionId::new(0xDEAD),
            key_exchange_auth_code: vec![0; 20],
        };
        let response = rakp34(&mut manager, &ctx(&store), &rakp3.to_bytes());
        assert_eq!(
            Rakp4Response::parse(&response).unwrap().status,
            RakpStatus::InvalidSessionId
        );
    }

    #[test]
    fn completed_handshake_does_not_block_new_console_session() {
        // A later Open Session with the same console session id must get a
        // fresh BMC id that does not collide with the still-live session.
        let store = store_with_admin();
        let mut manager = SessionManager::new(ChannelInstance::new(0));
        let first = open(&mut manager, 0x1000_0001);
        let console = Console::new(b"PASSW0RD", 0x1000_0001, first);
        let response = rakp12(&mut manager, &ctx(&store), &rakp1_payload(&console));
        let rakp2 = Rakp2Response::parse(&response).unwrap();
        let mut c2 = Console::new(b"PASSW0RD", 0x1000_0001, first);
        let rakp3 = Rakp3Request {
            message_tag: 2,
            status: 0,
            bmc_session_id: first,
            key_exchange_auth_code: c2.rakp3_code(&rakp2.bmc_random),
        };
        rakp34(&mut manager, &ctx(&store), &rakp3.to_bytes());

        let second = open(&mut manager, 0x1000_0001);
        assert_ne!(first, second);
        assert!(manager.get(first).is_ok());
        assert!(manager.get(second).is_ok());
    }
}
