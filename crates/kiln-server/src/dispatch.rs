//! Inbound packet dispatch.
//!
//! One datagram in, zero or one packet out (SOL can also emit
//! retransmissions and piggybacked data from timers). The flow mirrors the
//! session header: peek the session id, look up the session, verify and
//! decrypt with its installed algorithms, then route on payload type.
//! Packets that fail integrity verification are dropped with no response.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use kiln_session::commands::PeerDaemon;
use kiln_session::handshake::{self, HandshakeContext};
use kiln_session::user::UserStore;
use kiln_session::{SessionManager, commands};
use kiln_sol::{SolManager, SolServices, SolTimerKind, commands as sol_commands};
use kiln_types::{CompletionCode, PayloadType, SessionId, SessionState};
use kiln_wire::rmcp::{self, OutboundMessage, SessionCrypto, SessionFormat};
use kiln_wire::sol::SolPayload;
use kiln_wire::{WireError, ipmi};

use crate::command_table::{
    BuiltinCommand, CommandDispatcher, CommandTable, Continuation, ReplyQueue, ReplyTicket,
};
use crate::timers::TimerKey;

/// The netfn and command of the unsolicited "SOL activating" request.
const NETFN_TRANSPORT: u8 = 0x0C;
const CMD_SOL_ACTIVATING: u8 = 0x20;

/// Shared state for the daemon, owned by the event loop and passed into
/// every handler as one aggregate.
pub struct Services {
    pub sessions: SessionManager,
    pub sol: SolManager,
    pub users: Box<dyn UserStore>,
    pub peers: Box<dyn PeerDaemon>,
    pub guid: [u8; 16],
    pub channel: u8,
}


/// Effects the dispatcher needs from the event loop: the UDP socket, the
/// host console pipe, and the timer queue.
pub trait ServerEffects {
    fn send_packet(&mut self, addr: SocketAddr, packet: &[u8]);
    fn write_console(&mut self, data: &[u8]) -> std::io::Result<()>;
    fn arm_timer(&mut self, key: TimerKey, after: Duration);
    fn cancel_timer(&mut self, key: TimerKey);
}

/// SOL effect adapter.
///
/// Payload sends are deferred: the SOL core runs while the session map is
/// borrowed elsewhere, so sends are queued here and framed by
/// [`flush_sol`] once the map is free again.
struct SolBridge<'a> {
    effects: &'a mut dyn ServerEffects,
    pending_payloads: Vec<(SessionId, Vec<u8>)>,
    pending_activating: Vec<(u8, SessionId)>,
}

impl<'a> SolBridge<'a> {
    fn new(effects: &'a mut dyn ServerEffects) -> Self {
        Self {
            effects,
            pending_payloads: Vec::new(),
            pending_activating: Vec::new(),
        }
    }
}

impl SolServices for SolBridge<'_> {
    fn write_console(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.effects.write_console(data)
    }

    fn send_payload(&mut self, session_id: SessionId, payload: &[u8]) {
        self.pending_payloads.push((session_id, payload.to_vec()));
    }

    fn send_activating(&mut self, instance: u8, session_id: SessionId) {
        self.pending_activating.push((instance, session_id));
    }

    fn arm_timer(&mut self, instance: u8, kind: SolTimerKind, after: Duration) {
        self.effects.arm_timer(TimerKey::Sol { instance, kind }, after);
    }

    fn cancel_timer(&mut self, instance: u8, kind: SolTimerKind) {
        self.effects.cancel_timer(TimerKey::Sol { instance, kind });
    }
}

/// Frames and transmits everything a SOL call queued.
fn flush_sol(sessions: &mut SessionManager, bridge: SolBridge<'_>) {
    let SolBridge {
        effects,
        pending_payloads,
        pending_activating,
    } = bridge;

    for (session_id, payload) in pending_payloads {
        send_on_session(
            sessions,
            effects,
            session_id,
            PayloadType::Sol,
            None,
            payload,
        );
    }

    for (instance, session_id) in pending_activating {
        // SOL payload version 1.0.
        let body = ipmi::build_request(NETFN_TRANSPORT, CMD_SOL_ACTIVATING, &[0, instance, 1, 0]);
        send_on_session(
            sessions,
            effects,
            session_id,
            PayloadType::Ipmi,
            None,
            body,
        );
    }
}

/// Frames a payload on an established session and sends it to the
/// session's remote address (or `addr_override` for the datagram currently
/// being answered).
///
/// Authentication and encryption follow the session's installed
/// algorithms.
fn send_on_session(
    sessions: &mut SessionManager,
    effects: &mut dyn ServerEffects,
    session_id: SessionId,
    payload_type: PayloadType,
    addr_override: Option<SocketAddr>,
    payload: Vec<u8>,
) {
    let Ok(session) = sessions.get_mut(session_id) else {
        tracing::debug!(session = %session_id, "response for a vanished session dropped");
        return;
    };
    let Some(addr) = addr_override.or(session.remote_addr) else {
        tracing::debug!(session = %session_id, "session has no remote address yet");
        return;
    };

    let msg = OutboundMessage {
        payload_type,
        wire_session_id: session.console_session_id(),
        payload,
        encrypt: session.confidentiality().is_some(),
        authenticate: session.integrity().is_some(),
    };
    let seq = session.next_outbound_seq();
    match rmcp::flatten_ipmi20(&msg, seq, &session.crypto()) {
        Ok(packet) => effects.send_packet(addr, &packet),
        Err(err) => tracing::error!(error = %err, "framing outbound packet failed"),
    }
}

/// Sends a session-setup response (always unauthenticated, session id 0).
fn send_setup_response(
    effects: &mut dyn ServerEffects,
    addr: SocketAddr,
    payload_type: PayloadType,
    payload: Vec<u8>,
) {
    let msg = OutboundMessage {
        payload_type,
        wire_session_id: SessionId::ZERO,
        payload,
        encrypt: false,
        authenticate: false,
    };
    match rmcp::flatten_ipmi20(&msg, 0, &SessionCrypto::NONE) {
        Ok(packet) => effects.send_packet(addr, &packet),
        Err(err) => tracing::error!(error = %err, "framing setup response failed"),
    }
}

/// Handles one inbound datagram.
pub fn handle_datagram(
    services: &mut Services,
    table: &CommandTable,
    dispatcher: &mut dyn CommandDispatcher,
    replies: &ReplyQueue,
    effects: &mut dyn ServerEffects,
    datagram: &[u8],
    peer: SocketAddr,
) {
    let (_, session_id) = match rmcp::peek_session_id(datagram) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::debug!(%peer, error = %err, "malformed packet dropped");
            return;
        }
    };

    let msg = {
        let Ok(session) = services.sessions.get(session_id) else {
            tracing::debug!(%peer, session = %session_id, "packet for unknown session dropped");
            return;
        };
        match rmcp::unflatten(datagram, &session.crypto()) {
            Ok(msg) => msg,
            Err(WireError::IntegrityCheckFailed) => {
                // Silent drop: no response that could serve as an oracle.
                tracing::debug!(%peer, session = %session_id, "integrity check failed");
                return;
            }
            Err(err) => {
                tracing::debug!(%peer, error = %err, "undecodable packet dropped");
                return;
            }
        }
    };

    if let Ok(session) = services.sessions.get_mut(session_id) {
        session.touch();
        session.remote_addr = Some(peer);
        // Recorded, not enforced: replay acceptance is unchanged from
        // established BMC behaviour.
        session.seq.record_inbound(msg.session_seq);
    }

    match msg.payload_type {
        PayloadType::OpenSessionRequest => {
            let response = handshake::open_session(&mut services.sessions, &msg.payload);
            send_setup_response(effects, peer, PayloadType::OpenSessionResponse, response);
        }
        PayloadType::Rakp1 => {
            let ctx = HandshakeContext {
                users: services.users.as_ref(),
                guid: services.guid,
                channel: services.channel,
            };
            let response = handshake::rakp12(&mut services.sessions, &ctx, &msg.payload);
            send_setup_response(effects, peer, PayloadType::Rakp2, response);
        }
        PayloadType::Rakp3 => {
            let ctx = HandshakeContext {
                users: services.users.as_ref(),
                guid: services.guid,
                channel: services.channel,
            };
            let response = handshake::rakp34(&mut services.sessions, &ctx, &msg.payload);
            send_setup_response(effects, peer, PayloadType::Rakp4, response);
        }
        PayloadType::Ipmi => {
            handle_ipmi(
                services, table, dispatcher, replies, effects, session_id, peer, &msg,
            );
        }
        PayloadType::Sol => {
            handle_sol(services, effects, session_id, &msg.payload);
        }
        PayloadType::OpenSessionResponse | PayloadType::Rakp2 | PayloadType::Rakp4 => {
            tracing::debug!(%peer, "console-bound payload type from the network dropped");
        }
    }

    release_torn_down(services, effects);
}

fn handle_sol(
    services: &mut Services,
    effects: &mut dyn ServerEffects,
    session_id: SessionId,
    payload: &[u8],
) {
    if session_id.is_zero() {
        tracing::debug!("SOL payload on the sessionless channel dropped");
        return;
    }
    match services.sessions.get(session_id) {
        Ok(session) if session.state == SessionState::Active => {}
        _ => {
            tracing::debug!(session = %session_id, "SOL payload without an active session");
            return;
        }
    }
    let Ok(frame) = SolPayload::parse(payload) else {
        tracing::debug!(session = %session_id, "undersized SOL payload dropped");
        return;
    };

    let mut bridge = SolBridge::new(&mut *effects);
    services.sol.process_inbound(session_id, &frame, &mut bridge);
    flush_sol(&mut services.sessions, bridge);
}

#[allow(clippy::too_many_arguments)]
fn handle_ipmi(
    services: &mut Services,
    table: &CommandTable,
    dispatcher: &mut dyn CommandDispatcher,
    replies: &ReplyQueue,
    effects: &mut dyn ServerEffects,
    session_id: SessionId,
    peer: SocketAddr,
    msg: &rmcp::InboundMessage,
) {
    let Ok(request) = ipmi::IpmiRequest::parse(&msg.payload) else {
        tracing::debug!(%peer, "undersized IPMI frame dropped");
        return;
    };

    let respond = |services: &mut Services, effects: &mut dyn ServerEffects, body: &[u8]| {
        let framed = request.build_response(body);
        if msg.format == SessionFormat::Ipmi15 {
            // Legacy discovery traffic answers in kind.
            let packet = rmcp::flatten_ipmi15(SessionId::ZERO, &framed);
            effects.send_packet(peer, &packet);
        } else {
            send_on_session(
                &mut services.sessions,
                effects,
                session_id,
                PayloadType::Ipmi,
                Some(peer),
                framed,
            );
        }
    };

    // IPMI messaging can be disabled per channel; the session carries the
    // verdict from RAKP1 time.
    if !session_id.is_zero() {
        let enabled = services
            .sessions
            .get(session_id)
            .map(|s| s.ipmi_enabled)
            .unwrap_or(false);
        if !enabled {
            respond(
                services,
                effects,
                &[CompletionCode::INSUFFICIENT_PRIVILEGE.as_u8()],
            );
            return;
        }
    }

    let key = request.command_key();
    let Some(entry) = table.lookup(key) else {
        // Not ours: hand it to the outer pipeline with a continuation.
        let ticket = ReplyTicket {
            session_id,
            request: request.clone(),
            encrypted: msg.encrypted,
            authenticated: msg.authenticated,
        };
        dispatcher.execute(key, request.data.clone(), Continuation::new(ticket, replies.clone()));
        return;
    };

    // The privilege floor: session 0 operates at HighestMatching, which
    // only clears floor-zero (sessionless) commands.
    let current = services
        .sessions
        .get(session_id)
        .map(|s| s.current_privilege)
        .unwrap_or(kiln_types::Privilege::HighestMatching);
    if entry.privilege > current {
        respond(
            services,
            effects,
            &[CompletionCode::INSUFFICIENT_PRIVILEGE.as_u8()],
        );
        return;
    }

    let body = execute_builtin(services, effects, session_id, entry.command, &request.data);
    respond(services, effects, &body);
}

fn execute_builtin(
    services: &mut Services,
    effects: &mut dyn ServerEffects,
    session_id: SessionId,
    command: BuiltinCommand,
    data: &[u8],
) -> Vec<u8> {
    match command {
        BuiltinCommand::GetChannelAuthCapabilities => {
            channel_auth_capabilities(services.channel, data)
        }
        BuiltinCommand::SetSessionPrivilege => {
            commands::set_session_privilege(&mut services.sessions, session_id, data)
        }
        BuiltinCommand::CloseSession => commands::close_session(
            &mut services.sessions,
            services.peers.as_mut(),
            session_id,
            data,
        ),
        BuiltinCommand::ActivatePayload => {
            let mut bridge = SolBridge::new(&mut *effects);
            let body = sol_commands::activate_payload(
                &mut services.sol,
                &services.sessions,
                services.users.as_ref(),
                session_id,
                data,
                &mut bridge,
            );
            flush_sol(&mut services.sessions, bridge);
            body
        }
        BuiltinCommand::DeactivatePayload => {
            let mut bridge = SolBridge::new(&mut *effects);
            let body = sol_commands::deactivate_payload(&mut services.sol, data, &mut bridge);
            flush_sol(&mut services.sessions, bridge);
            body
        }
        BuiltinCommand::GetPayloadStatus => sol_commands::get_payload_status(&services.sol, data),
        BuiltinCommand::GetPayloadInfo => sol_commands::get_payload_info(&services.sol, data),
        BuiltinCommand::SetSolConfiguration => {
            sol_commands::set_configuration(&mut services.sol, data)
        }
        BuiltinCommand::GetSolConfiguration => sol_commands::get_configuration(&services.sol, data),
    }
}

/// Get Channel Authentication Capabilities (NetFn App, cmd 38h), v2.0
/// extended data. Pre-session discovery: tells the console this channel
/// speaks RMCP+ and requires non-null users.
fn channel_auth_capabilities(channel: u8, data: &[u8]) -> Vec<u8> {
    if data.len() < 2 {
        return vec![CompletionCode::REQ_DATA_LEN_INVALID.as_u8()];
    }
    let requested = data[0] & 0x0F;
    // 0Eh means "the channel this request arrived on".
    if requested != 0x0E && requested != channel {
        return vec![CompletionCode::INVALID_FIELD_REQUEST.as_u8()];
    }

    vec![
        CompletionCode::SUCCESS.as_u8(),
        channel,
        0x80, // IPMI v2.0+ extended capabilities; RMCP+ only
        0x04, // non-null usernames enabled
        0x02, // channel supports IPMI v2.0 connections
        0x00,
        0x00,
        0x00, // OEM id
        0x00, // OEM auxiliary
    ]
}

/// Drains replies completed by the external dispatcher.
pub fn flush_replies(services: &mut Services, effects: &mut dyn ServerEffects, replies: &ReplyQueue) {
    loop {
        let Some((ticket, body)) = replies.borrow_mut().pop_front() else {
            return;
        };
        let framed = ticket.request.build_response(&body);
        send_on_session(
            &mut services.sessions,
            effects,
            ticket.session_id,
            PayloadType::Ipmi,
            None,
            framed,
        );
    }
}

/// Removes sessions marked for teardown, cancelling their SOL state.
pub fn release_torn_down(services: &mut Services, effects: &mut dyn ServerEffects) {
    let torn: Vec<SessionId> = services
        .sessions
        .iter()
        .filter(|s| s.state == SessionState::TearDownInProgress)
        .map(|s| s.bmc_session_id())
        .collect();
    for session_id in torn {
        let mut bridge = SolBridge::new(&mut *effects);
        services.sol.stop_session(session_id, &mut bridge);
        flush_sol(&mut services.sessions, bridge);
        services.sessions.remove(session_id);
        tracing::debug!(session = %session_id, "session torn down");
    }
}

/// Periodic reaper tick: evicts idle sessions and their SOL state.
pub fn reap_sessions(services: &mut Services, effects: &mut dyn ServerEffects) {
    let evicted = services.sessions.reap(Instant::now());
    for session_id in evicted {
        let mut bridge = SolBridge::new(&mut *effects);
        services.sol.stop_session(session_id, &mut bridge);
        flush_sol(&mut services.sessions, bridge);
    }
    release_torn_down(services, effects);
}

/// Handles a fired timer.
pub fn handle_timer(services: &mut Services, effects: &mut dyn ServerEffects, key: TimerKey) {
    match key {
        TimerKey::Sol { instance, kind } => {
            let mut bridge = SolBridge::new(&mut *effects);
            match kind {
                SolTimerKind::Accumulate => {
                    services.sol.handle_accumulate_timer(instance, &mut bridge);
                }
                SolTimerKind::Retry => {
                    services.sol.handle_retry_timer(instance, &mut bridge);
                }
            }
            flush_sol(&mut services.sessions, bridge);
        }
        TimerKey::SessionReaper => reap_sessions(services, effects),
    }
}

/// Feeds host console output into SOL.
pub fn console_input(services: &mut Services, effects: &mut dyn ServerEffects, data: &[u8]) {
    let mut bridge = SolBridge::new(&mut *effects);
    services.sol.console_input(data, &mut bridge);
    flush_sol(&mut services.sessions, bridge);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_table::NullDispatcher;
    use kiln_session::commands::NoPeers;
    use kiln_session::user::MemoryUserStore;
    use kiln_types::{ChannelInstance, Privilege};
    use kiln_wire::rakp::{
        AlgorithmDescriptor, OpenSessionRequest, OpenSessionResponse, Rakp1Request, Rakp2Response,
        Rakp3Request, Rakp4Response,
    };
    use std::cell::RefCell;
    use std::rc::Rc;

    const PEER: &str = "192.0.2.9:54321";

    #[derive(Debug, Default)]
    struct FakeEffectsState {
        packets: Vec<(SocketAddr, Vec<u8>)>,
        console: Vec<u8>,
        armed: Vec<TimerKey>,
        cancelled: Vec<TimerKey>,
    }

    #[derive(Debug, Clone, Default)]
    struct FakeEffects(Rc<RefCell<FakeEffectsState>>);

    impl ServerEffects for FakeEffects {
        fn send_packet(&mut self, addr: SocketAddr, packet: &[u8]) {
            self.0.borrow_mut().packets.push((addr, packet.to_vec()));
        }

        fn write_console(&mut self, data: &[u8]) -> std::io::Result<()> {
            self.0.borrow_mut().console.extend_from_slice(data);
            Ok(())
        }

        fn arm_timer(&mut self, key: TimerKey, _after: Duration) {
            self.0.borrow_mut().armed.push(key);
        }

        fn cancel_timer(&mut self, key: TimerKey) {
            self.0.borrow_mut().cancelled.push(key);
        }
    }

    struct Harness {
        services: Services,
        table: CommandTable,
        dispatcher: NullDispatcher,
        replies: ReplyQueue,
        effects: FakeEffects,
        peer: SocketAddr,
    }

    impl Harness {
        fn new() -> Self {
            let mut users = MemoryUserStore::new();
            users.add_user(b"admin", b"PASSW0RD", Privilege::Admin);
            Self {
                services: Services {
                    sessions: SessionManager::new(ChannelInstance::new(0)),
                    sol: SolManager::default(),
                    users: Box::new(users),
                    peers: Box::new(NoPeers),
                    guid: [0xA5; 16],
                    channel: 1,
                },
                table: CommandTable::with_builtin_commands(),
                dispatcher: NullDispatcher,
                replies: ReplyQueue::default(),
                effects: FakeEffects::default(),
                peer: PEER.parse().unwrap(),
            }
        }

        fn deliver(&mut self, datagram: &[u8]) {
            let mut effects = self.effects.clone();
            handle_datagram(
                &mut self.services,
                &self.table,
                &mut self.dispatcher,
                &self.replies,
                &mut effects,
                datagram,
                self.peer,
            );
        }

        fn sent_packets(&self) -> Vec<Vec<u8>> {
            self.effects
                .0
                .borrow()
                .packets
                .iter()
                .map(|(_, p)| p.clone())
                .collect()
        }

        fn last_payload(&self) -> rmcp::InboundMessage {
            let packets = self.sent_packets();
            let packet = packets.last().expect("a response was sent");
            rmcp::unflatten(packet, &SessionCrypto::NONE).unwrap()
        }
    }

    fn open_session_packet(console_sid: u32) -> Vec<u8> {
        let payload = OpenSessionRequest {
            message_tag: 0x01,
            max_priv: 0,
            console_session_id: SessionId::new(console_sid),
            auth: AlgorithmDescriptor {
                payload_kind: 0,
                payload_len: 8,
                algorithm: 1,
            },
            integrity: AlgorithmDescriptor {
                payload_kind: 1,
                payload_len: 8,
                algorithm: 1,
            },
            confidentiality: AlgorithmDescriptor {
                payload_kind: 2,
                payload_len: 8,
                algorithm: 1,
            },
        }
        .to_bytes();
        let msg = OutboundMessage {
            payload_type: PayloadType::OpenSessionRequest,
            wire_session_id: SessionId::ZERO,
            payload,
            encrypt: false,
            authenticate: false,
        };
        rmcp::flatten_ipmi20(&msg, 0, &SessionCrypto::NONE).unwrap()
    }

    fn setup_packet(payload_type: PayloadType, payload: Vec<u8>) -> Vec<u8> {
        let msg = OutboundMessage {
            payload_type,
            wire_session_id: SessionId::ZERO,
            payload,
            encrypt: false,
            authenticate: false,
        };
        rmcp::flatten_ipmi20(&msg, 0, &SessionCrypto::NONE).unwrap()
    }

    #[test]
    fn malformed_and_unknown_session_packets_drop_silently() {
        let mut harness = Harness::new();
        harness.deliver(&[0xFF; 3]);
        harness.deliver(&[0xFF; 64]);

        // Valid framing for a session that does not exist.
        let msg = OutboundMessage {
            payload_type: PayloadType::Ipmi,
            wire_session_id: SessionId::new(0xDEAD_BEEF),
            payload: vec![0; 7],
            encrypt: false,
            authenticate: false,
        };
        let mut packet = rmcp::flatten_ipmi20(&msg, 1, &SessionCrypto::NONE).unwrap();
        // Point the inner session id somewhere unknown too.
        packet[6..10].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        harness.deliver(&packet);

        assert!(harness.sent_packets().is_empty());
    }

    #[test]
    fn full_handshake_over_dispatch() {
        let mut harness = Harness::new();

        harness.deliver(&open_session_packet(0x1000_0001));
        let response = harness.last_payload();
        assert_eq!(response.payload_type, PayloadType::OpenSessionResponse);
        assert_eq!(response.session_id, SessionId::ZERO);
        let open = OpenSessionResponse::parse(&response.payload).unwrap();
        assert_eq!(open.max_priv, Privilege::Admin.as_u8());
        let bmc_sid = open.bmc_session_id;

        // RAKP1 with a console the BMC can authenticate.
        let mut console_auth =
            kiln_crypto::rakp::AuthContext::new(kiln_crypto::rakp::RakpAlgorithm::HmacSha1);
        console_auth.set_user_key(b"PASSW0RD");
        let rakp1 = Rakp1Request {
            message_tag: 2,
            bmc_session_id: bmc_sid,
            console_random: [0x3C; 16],
            req_max_priv: 0x14,
            user_name: b"admin".to_vec(),
        };
        harness.deliver(&setup_packet(PayloadType::Rakp1, rakp1.to_bytes()));
        let response = harness.last_payload();
        assert_eq!(response.payload_type, PayloadType::Rakp2);
        let rakp2 = Rakp2Response::parse(&response.payload).unwrap();
        assert_eq!(rakp2.status, kiln_types::RakpStatus::NoError);

        // RAKP3 signed with the right password.
        let mut input = Vec::new();
        input.extend_from_slice(&rakp2.bmc_random);
        input.extend_from_slice(&0x1000_0001u32.to_le_bytes());
        input.push(0x14);
        input.push(5);
        input.extend_from_slice(b"admin");
        let rakp3 = Rakp3Request {
            message_tag: 3,
            status: 0,
            bmc_session_id: bmc_sid,
            key_exchange_auth_code: console_auth.kex_hmac(&input),
        };
        harness.deliver(&setup_packet(PayloadType::Rakp3, rakp3.to_bytes()));
        let response = harness.last_payload();
        assert_eq!(response.payload_type, PayloadType::Rakp4);
        let rakp4 = Rakp4Response::parse(&response.payload).unwrap();
        assert_eq!(rakp4.status, kiln_types::RakpStatus::NoError);

        let session = harness.services.sessions.get(bmc_sid).unwrap();
        assert_eq!(session.state, SessionState::Active);
        // The session learns its remote address from the first packet
        // carrying its own wire session id, not from the setup exchange.
        assert_eq!(session.remote_addr, None);
    }

    #[test]
    fn discovery_over_ipmi15_is_answered_in_kind() {
        let mut harness = Harness::new();

        // Get Channel Authentication Capabilities inside an IPMI 1.5
        // frame on session 0.
        let lan = ipmi::build_request(0x06, 0x38, &[0x0E, 0x04]);
        let packet = rmcp::flatten_ipmi15(SessionId::ZERO, &lan);
        harness.deliver(&packet);

        let packets = harness.sent_packets();
        assert_eq!(packets.len(), 1);
        let parsed = rmcp::unflatten(&packets[0], &SessionCrypto::NONE).unwrap();
        assert_eq!(parsed.format, SessionFormat::Ipmi15);

        let response = ipmi::IpmiRequest::parse(&parsed.payload).unwrap();
        assert_eq!(response.data[0], 0x00); // completion code
        assert_eq!(response.data[1], 1); // channel
        assert_eq!(response.data[2], 0x80); // v2.0 extended
    }

    #[test]
    fn non_sessionless_command_blocked_on_session_zero() {
        let mut harness = Harness::new();
        let lan = ipmi::build_request(0x06, 0x3B, &[0x04]); // Set Session Privilege
        harness.deliver(&setup_packet(PayloadType::Ipmi, lan));

        let parsed = harness.last_payload();
        let response = ipmi::IpmiRequest::parse(&parsed.payload).unwrap();
        assert_eq!(
            response.data[0],
            CompletionCode::INSUFFICIENT_PRIVILEGE.as_u8()
        );
    }

    #[test]
    fn unknown_command_goes_to_dispatcher_and_replies() {
        let mut harness = Harness::new();
        let lan = ipmi::build_request(0x06, 0x01, &[]); // Get Device ID: not ours
        harness.deliver(&setup_packet(PayloadType::Ipmi, lan));

        // The null dispatcher completed synchronously into the queue.
        let mut effects = harness.effects.clone();
        flush_replies(&mut harness.services, &mut effects, &harness.replies);

        let parsed = harness.last_payload();
        let response = ipmi::IpmiRequest::parse(&parsed.payload).unwrap();
        assert_eq!(response.data[0], CompletionCode::INVALID_COMMAND.as_u8());
    }

    #[test]
    fn sol_without_active_session_drops() {
        let mut harness = Harness::new();
        let frame = SolPayload {
            seq: 1,
            ack_seq: 0,
            accepted_count: 0,
            operation: 0,
            data: b"x".to_vec(),
        };
        let msg = OutboundMessage {
            payload_type: PayloadType::Sol,
            wire_session_id: SessionId::ZERO,
            payload: frame.to_bytes(),
            encrypt: false,
            authenticate: false,
        };
        harness.deliver(&rmcp::flatten_ipmi20(&msg, 0, &SessionCrypto::NONE).unwrap());
        assert!(harness.sent_packets().is_empty());
    }

    #[test]
    fn reaper_tick_cancels_sol_for_dead_sessions() {
        let mut harness = Harness::new();

        // Fabricate an active session with an activated SOL instance.
        let sid = {
            let session = harness
                .services
                .sessions
                .create(
                    SessionId::new(1),
                    0x04,
                    kiln_crypto::rakp::RakpAlgorithm::HmacSha1,
                    kiln_crypto::integrity::IntegrityAlgorithm::HmacSha1_96,
                    kiln_crypto::confidentiality::ConfidentialityAlgorithm::AesCbc128,
                )
                .unwrap();
            session.state = SessionState::TearDownInProgress;
            session.bmc_session_id()
        };
        let mut effects = harness.effects.clone();
        let mut bridge = SolBridge::new(&mut effects);
        harness.services.sol.start_instance(1, sid, &mut bridge);
        drop(bridge);

        release_torn_down(&mut harness.services, &mut effects);
        assert!(!harness.services.sol.is_instance_active(1));
        assert!(harness.services.sessions.get(sid).is_err());
        assert!(
            harness
                .effects
                .0
                .borrow()
                .cancelled
                .contains(&TimerKey::Sol {
                    instance: 1,
                    kind: SolTimerKind::Retry
                })
        );
    }

    #[test]
    fn console_input_flows_to_sol() {
        let mut harness = Harness::new();
        let sid = {
            let session = harness
                .services
                .sessions
                .create(
                    SessionId::new(0x1000_0001),
                    0x04,
                    kiln_crypto::rakp::RakpAlgorithm::HmacSha1,
                    kiln_crypto::integrity::IntegrityAlgorithm::HmacSha1_96,
                    kiln_crypto::confidentiality::ConfidentialityAlgorithm::AesCbc128,
                )
                .unwrap();
            session.state = SessionState::Active;
            session.remote_addr = Some(PEER.parse().unwrap());
            session.bmc_session_id()
        };
        let mut effects = harness.effects.clone();
        let mut bridge = SolBridge::new(&mut effects);
        harness.services.sol.start_instance(1, sid, &mut bridge);
        drop(bridge);

        console_input(&mut harness.services, &mut effects, b"boot ok");

        let packets = harness.sent_packets();
        assert_eq!(packets.len(), 1);
        let parsed = rmcp::unflatten(&packets[0], &SessionCrypto::NONE).unwrap();
        assert_eq!(parsed.payload_type, PayloadType::Sol);
        assert_eq!(parsed.session_id, SessionId::new(0x1000_0001));
        let frame = SolPayload::parse(&parsed.payload).unwrap();
        assert_eq!(frame.data, b"boot ok");
        assert_eq!(frame.seq, 1);
        // Outbound sequence numbers on the session are monotonic.
        assert_eq!(parsed.session_seq, 1);
    }

    #[test]
    fn channel_auth_capabilities_validation() {
        assert_eq!(
            channel_auth_capabilities(1, &[0x0E]),
            vec![CompletionCode::REQ_DATA_LEN_INVALID.as_u8()]
        );
        assert_eq!(
            channel_auth_capabilities(1, &[0x05, 0x04]),
            vec![CompletionCode::INVALID_FIELD_REQUEST.as_u8()]
        );
        let ok = channel_auth_capabilities(1, &[0x01, 0x04]);
        assert_eq!(ok[0], 0x00);
        assert_eq!(ok.len(), 9);
    }
}
