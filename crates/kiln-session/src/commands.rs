//! Session-management IPMI commands: Close Session and Set Session
//! Privilege Level.
//!
//! Both execute on an established session; the caller has already routed
//! the command through the table's privilege floor. Close Session accepts
//! either a 32-bit session id or, when the id is zero, an 8-bit handle.
//! Sessions owned by a different channel daemon are closed through the
//! [`PeerDaemon`] seam: this daemon only requests the teardown, the owner
//! performs the release.

use kiln_types::{
    CompletionCode, Privilege, REQ_MAX_PRIV_MASK, SessionHandle, SessionId, SessionState,
};

use crate::SessionManager;

/// Seam to co-hosted channel daemons for cross-instance session teardown.
pub trait PeerDaemon {
    /// Asks the owning daemon to move the session to teardown. The caller's
    /// current privilege travels along so the owner can apply the same
    /// privilege check this daemon would.
    fn request_teardown(
        &mut self,
        session_id: SessionId,
        handle: SessionHandle,
        caller_privilege: Privilege,
    ) -> CompletionCode;
}

/// A peer seam for daemons running without co-hosted instances: every
/// cross-instance close fails the same way an unknown handle does.
#[derive(Debug, Default)]
pub struct NoPeers;

impl PeerDaemon for NoPeers {
    fn request_teardown(
        &mut self,
        session_id: SessionId,
        _handle: SessionHandle,
        _caller_privilege: Privilege,
    ) -> CompletionCode {
        if session_id.is_zero() {
            CompletionCode::INVALID_SESSION_HANDLE
        } else {
            CompletionCode::INVALID_SESSION_ID
        }
    }
}

/// Close Session (NetFn App, cmd 3Ch). `data` is the request body after the
/// LAN header; the response is a single completion code.
pub fn close_session(
    manager: &mut SessionManager,
    peers: &mut dyn PeerDaemon,
    caller_session: SessionId,
    data: &[u8],
) -> Vec<u8> {
    vec![close_session_inner(manager, peers, caller_session, data).as_u8()]
}

fn close_session_inner(
    manager: &mut SessionManager,
    peers: &mut dyn PeerDaemon,
    caller_session: SessionId,
    data: &[u8],
) -> CompletionCode {
    if data.len() < 4 {
        return CompletionCode::REQ_DATA_LEN_INVALID;
    }
    let req_session_id = SessionId::new(u32::from_le_bytes(
        data[..4].try_into().expect("length checked"),
    ));

    // The handle byte is only meaningful (and only permitted) when the
    // session id is zero.
    let req_handle = if req_session_id.is_zero() {
        match data.len() {
            4 => return CompletionCode::INVALID_SESSION_ID,
            5 => SessionHandle::new(data[4]),
            _ => return CompletionCode::INVALID_FIELD_REQUEST,
        }
    } else {
        if data.len() != 4 {
            return CompletionCode::INVALID_FIELD_REQUEST;
        }
        SessionHandle::INVALID
    };

    if req_session_id.is_zero() && req_handle.is_invalid() {
        return CompletionCode::INVALID_SESSION_HANDLE;
    }

    let caller_privilege = match manager.get(caller_session) {
        Ok(session) => session.current_privilege,
        Err(_) => return CompletionCode::UNSPECIFIED_ERROR,
    };

    let mine = if req_session_id.is_zero() {
        req_handle.channel_instance() == manager.instance()
    } else {
        req_session_id.channel_instance() == manager.instance()
    };
    if !mine {
        return peers.request_teardown(req_session_id, req_handle, caller_privilege);
    }

    close_own_session(manager, req_session_id, req_handle, caller_privilege)
}

/// Closes a session this daemon owns, by id or by handle.
fn close_own_session(
    manager: &mut SessionManager,
    req_session_id: SessionId,
    req_handle: SessionHandle,
    caller_privilege: Privilege,
) -> CompletionCode {
    let target_id = if req_session_id.is_zero() {
        match manager.session_id_by_handle(req_handle) {
            Some(id) => id,
            None => return CompletionCode::INVALID_SESSION_HANDLE,
        }
    } else {
        req_session_id
    };

    let target_privilege = match manager.get(target_id) {
        Ok(session) => session.current_privilege,
        Err(_) => return CompletionCode::INVALID_SESSION_ID,
    };

    // Closing a session running above the caller's own level is refused.
    if caller_privilege < target_privilege {
        return CompletionCode::INSUFFICIENT_PRIVILEGE;
    }

    if manager.request_teardown(target_id) {
        tracing::debug!(session = %target_id, "close session requested");
        CompletionCode::SUCCESS
    } else {
        CompletionCode::INVALID_SESSION_ID
    }
}

/// Set Session Privilege Level (NetFn App, cmd 3Bh). The response is the
/// completion code followed by the session's (possibly updated) privilege.
pub fn set_session_privilege(
    manager: &mut SessionManager,
    caller_session: SessionId,
    data: &[u8],
) -> Vec<u8> {
    if data.is_empty() {
        return vec![CompletionCode::REQ_DATA_LEN_INVALID.as_u8()];
    }
    let requested = data[0] & REQ_MAX_PRIV_MASK;

    let Ok(session) = manager.get_mut(caller_session) else {
        return vec![CompletionCode::UNSPECIFIED_ERROR.as_u8()];
    };

    // A request of zero only reads the current level.
    if requested == 0 {
        return vec![
            CompletionCode::SUCCESS.as_u8(),
            session.current_privilege.as_u8(),
        ];
    }

    if requested > session.req_max_priv & REQ_MAX_PRIV_MASK {
        return vec![CompletionCode::EXCEEDS_PRIV_LIMIT.as_u8()];
    }

    let ceiling = session.channel_priv_limit.min(session.user_priv_limit);
    if requested > ceiling.as_u8() {
        return vec![CompletionCode::EXCEEDS_PRIV_LIMIT.as_u8()];
    }

    let Some(new_privilege) = Privilege::from_nibble(requested) else {
        return vec![CompletionCode::INVALID_FIELD_REQUEST.as_u8()];
    };
    session.current_privilege = new_privilege;
    vec![CompletionCode::SUCCESS.as_u8(), requested]
}
