//! SOL payload and configuration commands.
//!
//! Activate/Deactivate Payload and Get Payload Status/Info (NetFn App),
//! plus Set/Get SOL Configuration Parameters (NetFn Transport). Every
//! function consumes the request body after the LAN header and returns the
//! response body starting with the completion code.

use kiln_session::SessionManager;
use kiln_session::user::UserStore;
use kiln_types::{CompletionCode, PayloadType, Privilege, SessionId};
use kiln_wire::sol::MAX_SOL_PAYLOAD;

use crate::manager::{ACCUMULATE_INTERVAL_UNIT, RETRY_INTERVAL_UNIT, SOL_PORT};
use crate::{SolManager, SolServices};

/// Only payload instance 1 is supported.
const SOL_INSTANCE: u8 = 1;

/// Parameter revision reported by Get SOL Configuration.
const PARAMETER_REVISION: u8 = 0x11;

/// SOL configuration parameter selectors (IPMI 2.0 table 26-5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Parameter {
    Progress = 0,
    Enable = 1,
    Authentication = 2,
    Accumulate = 3,
    Retry = 4,
    NonVolatileBitrate = 5,
    VolatileBitrate = 6,
    Channel = 7,
    Port = 8,
}

impl Parameter {
    fn from_selector(selector: u8) -> Option<Self> {
        match selector {
            0 => Some(Self::Progress),
            1 => Some(Self::Enable),
            2 => Some(Self::Authentication),
            3 => Some(Self::Accumulate),
            4 => Some(Self::Retry),
            5 => Some(Self::NonVolatileBitrate),
            6 => Some(Self::VolatileBitrate),
            7 => Some(Self::Channel),
            8 => Some(Self::Port),
            _ => None,
        }
    }
}

fn cc_only(code: CompletionCode) -> Vec<u8> {
    vec![code.as_u8()]
}

/// Activate Payload (NetFn App, cmd 48h).
pub fn activate_payload(
    sol: &mut SolManager,
    sessions: &SessionManager,
    users: &dyn UserStore,
    caller_session: SessionId,
    data: &[u8],
    svc: &mut dyn SolServices,
) -> Vec<u8> {
    if data.len() != 6 {
        return cc_only(CompletionCode::REQ_DATA_LEN_INVALID);
    }
    let payload_type = data[0] & 0x3F;
    let instance = data[1] & 0x0F;
    let encryption_requested = data[3] & 0x01 != 0;

    // SOL is the only payload supported for activation.
    if payload_type != PayloadType::Sol.as_u8() {
        return cc_only(CompletionCode::INVALID_FIELD_REQUEST);
    }
    if !sol.params.enable {
        return cc_only(CompletionCode::PAYLOAD_TYPE_DISABLED);
    }
    if instance != SOL_INSTANCE {
        return cc_only(CompletionCode::INVALID_FIELD_REQUEST);
    }

    let Ok(session) = sessions.get(caller_session) else {
        return cc_only(CompletionCode::UNSPECIFIED_ERROR);
    };

    // A session that negotiated confidentiality must activate with it.
    if !encryption_requested && session.is_crypt_enabled() {
        return cc_only(CompletionCode::PAYLOAD_WITHOUT_ENCRYPTION);
    }

    // The SOL payload must be enabled for this user on this channel.
    let sol_enabled = users
        .lookup(&session.user_name)
        .is_some_and(|user| user.sol_payload_enabled);
    if !sol_enabled {
        return cc_only(CompletionCode::PAYLOAD_TYPE_DISABLED);
    }

    if sol.is_instance_active(instance) {
        return cc_only(CompletionCode::PAYLOAD_ALREADY_ACTIVE);
    }

    sol.start_instance(instance, caller_session, svc);

    let mut response = Vec::with_capacity(12);
    response.push(CompletionCode::SUCCESS.as_u8());
    response.extend_from_slice(&[0, 0, 0]);
    response.extend_from_slice(&(MAX_SOL_PAYLOAD as u16).to_le_bytes());
    response.extend_from_slice(&(MAX_SOL_PAYLOAD as u16).to_le_bytes());
    response.extend_from_slice(&SOL_PORT.to_le_bytes());
    response.extend_from_slice(&0xFFFFu16.to_le_bytes()); // VLAN unused
    response
}

/// Deactivate Payload (NetFn App, cmd 49h).
pub fn deactivate_payload(
    sol: &mut SolManager,
    data: &[u8],
    svc: &mut dyn SolServices,
) -> Vec<u8> {
    if data.len() != 6 {
        return cc_only(CompletionCode::REQ_DATA_LEN_INVALID);
    }
    let payload_type = data[0] & 0x3F;
    let instance = data[1] & 0x0F;

    if payload_type != PayloadType::Sol.as_u8() || instance != SOL_INSTANCE {
        return cc_only(CompletionCode::INVALID_FIELD_REQUEST);
    }

    let Some(session_id) = sol.instance_session(instance) else {
        return cc_only(CompletionCode::PAYLOAD_DEACTIVATED);
    };
    sol.stop_instance(instance, svc);

    // Tell the host side the payload slot is free again. If the session
    // vanished underneath us (inactivity teardown) the deactivation still
    // succeeded.
    svc.send_activating(instance, session_id);

    cc_only(CompletionCode::SUCCESS)
}

/// Get Payload Activation Status (NetFn App, cmd 4Ah).
pub fn get_payload_status(sol: &SolManager, data: &[u8]) -> Vec<u8> {
    if data.len() != 1 {
        return cc_only(CompletionCode::REQ_DATA_LEN_INVALID);
    }
    if data[0] & 0x3F != PayloadType::Sol.as_u8() {
        return cc_only(CompletionCode::UNSPECIFIED_ERROR);
    }

    let mut instance_mask = 0u16;
    if sol.is_instance_active(SOL_INSTANCE) {
        instance_mask |= 1;
    }

    let mut response = Vec::with_capacity(4);
    response.push(CompletionCode::SUCCESS.as_u8());
    response.push(1); // instance capacity
    response.extend_from_slice(&instance_mask.to_le_bytes());
    response
}

/// Get Payload Instance Info (NetFn App, cmd 4Bh).
pub fn get_payload_info(sol: &SolManager, data: &[u8]) -> Vec<u8> {
    if data.len() != 2 {
        return cc_only(CompletionCode::REQ_DATA_LEN_INVALID);
    }
    if data[0] & 0x3F != PayloadType::Sol.as_u8() || data[1] & 0x0F != SOL_INSTANCE {
        return cc_only(CompletionCode::INVALID_FIELD_REQUEST);
    }

    let session_id = sol
        .instance_session(SOL_INSTANCE)
        .unwrap_or(SessionId::ZERO);

    let mut response = Vec::with_capacity(13);
    response.push(CompletionCode::SUCCESS.as_u8());
    response.extend_from_slice(&session_id.as_u32().to_le_bytes());
    response.extend_from_slice(&[0u8; 8]); // port/reserved block
    response
}

/// Set SOL Configuration Parameters (NetFn Transport, cmd 21h).
pub fn set_configuration(sol: &mut SolManager, data: &[u8]) -> Vec<u8> {
    if data.len() < 3 {
        return cc_only(CompletionCode::REQ_DATA_LEN_INVALID);
    }
    let selector = data[1] & 0x7F;
    let value = &data[2..];

    let Some(parameter) = Parameter::from_selector(selector) else {
        return cc_only(CompletionCode::PARAM_NOT_SUPPORTED);
    };

    match parameter {
        Parameter::Progress => {
            sol.params.progress = value[0] & 0x03;
        }
        Parameter::Enable => {
            sol.params.enable = value[0] & 0x01 != 0;
        }
        Parameter::Authentication => {
            let force_encrypt = value[0] & 0x80 != 0;
            let force_auth = value[0] & 0x40 != 0;
            let privilege = value[0] & 0x0F;
            // Clearing either force bit downgrades the transport; both are
            // fixed on.
            if !force_encrypt || !force_auth {
                return cc_only(CompletionCode::WRITE_READ_ONLY_PARAMETER);
            }
            let Some(privilege) = Privilege::from_nibble(privilege) else {
                return cc_only(CompletionCode::INVALID_FIELD_REQUEST);
            };
            if privilege < Privilege::User {
                return cc_only(CompletionCode::INVALID_FIELD_REQUEST);
            }
            sol.params.min_privilege = privilege;
        }
        Parameter::Accumulate => {
            if value.len() < 2 {
                return cc_only(CompletionCode::REQ_DATA_LEN_INVALID);
            }
            if value[1] == 0 {
                return cc_only(CompletionCode::INVALID_FIELD_REQUEST);
            }
            sol.params.accumulate_interval =
                ACCUMULATE_INTERVAL_UNIT * u32::from(value[0]);
            sol.params.send_threshold = value[1];
        }
        Parameter::Retry => {
            if value.len() < 2 {
                return cc_only(CompletionCode::REQ_DATA_LEN_INVALID);
            }
            sol.params.retry_count = value[0] & 0x07;
            sol.params.retry_interval = RETRY_INTERVAL_UNIT * u32::from(value[1]);
        }
        Parameter::Channel => {
            sol.params.channel = value[0];
        }
        Parameter::Port => {
            return cc_only(CompletionCode::WRITE_READ_ONLY_PARAMETER);
        }
        Parameter::NonVolatileBitrate | Parameter::VolatileBitrate => {
            return cc_only(CompletionCode::PARAM_NOT_SUPPORTED);
        }
    }

    cc_only(CompletionCode::SUCCESS)
}

/// Get SOL Configuration Parameters (NetFn Transport, cmd 22h).
pub fn get_configuration(sol: &SolManager, data: &[u8]) -> Vec<u8> {
    if data.len() < 4 {
        return cc_only(CompletionCode::REQ_DATA_LEN_INVALID);
    }
    let revision_only = data[0] & 0x80 != 0;
    let selector = data[1] & 0x7F;

    let mut response = vec![CompletionCode::SUCCESS.as_u8(), PARAMETER_REVISION];
    if revision_only {
        return response;
    }

    let Some(parameter) = Parameter::from_selector(selector) else {
        return cc_only(CompletionCode::PARAM_NOT_SUPPORTED);
    };

    match parameter {
        Parameter::Progress => response.push(sol.params.progress),
        Parameter::Enable => response.push(u8::from(sol.params.enable)),
        Parameter::Authentication => {
            let mut auth = sol.params.min_privilege.as_u8();
            if sol.params.force_auth {
                auth |= 0x40;
            }
            if sol.params.force_encrypt {
                auth |= 0x80;
            }
            response.push(auth);
        }
        Parameter::Accumulate => {
            let units = sol.params.accumulate_interval.as_millis()
                / ACCUMULATE_INTERVAL_UNIT.as_millis();
            response.push(units as u8);
            response.push(sol.params.send_threshold);
        }
        Parameter::Retry => {
            let units =
                sol.params.retry_interval.as_millis() / RETRY_INTERVAL_UNIT.as_millis();
            response.push(sol.params.retry_count);
            response.push(units as u8);
        }
        Parameter::Channel => response.push(sol.params.channel),
        Parameter::Port => response.extend_from_slice(&SOL_PORT.to_le_bytes()),
        Parameter::NonVolatileBitrate | Parameter::VolatileBitrate => {
            return cc_only(CompletionCode::PARAM_NOT_SUPPORTED);
        }
    }

    response
}
