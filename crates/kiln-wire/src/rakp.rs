//! Open Session and RAKP message codecs (IPMI 2.0 §13.20-§13.21).
//!
//! These layouts are bit-exact: host tools (ipmitool, ipmiutil) parse them
//! with packed structs. Reserved fields are written as zero and ignored on
//! read. Failure responses carry the fixed header with a status code; the
//! trailing MAC fields are present only on success.

use kiln_types::{RakpStatus, SessionId};

use crate::{WireError, WireResult};

/// Maximum user-name length in RAKP message 1.
pub const USER_NAME_MAX_LEN: usize = 16;

/// Length of the RAKP random numbers.
pub const RANDOM_LEN: usize = 16;

/// Length of the BMC GUID in RAKP message 2.
pub const GUID_LEN: usize = 16;

/// Fixed size of an Open Session request.
pub const OPEN_SESSION_REQUEST_LEN: usize = 32;

/// Fixed size of an Open Session response.
pub const OPEN_SESSION_RESPONSE_LEN: usize = 36;

/// Fixed prefix of RAKP message 1 (before the user name).
pub const RAKP1_FIXED_LEN: usize = 28;

/// Fixed prefix of RAKP message 2 (before the key exchange auth code).
pub const RAKP2_FIXED_LEN: usize = 40;

/// Fixed prefix of RAKP message 3 (before the key exchange auth code).
pub const RAKP3_FIXED_LEN: usize = 8;

/// Fixed prefix of RAKP message 4 (before the integrity check value).
pub const RAKP4_FIXED_LEN: usize = 8;

fn check_len(payload: &[u8], need: usize) -> WireResult<()> {
    if payload.len() < need {
        return Err(WireError::Truncated {
            need,
            have: payload.len(),
        });
    }
    Ok(())
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes[..4].try_into().expect("caller checked length"))
}

// ============================================================================
// Open Session
// ============================================================================

/// One of the three algorithm payload descriptors in an Open Session
/// exchange. The daemon echoes the descriptor fields back verbatim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlgorithmDescriptor {
    pub payload_kind: u8,
    pub payload_len: u8,
    /// Low six bits carry the algorithm identifier.
    pub algorithm: u8,
}

impl AlgorithmDescriptor {
    fn parse(bytes: &[u8]) -> Self {
        Self {
            payload_kind: bytes[0],
            payload_len: bytes[3],
            algorithm: bytes[4] & 0x3F,
        }
    }

    fn write(self, out: &mut Vec<u8>) {
        out.push(self.payload_kind);
        out.extend_from_slice(&[0, 0]);
        out.push(self.payload_len);
        out.push(self.algorithm);
        out.extend_from_slice(&[0, 0, 0]);
    }
}

/// RMCP+ Open Session request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSessionRequest {
    pub message_tag: u8,
    /// Requested maximum privilege nibble; 0 means "highest matching".
    pub max_priv: u8,
    pub console_session_id: SessionId,
    pub auth: AlgorithmDescriptor,
    pub integrity: AlgorithmDescriptor,
    pub confidentiality: AlgorithmDescriptor,
}

impl OpenSessionRequest {
    pub fn parse(payload: &[u8]) -> WireResult<Self> {
        check_len(payload, OPEN_SESSION_REQUEST_LEN)?;
        Ok(Self {
            message_tag: payload[0],
            max_priv: payload[1] & 0x0F,
            console_session_id: SessionId::new(read_u32_le(&payload[4..8])),
            auth: AlgorithmDescriptor::parse(&payload[8..16]),
            integrity: AlgorithmDescriptor::parse(&payload[16..24]),
            confidentiality: AlgorithmDescriptor::parse(&payload[24..32]),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OPEN_SESSION_REQUEST_LEN);
        out.push(self.message_tag);
        out.push(self.max_priv & 0x0F);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.console_session_id.as_u32().to_le_bytes());
        self.auth.write(&mut out);
        self.integrity.write(&mut out);
        self.confidentiality.write(&mut out);
        out
    }
}

/// RMCP+ Open Session response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSessionResponse {
    pub message_tag: u8,
    pub status: RakpStatus,
    pub max_priv: u8,
    pub console_session_id: SessionId,
    pub bmc_session_id: SessionId,
    pub auth: AlgorithmDescriptor,
    pub integrity: AlgorithmDescriptor,
    pub confidentiality: AlgorithmDescriptor,
}

impl OpenSessionResponse {
    /// A failure response: message tag and console session id are always
    /// echoed; every other field is zero.
    pub fn failure(message_tag: u8, console_session_id: SessionId, status: RakpStatus) -> Self {
        Self {
            message_tag,
            status,
            max_priv: 0,
            console_session_id,
            bmc_session_id: SessionId::ZERO,
            auth: AlgorithmDescriptor::default(),
            integrity: AlgorithmDescriptor::default(),
            confidentiality: AlgorithmDescriptor::default(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OPEN_SESSION_RESPONSE_LEN);
        out.push(self.message_tag);
        out.push(self.status.as_u8());
        out.push(self.max_priv & 0x0F);
        out.push(0);
        out.extend_from_slice(&self.console_session_id.as_u32().to_le_bytes());
        out.extend_from_slice(&self.bmc_session_id.as_u32().to_le_bytes());
        self.auth.write(&mut out);
        self.integrity.write(&mut out);
        self.confidentiality.write(&mut out);
        out
    }

    pub fn parse(payload: &[u8]) -> WireResult<Self> {
        check_len(payload, OPEN_SESSION_RESPONSE_LEN)?;
        let status = parse_status(payload[1])?;
        Ok(Self {
            message_tag: payload[0],
            status,
            max_priv: payload[2] & 0x0F,
            console_session_id: SessionId::new(read_u32_le(&payload[4..8])),
            bmc_session_id: SessionId::new(read_u32_le(&payload[8..12])),
            auth: AlgorithmDescriptor::parse(&payload[12..20]),
            integrity: AlgorithmDescriptor::parse(&payload[20..28]),
            confidentiality: AlgorithmDescriptor::parse(&payload[28..36]),
        })
    }
}

fn parse_status(value: u8) -> WireResult<RakpStatus> {
    match value {
        0x00 => Ok(RakpStatus::NoError),
        0x01 => Ok(RakpStatus::InsufficientResource),
        0x02 => Ok(RakpStatus::InvalidSessionId),
        0x03 => Ok(RakpStatus::InvalidPayloadType),
        0x04 => Ok(RakpStatus::InvalidAuthAlgo),
        0x05 => Ok(RakpStatus::InvalidIntegrityAlgo),
        0x06 => Ok(RakpStatus::NoMatchAuthPayload),
        0x07 => Ok(RakpStatus::NoMatchIntegrityPayload),
        0x08 => Ok(RakpStatus::InactiveSessionId),
        0x09 => Ok(RakpStatus::InactiveRole),
        0x0A => Ok(RakpStatus::UnauthRolePriv),
        0x0B => Ok(RakpStatus::InsufficientResourcesRole),
        0x0C => Ok(RakpStatus::InvalidNameLength),
        0x0D => Ok(RakpStatus::UnauthName),
        0x0E => Ok(RakpStatus::UnauthGuid),
        0x0F => Ok(RakpStatus::InvalidIntegrityValue),
        0x10 => Ok(RakpStatus::InvalidConfAlgo),
        0x11 => Ok(RakpStatus::NoCipherSuiteMatch),
        0x12 => Ok(RakpStatus::IllegalParameter),
        other => Err(WireError::UnknownStatusCode(other)),
    }
}

// ============================================================================
// RAKP message 1 / 2
// ============================================================================

/// RAKP message 1, remote console → BMC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rakp1Request {
    pub message_tag: u8,
    pub bmc_session_id: SessionId,
    pub console_random: [u8; RANDOM_LEN],
    /// Raw requested-maximum-privilege byte including the lookup-mode bit;
    /// this exact byte feeds the RAKP2 HMAC.
    pub req_max_priv: u8,
    pub user_name: Vec<u8>,
}

impl Rakp1Request {
    pub fn parse(payload: &[u8]) -> WireResult<Self> {
        check_len(payload, RAKP1_FIXED_LEN)?;
        let name_len = usize::from(payload[27]);
        if name_len > USER_NAME_MAX_LEN || payload.len() != RAKP1_FIXED_LEN + name_len {
            return Err(WireError::LengthMismatch);
        }
        let mut console_random = [0u8; RANDOM_LEN];
        console_random.copy_from_slice(&payload[8..24]);
        Ok(Self {
            message_tag: payload[0],
            bmc_session_id: SessionId::new(read_u32_le(&payload[4..8])),
            console_random,
            req_max_priv: payload[24],
            user_name: payload[RAKP1_FIXED_LEN..].to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RAKP1_FIXED_LEN + self.user_name.len());
        out.push(self.message_tag);
        out.extend_from_slice(&[0, 0, 0]);
        out.extend_from_slice(&self.bmc_session_id.as_u32().to_le_bytes());
        out.extend_from_slice(&self.console_random);
        out.push(self.req_max_priv);
        out.extend_from_slice(&[0, 0]);
        out.push(self.user_name.len() as u8);
        out.extend_from_slice(&self.user_name);
        out
    }
}

/// RAKP message 2, BMC → remote console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rakp2Response {
    pub message_tag: u8,
    pub status: RakpStatus,
    pub console_session_id: SessionId,
    pub bmc_random: [u8; RANDOM_LEN],
    pub bmc_guid: [u8; GUID_LEN],
    /// Key Exchange Authentication Code; empty on failure.
    pub key_exchange_auth_code: Vec<u8>,
}

impl Rakp2Response {
    pub fn failure(message_tag: u8, status: RakpStatus) -> Self {
        Self {
            message_tag,
            status,
            console_session_id: SessionId::ZERO,
            bmc_random: [0; RANDOM_LEN],
            bmc_guid: [0; GUID_LEN],
            key_exchange_auth_code: Vec::new(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RAKP2_FIXED_LEN + self.key_exchange_auth_code.len());
        out.push(self.message_tag);
        out.push(self.status.as_u8());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.console_session_id.as_u32().to_le_bytes());
        out.extend_from_slice(&self.bmc_random);
        out.extend_from_slice(&self.bmc_guid);
        out.extend_from_slice(&self.key_exchange_auth_code);
        out
    }

    pub fn parse(payload: &[u8]) -> WireResult<Self> {
        check_len(payload, RAKP2_FIXED_LEN)?;
        let mut bmc_random = [0u8; RANDOM_LEN];
        bmc_random.copy_from_slice(&payload[8..24]);
        let mut bmc_guid = [0u8; GUID_LEN];
        bmc_guid.copy_from_slice(&payload[24..40]);
        Ok(Self {
            message_tag: payload[0],
            status: parse_status(payload[1])?,
            console_session_id: SessionId::new(read_u32_le(&payload[4..8])),
            bmc_random,
            bmc_guid,
            key_exchange_auth_code: payload[RAKP2_FIXED_LEN..].to_vec(),
        })
    }
}

// ============================================================================
// RAKP message 3 / 4
// ============================================================================

/// RAKP message 3, remote console → BMC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rakp3Request {
    pub message_tag: u8,
    /// Status from the console; a non-zero value reports a console-side
    /// failure of RAKP2 checking.
    pub status: u8,
    pub bmc_session_id: SessionId,
    pub key_exchange_auth_code: Vec<u8>,
}

impl Rakp3Request {
    pub fn parse(payload: &[u8]) -> WireResult<Self> {
        check_len(payload, RAKP3_FIXED_LEN)?;
        Ok(Self {
            message_tag: payload[0],
            status: payload[1],
            bmc_session_id: SessionId::new(read_u32_le(&payload[4..8])),
            key_exchange_auth_code: payload[RAKP3_FIXED_LEN..].to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RAKP3_FIXED_LEN + self.key_exchange_auth_code.len());
        out.push(self.message_tag);
        out.push(self.status);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.bmc_session_id.as_u32().to_le_bytes());
        out.extend_from_slice(&self.key_exchange_auth_code);
        out
    }
}

/// RAKP message 4, BMC → remote console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rakp4Response {
    pub message_tag: u8,
    pub status: RakpStatus,
    pub console_session_id: SessionId,
    /// Integrity Check Value; empty on failure.
    pub integrity_check_value: Vec<u8>,
}

impl Rakp4Response {
    pub fn failure(message_tag: u8, console_session_id: SessionId, status: RakpStatus) -> Self {
        Self {
            message_tag,
            status,
            console_session_id,
            integrity_check_value: Vec::new(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(RAKP4_FIXED_LEN + self.integrity_check_value.len());
        out.push(self.message_tag);
        out.push(self.status.as_u8());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.console_session_id.as_u32().to_le_bytes());
        out.extend_from_slice(&self.integrity_check_value);
        out
    }

    pub fn parse(payload: &[u8]) -> WireResult<Self> {
        check_len(payload, RAKP4_FIXED_LEN)?;
        Ok(Self {
            message_tag: payload[0],
            status: parse_status(payload[1])?,
            console_session_id: SessionId::new(read_u32_le(&payload[4..8])),
            integrity_check_value: payload[RAKP4_FIXED_LEN..].to_vec(),
        })
    }
}
