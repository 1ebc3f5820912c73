//! RMCP outer header and IPMI session framing.
//!
//! Every datagram starts with the four-byte RMCP header (version 0x06,
//! reserved, sequence 0xFF, class IPMI) followed by a session-format byte
//! that selects the IPMI 1.5 or IPMI 2.0 session header. The integrity
//! AuthCode covers the format byte through the byte immediately preceding
//! the AuthCode itself.

use kiln_crypto::confidentiality::CryptContext;
use kiln_crypto::integrity::IntegrityContext;
use kiln_types::{PayloadType, SessionId};

use crate::{WireError, WireResult};

/// RMCP version carried by every packet.
pub const RMCP_VERSION: u8 = 0x06;
/// RMCP sequence number: 0xFF means "no RMCP ACK requested".
pub const RMCP_SEQ: u8 = 0xFF;
/// RMCP message class for IPMI.
pub const RMCP_CLASS_IPMI: u8 = 0x07;

/// Size of the outer RMCP header; the integrity-covered range starts here.
pub const RMCP_HEADER_LEN: usize = 4;

/// IPMI 2.0 session header length (format byte through payload length).
pub const IPMI20_HEADER_LEN: usize = RMCP_HEADER_LEN + 12;

/// IPMI 1.5 session header length (format byte through payload length).
pub const IPMI15_HEADER_LEN: usize = RMCP_HEADER_LEN + 10;

/// Payload-type byte: bit 7 marks an encrypted payload.
pub const PAYLOAD_ENCRYPT_MASK: u8 = 0x80;
/// Payload-type byte: bit 6 marks an authenticated payload.
pub const PAYLOAD_AUTH_MASK: u8 = 0x40;

/// Session-format selector values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionFormat {
    Ipmi15 = 0x00,
    Ipmi20 = 0x06,
}

/// A parsed inbound packet with its payload extracted (and decrypted when
/// the session's confidentiality context was supplied).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub format: SessionFormat,
    pub payload_type: PayloadType,
    pub session_id: SessionId,
    pub session_seq: u32,
    pub encrypted: bool,
    pub authenticated: bool,
    pub payload: Vec<u8>,
}

/// Borrowed crypto state for one session, supplied by the caller after the
/// session lookup. Session 0 and setup-phase sessions carry neither.
#[derive(Default)]
pub struct SessionCrypto<'a> {
    pub integrity: Option<&'a IntegrityContext>,
    pub confidentiality: Option<&'a CryptContext>,
}

impl SessionCrypto<'_> {
    pub const NONE: SessionCrypto<'static> = SessionCrypto {
        integrity: None,
        confidentiality: None,
    };
}

/// An outbound payload waiting to be framed.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub payload_type: PayloadType,
    /// The id stamped on the wire: the remote console's session id.
    pub wire_session_id: SessionId,
    pub payload: Vec<u8>,
    pub encrypt: bool,
    pub authenticate: bool,
}

fn check_len(packet: &[u8], need: usize) -> WireResult<()> {
    if packet.len() < need {
        return Err(WireError::Truncated {
            need,
            have: packet.len(),
        });
    }
    Ok(())
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes[..4].try_into().expect("caller checked length"))
}

/// Validates the outer RMCP header and returns the session format.
///
/// Parsers reject any packet whose outer fields deviate; there is no
/// tolerance for other RMCP classes or ACK sequence numbers.
pub fn parse_outer(packet: &[u8]) -> WireResult<SessionFormat> {
    check_len(packet, RMCP_HEADER_LEN + 1)?;
    if packet[0] != RMCP_VERSION
        || packet[1] != 0x00
        || packet[2] != RMCP_SEQ
        || packet[3] != RMCP_CLASS_IPMI
    {
        return Err(WireError::BadRmcpHeader);
    }
    match packet[RMCP_HEADER_LEN] {
        0x00 => Ok(SessionFormat::Ipmi15),
        0x06 => Ok(SessionFormat::Ipmi20),
        other => Err(WireError::UnsupportedFormat(other)),
    }
}

/// Cheap pre-parse returning the session id so the caller can look up the
/// session (and its crypto state) before committing to a full unflatten.
pub fn peek_session_id(packet: &[u8]) -> WireResult<(SessionFormat, SessionId)> {
    let format = parse_outer(packet)?;
    let id = match format {
        SessionFormat::Ipmi15 => {
            check_len(packet, IPMI15_HEADER_LEN)?;
            read_u32_le(&packet[9..13])
        }
        SessionFormat::Ipmi20 => {
            check_len(packet, IPMI20_HEADER_LEN)?;
            read_u32_le(&packet[6..10])
        }
    };
    Ok((format, SessionId::new(id)))
}

/// Parses a full inbound packet, verifying integrity and decrypting the
/// payload with the supplied session crypto.
pub fn unflatten(packet: &[u8], crypto: &SessionCrypto<'_>) -> WireResult<InboundMessage> {
    match parse_outer(packet)? {
        SessionFormat::Ipmi15 => unflatten_ipmi15(packet),
        SessionFormat::Ipmi20 => unflatten_ipmi20(packet, crypto),
    }
}

/// IPMI 1.5 session header: seq(4) ‖ session-id(4) ‖ payload-len(1). The
/// legacy format carries no authentication or confidentiality flags.
fn unflatten_ipmi15(packet: &[u8]) -> WireResult<InboundMessage> {
    check_len(packet, IPMI15_HEADER_LEN)?;
    let session_seq = read_u32_le(&packet[5..9]);
    let session_id = SessionId::new(read_u32_le(&packet[9..13]));
    let payload_len = usize::from(packet[13]);

    check_len(packet, IPMI15_HEADER_LEN + payload_len)?;
    let payload = packet[IPMI15_HEADER_LEN..IPMI15_HEADER_LEN + payload_len].to_vec();

    Ok(InboundMessage {
        format: SessionFormat::Ipmi15,
        payload_type: PayloadType::Ipmi,
        session_id,
        session_seq,
        encrypted: false,
        authenticated: false,
        payload,
    })
}

fn unflatten_ipmi20(packet: &[u8], crypto: &SessionCrypto<'_>) -> WireResult<InboundMessage> {
    check_len(packet, IPMI20_HEADER_LEN)?;

    let type_byte = packet[5];
    let encrypted = type_byte & PAYLOAD_ENCRYPT_MASK != 0;
    let authenticated = type_byte & PAYLOAD_AUTH_MASK != 0;
    let payload_type = PayloadType::from_wire(type_byte & 0x3F)
        .ok_or(WireError::UnknownPayloadType(type_byte & 0x3F))?;

    let session_id = SessionId::new(read_u32_le(&packet[6..10]));
    let session_seq = read_u32_le(&packet[10..14]);
    let payload_len = usize::from(u16::from_le_bytes([packet[14], packet[15]]));

    check_len(packet, IPMI20_HEADER_LEN + payload_len)?;

    if authenticated {
        verify_integrity(packet, payload_len, crypto)?;
    }

    let raw = &packet[IPMI20_HEADER_LEN..IPMI20_HEADER_LEN + payload_len];
    let payload = if encrypted {
        let ctx = crypto
            .confidentiality
            .ok_or(WireError::MissingCryptContext)?;
        ctx.decrypt(raw)?
    } else {
        raw.to_vec()
    };

    Ok(InboundMessage {
        format: SessionFormat::Ipmi20,
        payload_type,
        session_id,
        session_seq,
        encrypted,
        authenticated,
        payload,
    })
}

/// Integrity pad length for a given payload length. The covered range must
/// be a multiple of four; pad runs 1..=4 bytes of 0xFF (historically never
/// zero, for host-tool compatibility).
fn integrity_pad_len(payload_len: usize) -> usize {
    4 - ((payload_len + 2) & 3)
}

fn verify_integrity(
    packet: &[u8],
    payload_len: usize,
    crypto: &SessionCrypto<'_>,
) -> WireResult<()> {
    let integrity = crypto
        .integrity
        .ok_or(WireError::MissingIntegrityContext)?;

    let pad_len = integrity_pad_len(payload_len);
    let trailer_pos = IPMI20_HEADER_LEN + payload_len + pad_len;
    // pad-length byte + next-header byte + AuthCode
    check_len(packet, trailer_pos + 2 + integrity.auth_code_len())?;

    if usize::from(packet[trailer_pos]) != pad_len {
        return Err(WireError::BadIntegrityPad);
    }

    let auth_code_pos = trailer_pos + 2;
    if packet.len() - auth_code_pos != integrity.auth_code_len() {
        return Err(WireError::BadIntegrityPad);
    }

    // Covered range: format byte through the byte before the AuthCode.
    let covered = &packet[RMCP_HEADER_LEN..auth_code_pos];
    if !integrity.verify(covered, &packet[auth_code_pos..]) {
        return Err(WireError::IntegrityCheckFailed);
    }
    Ok(())
}

fn rmcp_prefix(format: SessionFormat) -> [u8; 5] {
    [
        RMCP_VERSION,
        0x00,
        RMCP_SEQ,
        RMCP_CLASS_IPMI,
        format as u8,
    ]
}

/// Frames an IPMI 1.5 response packet (sequence 0, legacy pad trailer).
pub fn flatten_ipmi15(wire_session_id: SessionId, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(IPMI15_HEADER_LEN + payload.len() + 1);
    packet.extend_from_slice(&rmcp_prefix(SessionFormat::Ipmi15));
    packet.extend_from_slice(&0u32.to_le_bytes());
    packet.extend_from_slice(&wire_session_id.as_u32().to_le_bytes());
    packet.push(payload.len() as u8);
    packet.extend_from_slice(payload);
    packet.push(0x00); // legacy pad
    packet
}

/// Frames an IPMI 2.0 packet.
///
/// `session_seq` is the already-assigned outbound sequence number: 0 for
/// session id 0, otherwise the session's pre-incremented counter.
pub fn flatten_ipmi20(
    msg: &OutboundMessage,
    session_seq: u32,
    crypto: &SessionCrypto<'_>,
) -> WireResult<Vec<u8>> {
    let mut type_byte = msg.payload_type.as_u8();
    if msg.encrypt {
        type_byte |= PAYLOAD_ENCRYPT_MASK;
    }
    if msg.authenticate {
        type_byte |= PAYLOAD_AUTH_MASK;
    }

    let payload = if msg.encrypt {
        let ctx = crypto
            .confidentiality
            .ok_or(WireError::MissingCryptContext)?;
        ctx.encrypt(&msg.payload)
    } else {
        msg.payload.clone()
    };

    let mut packet = Vec::with_capacity(IPMI20_HEADER_LEN + payload.len() + 24);
    packet.extend_from_slice(&rmcp_prefix(SessionFormat::Ipmi20));
    packet.push(type_byte);
    packet.extend_from_slice(&msg.wire_session_id.as_u32().to_le_bytes());
    packet.extend_from_slice(&session_seq.to_le_bytes());
    packet.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    packet.extend_from_slice(&payload);

    if msg.authenticate {
        let integrity = crypto
            .integrity
            .ok_or(WireError::MissingIntegrityContext)?;
        let pad_len = integrity_pad_len(payload.len());
        packet.resize(packet.len() + pad_len, 0xFF);
        packet.push(pad_len as u8);
        packet.push(RMCP_CLASS_IPMI); // next header
        let auth_code = integrity.generate(&packet[RMCP_HEADER_LEN..]);
        packet.extend_from_slice(&auth_code);
    }

    Ok(packet)
}
