//! # kiln-types: Core types for the Kiln management plane
//!
//! This crate contains shared types used across the Kiln system:
//! - Session identity ([`SessionId`], [`SessionHandle`], [`ChannelInstance`])
//! - Privilege levels ([`Privilege`])
//! - Session lifecycle ([`SessionState`]) and idle windows
//! - Sequence numbers ([`SessionSeqNumbers`], [`SolSeqNumbers`])
//! - Wire enums ([`PayloadType`], [`RakpStatus`], [`CompletionCode`])

use std::fmt::{self, Display};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Channel instance
// ============================================================================

/// Which co-hosted channel daemon this process is.
///
/// Two bits of every BMC session id (bits 31:30) and every session handle
/// (bits 7:6) carry the channel instance, so ids stay globally unique across
/// daemons serving different LAN channels on the same BMC.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, PartialOrd, Ord,
)]
pub struct ChannelInstance(u8);

impl ChannelInstance {
    /// Channel instances occupy two bits.
    pub const MAX: u8 = 0b11;

    /// Creates a channel instance, masking to the two valid bits.
    pub const fn new(instance: u8) -> Self {
        Self(instance & Self::MAX)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl Display for ChannelInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

// ============================================================================
// SessionId
// ============================================================================

/// Number of concurrent sessions allowed per channel.
pub const MAX_SESSIONS_PER_CHANNEL: usize = 15;

/// Bits of a session id that hold the random draw (low 30).
pub const SESSION_ID_RANDOM_MASK: u32 = 0x3FFF_FFFF;

/// Shift placing the channel instance into a session id.
pub const SESSION_ID_INSTANCE_SHIFT: u32 = 30;

/// A 32-bit RMCP+ session id.
///
/// Id 0 is the reserved pseudo-session that carries pre-session traffic
/// (Open Session, RAKP, discovery commands); it never holds key material.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, PartialOrd, Ord,
)]
pub struct SessionId(u32);

impl SessionId {
    /// The reserved pseudo-session.
    pub const ZERO: SessionId = SessionId(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Composes a session id from a random draw and the owning channel
    /// instance. The high two bits of the draw are discarded.
    pub fn compose(random: u32, instance: ChannelInstance) -> Self {
        Self((random & SESSION_ID_RANDOM_MASK) | (u32::from(instance.as_u8()) << SESSION_ID_INSTANCE_SHIFT))
    }

    /// The channel instance encoded in the high two bits.
    pub fn channel_instance(self) -> ChannelInstance {
        ChannelInstance::new((self.0 >> SESSION_ID_INSTANCE_SHIFT) as u8)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<u32> for SessionId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<SessionId> for u32 {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

// ============================================================================
// SessionHandle
// ============================================================================

/// Bits of a handle that hold the slot index (low 6).
pub const HANDLE_SLOT_MASK: u8 = 0x3F;

/// Shift placing the channel instance into a session handle.
pub const HANDLE_INSTANCE_SHIFT: u8 = 6;

/// A short 8-bit session handle.
///
/// The low six bits are a slot index 1..=15; the high two bits carry the
/// channel instance. Handle 0 is reserved as "invalid" so host tools can use
/// it as a sentinel in Close Session requests.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, PartialOrd, Ord,
)]
pub struct SessionHandle(u8);

impl SessionHandle {
    /// The reserved invalid handle.
    pub const INVALID: SessionHandle = SessionHandle(0);

    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// Composes a handle from a slot index and the owning channel instance.
    pub fn compose(slot: u8, instance: ChannelInstance) -> Self {
        Self((slot & HANDLE_SLOT_MASK) | (instance.as_u8() << HANDLE_INSTANCE_SHIFT))
    }

    /// The slot index with the instance bits stripped.
    pub fn slot(self) -> u8 {
        self.0 & HANDLE_SLOT_MASK
    }

    /// The channel instance encoded in the high two bits.
    pub fn channel_instance(self) -> ChannelInstance {
        ChannelInstance::new(self.0 >> HANDLE_INSTANCE_SHIFT)
    }

    pub fn is_invalid(self) -> bool {
        self.0 == 0
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

// ============================================================================
// Privilege
// ============================================================================

/// Mask extracting the privilege nibble from a requested-maximum-privilege
/// byte (RAKP message 1 carries lookup-mode bits above it).
pub const REQ_MAX_PRIV_MASK: u8 = 0x0F;

/// Bit 4 of the requested-maximum-privilege byte: set means name-only user
/// lookup, clear means the lookup also matches the privilege level.
pub const NAME_ONLY_LOOKUP: u8 = 0x10;

/// IPMI privilege levels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[repr(u8)]
pub enum Privilege {
    /// 0h in a request means "highest level matching the proposed algorithms".
    HighestMatching = 0,
    Callback = 1,
    User = 2,
    Operator = 3,
    Admin = 4,
    Oem = 5,
}

impl Privilege {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes the privilege nibble of a requested-max-privilege byte.
    pub fn from_nibble(value: u8) -> Option<Self> {
        match value & REQ_MAX_PRIV_MASK {
            0 => Some(Self::HighestMatching),
            1 => Some(Self::Callback),
            2 => Some(Self::User),
            3 => Some(Self::Operator),
            4 => Some(Self::Admin),
            5 => Some(Self::Oem),
            _ => None,
        }
    }
}

impl Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HighestMatching => "highest-matching",
            Self::Callback => "callback",
            Self::User => "user",
            Self::Operator => "operator",
            Self::Admin => "admin",
            Self::Oem => "oem",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Session lifecycle
// ============================================================================

/// Seconds of inactivity allowed while session setup is in progress.
pub const SESSION_SETUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Seconds of inactivity allowed once a session is active.
pub const SESSION_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(60);

/// Lifecycle state of an RMCP+ session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Open Session accepted, RAKP exchange not yet complete.
    SetupInProgress,
    /// RAKP4 sent, keys installed, session carries traffic.
    Active,
    /// Close requested; the owning loop performs the actual release.
    TearDownInProgress,
}

impl SessionState {
    /// The idle window for this state, or `None` when the state is never
    /// considered active regardless of idle time.
    pub fn idle_window(self) -> Option<Duration> {
        match self {
            Self::SetupInProgress => Some(SESSION_SETUP_TIMEOUT),
            Self::Active => Some(SESSION_INACTIVITY_TIMEOUT),
            Self::TearDownInProgress => None,
        }
    }
}

// ============================================================================
// Session sequence numbers
// ============================================================================

/// Authenticated session sequence numbers, one inbound and one outbound
/// 32-bit counter.
///
/// Counters start at zero and the outbound counter is pre-incremented, so
/// the first transmitted packet carries 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSeqNumbers {
    inbound: u32,
    outbound: u32,
}

impl SessionSeqNumbers {
    pub fn inbound(&self) -> u32 {
        self.inbound
    }

    pub fn outbound(&self) -> u32 {
        self.outbound
    }

    /// Records the sequence number seen on an inbound packet.
    pub fn record_inbound(&mut self, seq: u32) {
        self.inbound = seq;
    }

    /// Pre-increments and returns the outbound sequence number.
    pub fn next_outbound(&mut self) -> u32 {
        self.outbound = self.outbound.wrapping_add(1);
        self.outbound
    }
}

// ============================================================================
// SOL sequence numbers
// ============================================================================

/// SOL packet sequence numbers: two independent 4-bit spaces that wrap
/// 15 → 1. Zero is never a valid data sequence number; it marks ack-only
/// (informational) packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolSeqNumbers {
    inbound: u8,
    outbound: u8,
}

impl Default for SolSeqNumbers {
    fn default() -> Self {
        // The first inbound data packet carries 1; outbound starts at 0 so
        // the first pre-increment also yields 1.
        Self {
            inbound: 1,
            outbound: 0,
        }
    }
}

impl SolSeqNumbers {
    const WRAP: u8 = 0x10;

    /// The sequence number expected on the next inbound data packet.
    pub fn expected_inbound(&self) -> u8 {
        self.inbound
    }

    /// The sequence number of the last transmitted outbound packet (the
    /// value a peer's ack must carry).
    pub fn last_outbound(&self) -> u8 {
        self.outbound
    }

    /// Advances the inbound space after accepting a data packet.
    pub fn advance_inbound(&mut self) {
        self.inbound += 1;
        if self.inbound == Self::WRAP {
            self.inbound = 1;
        }
    }

    /// Pre-increments the outbound space and returns the number to stamp on
    /// the outgoing packet.
    pub fn next_outbound(&mut self) -> u8 {
        self.outbound += 1;
        if self.outbound == Self::WRAP {
            self.outbound = 1;
        }
        self.outbound
    }
}

// ============================================================================
// Payload types
// ============================================================================

/// RMCP+ payload types routed by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PayloadType {
    Ipmi = 0x00,
    Sol = 0x01,
    OpenSessionRequest = 0x10,
    OpenSessionResponse = 0x11,
    Rakp1 = 0x12,
    Rakp2 = 0x13,
    Rakp3 = 0x14,
    Rakp4 = 0x15,
}

impl PayloadType {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Ipmi),
            0x01 => Some(Self::Sol),
            0x10 => Some(Self::OpenSessionRequest),
            0x11 => Some(Self::OpenSessionResponse),
            0x12 => Some(Self::Rakp1),
            0x13 => Some(Self::Rakp2),
            0x14 => Some(Self::Rakp3),
            0x15 => Some(Self::Rakp4),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// True for payload types permitted on session id 0.
    pub fn is_sessionless(self) -> bool {
        !matches!(self, Self::Sol)
    }

    /// The payload type stamped on the response to this request, for the
    /// session-setup exchanges whose response is a different type.
    pub fn response_type(self) -> Self {
        match self {
            Self::OpenSessionRequest => Self::OpenSessionResponse,
            Self::Rakp1 => Self::Rakp2,
            Self::Rakp3 => Self::Rakp4,
            other => other,
        }
    }
}

// ============================================================================
// RAKP status codes
// ============================================================================

/// RMCP+ / RAKP message status codes (IPMI 2.0 table 13-15).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RakpStatus {
    NoError = 0x00,
    InsufficientResource = 0x01,
    InvalidSessionId = 0x02,
    InvalidPayloadType = 0x03,
    InvalidAuthAlgo = 0x04,
    InvalidIntegrityAlgo = 0x05,
    NoMatchAuthPayload = 0x06,
    NoMatchIntegrityPayload = 0x07,
    InactiveSessionId = 0x08,
    InactiveRole = 0x09,
    UnauthRolePriv = 0x0A,
    InsufficientResourcesRole = 0x0B,
    InvalidNameLength = 0x0C,
    UnauthName = 0x0D,
    UnauthGuid = 0x0E,
    InvalidIntegrityValue = 0x0F,
    InvalidConfAlgo = 0x10,
    NoCipherSuiteMatch = 0x11,
    IllegalParameter = 0x12,
}

impl RakpStatus {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

// ============================================================================
// IPMI completion codes
// ============================================================================

/// An IPMI completion code.
///
/// The core treats these opaquely beyond the handful it issues itself, so
/// this is a transparent byte wrapper with named constants rather than a
/// closed enum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, PartialOrd, Ord,
)]
pub struct CompletionCode(pub u8);

impl CompletionCode {
    pub const SUCCESS: CompletionCode = CompletionCode(0x00);
    pub const INVALID_COMMAND: CompletionCode = CompletionCode(0xC1);
    pub const REQ_DATA_LEN_INVALID: CompletionCode = CompletionCode(0xC7);
    pub const INVALID_FIELD_REQUEST: CompletionCode = CompletionCode(0xCC);
    pub const INSUFFICIENT_PRIVILEGE: CompletionCode = CompletionCode(0xD4);
    pub const UNSPECIFIED_ERROR: CompletionCode = CompletionCode(0xFF);

    /// Set Session Privilege: requested level exceeds the user/channel limit.
    pub const EXCEEDS_PRIV_LIMIT: CompletionCode = CompletionCode(0x81);
    /// Close Session: no such session id.
    pub const INVALID_SESSION_ID: CompletionCode = CompletionCode(0x87);
    /// Close Session: no such session handle.
    pub const INVALID_SESSION_HANDLE: CompletionCode = CompletionCode(0x88);

    /// Activate Payload: instance already active.
    pub const PAYLOAD_ALREADY_ACTIVE: CompletionCode = CompletionCode(0x80);
    /// Activate Payload: payload type disabled.
    pub const PAYLOAD_TYPE_DISABLED: CompletionCode = CompletionCode(0x81);
    /// Activate Payload: session requires encryption for this payload.
    pub const PAYLOAD_WITHOUT_ENCRYPTION: CompletionCode = CompletionCode(0x84);
    /// Deactivate Payload: instance already deactivated.
    pub const PAYLOAD_DEACTIVATED: CompletionCode = CompletionCode(0x80);
    /// Set/Get SOL Configuration: parameter not supported.
    pub const PARAM_NOT_SUPPORTED: CompletionCode = CompletionCode(0x80);
    /// Set SOL Configuration: attempt to write a read-only parameter.
    pub const WRITE_READ_ONLY_PARAMETER: CompletionCode = CompletionCode(0x82);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl Display for CompletionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cc={:#04x}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
