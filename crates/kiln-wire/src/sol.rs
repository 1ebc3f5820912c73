//! SOL payload codec.
//!
//! A SOL payload is a four-byte header followed by console character data:
//! packet sequence number, ACK/NACK sequence number, accepted character
//! count, and an operation/status byte. Sequence numbers use the low four
//! bits; zero marks an ack-only (informational) packet.

use crate::{WireError, WireResult};

/// SOL payload header length.
pub const SOL_HEADER_LEN: usize = 4;

/// Maximum character bytes carried per SOL payload.
pub const MAX_SOL_PAYLOAD: usize = 255;

/// Operation/status byte: bit 6 is the ACK(0)/NACK(1) flag in both
/// directions.
pub const OP_NACK: u8 = 1 << 6;

/// Outbound operation byte: bit 5 reports "character data unavailable".
pub const OP_CHAR_UNAVAILABLE: u8 = 1 << 5;

/// A decoded SOL payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolPayload {
    /// Packet sequence number (0 = ack-only).
    pub seq: u8,
    /// Sequence number being ACKed/NACKed (0 = informational).
    pub ack_seq: u8,
    /// Accepted character count for the ACKed packet.
    pub accepted_count: u8,
    /// Raw operation/status byte.
    pub operation: u8,
    /// Console character data.
    pub data: Vec<u8>,
}

impl SolPayload {
    pub fn parse(payload: &[u8]) -> WireResult<Self> {
        if payload.len() < SOL_HEADER_LEN {
            return Err(WireError::Truncated {
                need: SOL_HEADER_LEN,
                have: payload.len(),
            });
        }
        Ok(Self {
            seq: payload[0] & 0x0F,
            ack_seq: payload[1] & 0x0F,
            accepted_count: payload[2],
            operation: payload[3],
            data: payload[SOL_HEADER_LEN..].to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SOL_HEADER_LEN + self.data.len());
        out.push(self.seq & 0x0F);
        out.push(self.ack_seq & 0x0F);
        out.push(self.accepted_count);
        out.push(self.operation);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn is_nack(&self) -> bool {
        self.operation & OP_NACK != 0
    }

    pub fn set_nack(&mut self, nack: bool) {
        if nack {
            self.operation |= OP_NACK;
        } else {
            self.operation &= !OP_NACK;
        }
    }
}
