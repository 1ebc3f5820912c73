//! IPMI LAN sub-frame carried inside IPMI-type payloads.
//!
//! An IPMI payload wraps the command in a six-byte LAN header and a one-byte
//! checksum trailer. Both checksums are 8-bit two's complement: summed with
//! the covered bytes modulo 256 the result is zero.

use kiln_types::PayloadType;

use crate::{WireError, WireResult};

/// Requester address used for BMC-originated (unsolicited) requests.
pub const REQUESTER_BMC_ADDR: u8 = 0x20;
/// Responder address used for BMC-originated requests.
pub const RESPONDER_BMC_ADDR: u8 = 0x81;

/// LAN header + trailer overhead around a command payload.
pub const LAN_HEADER_LEN: usize = 6;
pub const LAN_TRAILER_LEN: usize = 1;

/// 8-bit two's-complement checksum.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes
        .iter()
        .fold(0u8, |acc, &byte| acc.wrapping_add(byte));
    0u8.wrapping_sub(sum)
}

/// A parsed IPMI LAN request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpmiRequest {
    pub rs_addr: u8,
    /// Network function and LUN byte; the net-function occupies the high
    /// six bits.
    pub netfn_lun: u8,
    pub rq_addr: u8,
    pub rq_seq: u8,
    pub cmd: u8,
    pub data: Vec<u8>,
}

impl IpmiRequest {
    /// Parses a LAN-framed request. Checksums are carried but not enforced
    /// on receive, matching established BMC behaviour; the transport-level
    /// AuthCode is the integrity boundary.
    pub fn parse(payload: &[u8]) -> WireResult<Self> {
        if payload.len() < LAN_HEADER_LEN + LAN_TRAILER_LEN {
            return Err(WireError::Truncated {
                need: LAN_HEADER_LEN + LAN_TRAILER_LEN,
                have: payload.len(),
            });
        }
        Ok(Self {
            rs_addr: payload[0],
            netfn_lun: payload[1],
            rq_addr: payload[3],
            rq_seq: payload[4],
            cmd: payload[5],
            data: payload[LAN_HEADER_LEN..payload.len() - LAN_TRAILER_LEN].to_vec(),
        })
    }

    pub fn netfn(&self) -> u8 {
        self.netfn_lun >> 2
    }

    /// The 24-bit command key used for command-table lookup:
    /// payload-type ‖ netfn byte ‖ command.
    pub fn command_key(&self) -> u32 {
        command_key(PayloadType::Ipmi, self.netfn_lun, self.cmd)
    }

    /// Builds the LAN-framed response for this request. `data` starts with
    /// the completion code. The response flips the direction bit in the
    /// net-function and recomputes both checksums.
    pub fn build_response(&self, data: &[u8]) -> Vec<u8> {
        build_lan_frame(
            self.rq_addr,
            self.netfn_lun | 0x04,
            self.rs_addr,
            self.rq_seq,
            self.cmd,
            data,
        )
    }
}

/// Builds a LAN frame with both checksums populated.
fn build_lan_frame(addr1: u8, netfn_lun: u8, addr2: u8, seq: u8, cmd: u8, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LAN_HEADER_LEN + data.len() + LAN_TRAILER_LEN);
    out.push(addr1);
    out.push(netfn_lun);
    out.push(checksum(&out[0..2]));
    out.push(addr2);
    out.push(seq);
    out.push(cmd);
    out.extend_from_slice(data);
    out.push(checksum(&out[3..]));
    out
}

/// Builds an unsolicited BMC-originated request frame (used for the SOL
/// "activating" notification).
pub fn build_request(netfn: u8, cmd: u8, data: &[u8]) -> Vec<u8> {
    build_lan_frame(
        REQUESTER_BMC_ADDR,
        netfn << 2,
        RESPONDER_BMC_ADDR,
        0,
        cmd,
        data,
    )
}

/// Packs the command-table key: payload-type in bits 23:16, the netfn byte
/// in bits 15:8 (net-function in its high six bits), command in bits 7:0.
pub fn command_key(payload_type: PayloadType, netfn_lun: u8, cmd: u8) -> u32 {
    (u32::from(payload_type.as_u8()) << 16) | (u32::from(netfn_lun & 0xFC) << 8) | u32::from(cmd)
}

/// The key for a payload routed entirely by type (session setup, SOL).
pub fn payload_key(payload_type: PayloadType) -> u32 {
    u32::from(payload_type.as_u8()) << 16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_sums_to_zero() {
        for bytes in [&[0x20u8, 0x18][..], &[0x81, 0x04, 0x3B], &[], &[0xFF]] {
            let cs = checksum(bytes);
            let total = bytes
                .iter()
                .fold(cs, |acc, &byte| acc.wrapping_add(byte));
            assert_eq!(total, 0);
        }
    }

    #[test]
    fn request_parse_extracts_fields() {
        // rsAddr, netfn/lun, cs1, rqAddr, rqSeq, cmd, data..., cs2
        let payload = [0x20, 0x18, 0xC8, 0x81, 0x04, 0x3B, 0x04, 0xAA];
        let request = IpmiRequest::parse(&payload).unwrap();
        assert_eq!(request.rs_addr, 0x20);
        assert_eq!(request.netfn(), 0x06);
        assert_eq!(request.cmd, 0x3B);
        assert_eq!(request.data, [0x04]);
    }

    #[test]
    fn response_flips_direction_and_checksums() {
        let payload = [0x20, 0x18, 0xC8, 0x81, 0x04, 0x3C, 0xAA];
        let request = IpmiRequest::parse(&payload).unwrap();
        let response = request.build_response(&[0x00, 0x04]);

        assert_eq!(response[0], 0x81); // rqAddr comes back first
        assert_eq!(response[1], 0x18 | 0x04); // direction bit set
        assert_eq!(response[2], checksum(&response[0..2]));
        assert_eq!(response[3], 0x20);
        assert_eq!(response[4], 0x04);
        assert_eq!(response[5], 0x3C);
        assert_eq!(&response[6..8], &[0x00, 0x04]);
        assert_eq!(*response.last().unwrap(), checksum(&response[3..response.len() - 1]));
    }

    #[test]
    fn command_key_packs_type_netfn_cmd() {
        let payload = [0x20, 0x18, 0xC8, 0x81, 0x04, 0x3B, 0xAA];
        let request = IpmiRequest::parse(&payload).unwrap();
        assert_eq!(request.command_key(), 0x0000_183B);
        assert_eq!(payload_key(PayloadType::OpenSessionRequest), 0x0010_0000);
        assert_eq!(payload_key(PayloadType::Sol), 0x0001_0000);
    }

    #[test]
    fn unsolicited_request_frame() {
        let frame = build_request(0x0C, 0x20, &[0x00, 0x01]);
        let request = IpmiRequest::parse(&frame).unwrap();
        assert_eq!(request.rs_addr, REQUESTER_BMC_ADDR);
        assert_eq!(request.netfn(), 0x0C);
        assert_eq!(request.cmd, 0x20);
        assert_eq!(request.data, [0x00, 0x01]);
    }

    #[test]
    fn undersized_frame_rejected() {
        assert!(IpmiRequest::parse(&[0x20, 0x18, 0xC8]).is_err());
    }
}
