//! Upload transports.
//!
//! How image bytes reach the BMC is independent of where they land. The
//! in-band transport carries bytes inside the blob write itself; the
//! bridged transports (two memory-mapped windows and the TCP bridge) carry
//! only a chunk header, and the bytes are pulled out of the bridge through
//! [`MemoryWindow`]. The concrete bridge drivers live outside this crate.

/// Flag bits in the blob open `flags` word.
pub mod flags {
    pub const OPEN_READ: u16 = 1 << 0;
    pub const OPEN_WRITE: u16 = 1 << 1;

    /// Bytes arrive in-band in the blob write payload.
    pub const IN_BAND: u16 = 1 << 8;
    /// Memory-mapped bridge A.
    pub const BRIDGE_A: u16 = 1 << 9;
    /// Memory-mapped bridge B.
    pub const BRIDGE_B: u16 = 1 << 10;
    /// TCP bridge.
    pub const TCP: u16 = 1 << 11;

    /// The 8-bit field of `flags` that selects the transport.
    pub const TRANSPORT_MASK: u16 = 0xFF00;
}

/// Size of the chunk header written in-band for bridged transports.
pub const CHUNK_HEADER_LEN: usize = 4;

/// Seam to a bridged transport: a window of memory (or a stream) the host
/// fills and the BMC copies out of.
pub trait MemoryWindow {
    /// Initializes the bridge. Idempotent where the hardware allows.
    fn open(&mut self) -> bool;

    /// Releases the bridge.
    fn close(&mut self) -> bool;

    /// Copies `length` bytes out of the bridge.
    fn copy_from(&mut self, length: u32) -> Vec<u8>;

    /// Applies window configuration (used to negotiate a mapping region).
    fn write_meta(&mut self, configuration: &[u8]) -> bool;

    /// Reads window configuration back (e.g. the mapped address).
    fn read_meta(&mut self) -> Vec<u8>;
}

/// One supported transport: its flag bit and, for bridged transports, the
/// window to copy through. The in-band transport has no window.
pub struct TransportPack {
    pub bitmask: u16,
    pub window: Option<Box<dyn MemoryWindow>>,
}

impl TransportPack {
    /// The in-band transport.
    pub fn in_band() -> Self {
        Self {
            bitmask: flags::IN_BAND,
            window: None,
        }
    }

    /// A bridged transport behind a memory window.
    pub fn bridged(bitmask: u16, window: Box<dyn MemoryWindow>) -> Self {
        Self {
            bitmask,
            window: Some(window),
        }
    }
}

impl std::fmt::Debug for TransportPack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPack")
            .field("bitmask", &format_args!("{:#06x}", self.bitmask))
            .field("window", &self.window.is_some())
            .finish()
    }
}

/// Parses the in-band chunk header written for bridged transports: a
/// little-endian length of the bytes queued in the bridge.
pub fn parse_chunk_header(data: &[u8]) -> Option<u32> {
    if data.len() != CHUNK_HEADER_LEN {
        return None;
    }
    Some(u32::from_le_bytes(data.try_into().expect("length checked")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_header_is_exact_little_endian() {
        assert_eq!(parse_chunk_header(&[0x10, 0x00, 0x00, 0x00]), Some(16));
        assert_eq!(parse_chunk_header(&[0x78, 0x56, 0x34, 0x12]), Some(0x1234_5678));
        assert_eq!(parse_chunk_header(&[0x10, 0x00, 0x00]), None);
        assert_eq!(parse_chunk_header(&[0x10, 0x00, 0x00, 0x00, 0x00]), None);
    }

    #[test]
    fn transport_mask_covers_all_bridges() {
        for bit in [flags::IN_BAND, flags::BRIDGE_A, flags::BRIDGE_B, flags::TCP] {
            assert_eq!(bit & flags::TRANSPORT_MASK, bit);
            assert_eq!(bit & (flags::OPEN_READ | flags::OPEN_WRITE), 0);
        }
    }
}
