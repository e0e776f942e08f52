//! Frame stream datagram header
//!
//! ```text
//! ┌───────────┬────────────┬────────────┬─────────────┬─────────────┬──────────────┬─────────┐
//! │ signature │ headerSize │ frameSize  │ frameIndex  │ partNumber  │ payloadSize  │ payload │
//! │ "ARIS"    │ u32 LE     │ u32 LE     │ u32 LE      │ u32 LE      │ u32 LE       │ bytes   │
//! └───────────┴────────────┴────────────┴─────────────┴─────────────┴──────────────┴─────────┘
//! ```
//!
//! Part 0 carries a [`crate::types::FrameHeader`]; parts 1..N carry samples.

use crate::{Result, SonarError};

/// `"ARIS"` read as a little-endian u32.
pub const FRAME_PACKET_SIGNATURE: u32 = 0x5349_5241;

/// Encoded size of [`FramePacketHeader`].
pub const FRAME_PACKET_HEADER_SIZE: usize = 24;

/// Per-datagram header of the frame stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePacketHeader {
    pub header_size: u32,
    pub frame_size: u32,
    pub frame_index: u32,
    pub part_number: u32,
    pub payload_size: u32,
}

impl FramePacketHeader {
    /// Parse a datagram into its header and payload.
    pub fn parse(datagram: &[u8]) -> Result<(Self, &[u8])> {
        if datagram.len() < FRAME_PACKET_HEADER_SIZE {
            return Err(SonarError::protocol_error(
                "Frame packet",
                format!(
                    "datagram of {} bytes is shorter than the {}-byte header",
                    datagram.len(),
                    FRAME_PACKET_HEADER_SIZE
                ),
            ));
        }

        let signature = read_u32(datagram, 0);
        if signature != FRAME_PACKET_SIGNATURE {
            return Err(SonarError::protocol_error(
                "Frame packet",
                format!("bad signature {:#010x}", signature),
            ));
        }

        let header = Self {
            header_size: read_u32(datagram, 4),
            frame_size: read_u32(datagram, 8),
            frame_index: read_u32(datagram, 12),
            part_number: read_u32(datagram, 16),
            payload_size: read_u32(datagram, 20),
        };

        let start = header.header_size as usize;
        if start < FRAME_PACKET_HEADER_SIZE {
            return Err(SonarError::protocol_error(
                "Frame packet",
                format!("declared header size {} is too small", header.header_size),
            ));
        }
        let end = start.checked_add(header.payload_size as usize).ok_or_else(|| {
            SonarError::protocol_error("Frame packet", "payload size overflows")
        })?;
        if end > datagram.len() {
            return Err(SonarError::protocol_error(
                "Frame packet",
                format!("payload ends at {} but datagram has {} bytes", end, datagram.len()),
            ));
        }

        Ok((header, &datagram[start..end]))
    }

    pub fn to_bytes(&self) -> [u8; FRAME_PACKET_HEADER_SIZE] {
        let mut bytes = [0u8; FRAME_PACKET_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&FRAME_PACKET_SIGNATURE.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.header_size.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.frame_size.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.frame_index.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.part_number.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.payload_size.to_le_bytes());
        bytes
    }
}

/// Build one datagram of the frame stream.
pub fn encode_packet(frame_index: u32, part_number: u32, frame_size: u32, payload: &[u8]) -> Vec<u8> {
    let header = FramePacketHeader {
        header_size: FRAME_PACKET_HEADER_SIZE as u32,
        frame_size,
        frame_index,
        part_number,
        payload_size: payload.len() as u32,
    };
    let mut datagram = Vec::with_capacity(FRAME_PACKET_HEADER_SIZE + payload.len());
    datagram.extend_from_slice(&header.to_bytes());
    datagram.extend_from_slice(payload);
    datagram
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_aris_in_little_endian() {
        assert_eq!(&FRAME_PACKET_SIGNATURE.to_le_bytes(), b"ARIS");
    }

    #[test]
    fn parse_splits_header_and_payload() {
        let datagram = encode_packet(7, 2, 4096, &[1, 2, 3]);
        let (header, payload) = FramePacketHeader::parse(&datagram).unwrap();
        assert_eq!(header.frame_index, 7);
        assert_eq!(header.part_number, 2);
        assert_eq!(header.frame_size, 4096);
        assert_eq!(payload, &[1, 2, 3]);
    }

    #[test]
    fn bad_signature_is_rejected() {
        let mut datagram = encode_packet(1, 0, 0, &[0; 4]);
        datagram[0] = b'X';
        assert!(matches!(FramePacketHeader::parse(&datagram), Err(SonarError::Protocol { .. })));
    }

    #[test]
    fn short_datagram_is_rejected() {
        let datagram = encode_packet(1, 1, 0, &[]);
        assert!(FramePacketHeader::parse(&datagram[..20]).is_err());
    }

    #[test]
    fn payload_past_end_is_rejected() {
        let mut datagram = encode_packet(1, 1, 0, &[5, 6, 7, 8]);
        datagram.truncate(FRAME_PACKET_HEADER_SIZE + 2);
        assert!(FramePacketHeader::parse(&datagram).is_err());
    }

    #[test]
    fn trailing_bytes_beyond_payload_are_ignored() {
        let mut datagram = encode_packet(1, 1, 0, &[5, 6]);
        datagram.extend_from_slice(&[0xFF, 0xFF]);
        let (_, payload) = FramePacketHeader::parse(&datagram).unwrap();
        assert_eq!(payload, &[5, 6]);
    }
}
