// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! YMODEM packet framing

use crate::crc::crc16;
use crate::protocol::*;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
pub enum FramingError {
    /// Payload larger than the selected block size
    Oversize { len: usize, max: usize },
    /// Built packet did not come out at the framed length
    Length { len: usize, expected: usize },
}

impl std::fmt::Display for FramingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FramingError::Oversize { len, max } => {
                write!(f, "payload of {} bytes exceeds {}-byte block", len, max)
            }
            FramingError::Length { len, expected } => {
                write!(f, "framed packet is {} bytes, expected {}", len, expected)
            }
        }
    }
}

impl std::error::Error for FramingError {}

// ============================================================================
// Block Framing
// ============================================================================

/// Framing selection for a packet: the mark byte and the payload size it
/// implies. Header packets use `Small`, file data uses `Large`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    /// SOH-marked 128-byte payload
    Small,
    /// STX-marked 1024-byte payload
    Large,
}

impl Block {
    pub fn mark(self) -> u8 {
        match self {
            Block::Small => SOH,
            Block::Large => STX,
        }
    }

    pub fn payload_len(self) -> usize {
        match self {
            Block::Small => 128,
            Block::Large => 1024,
        }
    }

    pub fn framed_len(self) -> usize {
        self.payload_len() + FRAME_OVERHEAD
    }
}

// ============================================================================
// Packet Assembly
// ============================================================================

/// Frames `payload` into a complete packet: mark, sequence, inverse sequence,
/// pad-filled payload, CRC-16 big-endian. The caller owns the sequence
/// counter; it is not advanced here.
pub fn build(block: Block, seq: u8, payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    let max = block.payload_len();
    if payload.len() > max {
        return Err(FramingError::Oversize { len: payload.len(), max });
    }

    let mut packet = Vec::with_capacity(block.framed_len());
    packet.push(block.mark());
    packet.push(seq);
    packet.push(!seq);
    packet.extend_from_slice(payload);
    packet.resize(3 + max, PAD);

    let crc = crc16(&packet[3..], 0);
    packet.extend_from_slice(&crc.to_be_bytes());

    if packet.len() != block.framed_len() {
        return Err(FramingError::Length {
            len: packet.len(),
            expected: block.framed_len(),
        });
    }

    Ok(packet)
}

/// Encodes a header-packet payload: filename, NUL, decimal size, one space.
/// An empty name with size 0 terminates the batch.
pub fn header_payload(name: &str, size: u64) -> Vec<u8> {
    let mut payload = Vec::with_capacity(name.len() + 24);
    payload.extend_from_slice(name.as_bytes());
    payload.push(0);
    payload.extend_from_slice(size.to_string().as_bytes());
    payload.push(b' ');
    payload
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_inverse_pairing() {
        for seq in 0..=255u8 {
            let packet = build(Block::Small, seq, b"").unwrap();
            assert_eq!(packet[1], seq);
            assert_eq!(packet[1] as u16 + packet[2] as u16, 0xFF);
        }
    }

    #[test]
    fn test_framed_length() {
        for block in [Block::Small, Block::Large] {
            for len in [0, 1, 64, block.payload_len() - 1, block.payload_len()] {
                let payload = vec![0xA5; len];
                let packet = build(block, 7, &payload).unwrap();
                assert_eq!(packet.len(), block.payload_len() + 5);
            }
        }
    }

    #[test]
    fn test_oversize_payload_rejected() {
        let payload = vec![0; 129];
        assert_eq!(
            build(Block::Small, 0, &payload),
            Err(FramingError::Oversize { len: 129, max: 128 })
        );
    }

    #[test]
    fn test_padding_fill() {
        let packet = build(Block::Small, 3, b"abc").unwrap();
        assert_eq!(&packet[3..6], b"abc");
        assert!(packet[6..131].iter().all(|&b| b == PAD));
    }

    #[test]
    fn test_header_round_trip() {
        let payload = header_payload("firmware", 1024);
        let packet = build(Block::Small, 0, &payload).unwrap();

        assert_eq!(packet[0], SOH);
        assert_eq!(packet[1], 0);
        assert_eq!(packet[2], 0xFF);

        let body = &packet[3..131];
        let crc = u16::from_be_bytes([packet[131], packet[132]]);
        assert_eq!(crc, crc16(body, 0));

        let nul = body.iter().position(|&b| b == 0).unwrap();
        assert_eq!(&body[..nul], b"firmware");

        let rest = &body[nul + 1..];
        let space = rest.iter().position(|&b| b == b' ').unwrap();
        let size: u64 = std::str::from_utf8(&rest[..space]).unwrap().parse().unwrap();
        assert_eq!(size, 1024);
    }

    #[test]
    fn test_closing_header_payload() {
        assert_eq!(header_payload("", 0), vec![0x00, b'0', b' ']);
    }
}
