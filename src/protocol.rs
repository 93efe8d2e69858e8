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

//! YMODEM protocol constants

/// Start of header - begins a 128-byte block
pub const SOH: u8 = 0x01;

/// Start of text - begins a 1024-byte block
pub const STX: u8 = 0x02;

/// End of transmission - sender signals end of file data
pub const EOT: u8 = 0x04;

/// Acknowledge - receiver accepted the last packet
pub const ACK: u8 = 0x06;

/// Negative acknowledge - receiver rejected the last packet
pub const NAK: u8 = 0x15;

/// Cancel - receiver aborts the transfer, always sent in pairs
pub const CA: u8 = 0x18;

/// CRC mode request - receiver asks for CRC-16 framing
pub const CRC_REQUEST: u8 = b'C';

/// Fill byte for payloads shorter than the block size
pub const PAD: u8 = b' ';

/// Bytes framing a payload: mark, sequence, inverse sequence, two CRC bytes
pub const FRAME_OVERHEAD: usize = 5;
