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

use std::marker::PhantomData;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;
use crate::packet::{self, Block, FramingError};
use crate::protocol::*;
use crate::serial::SerialLink;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug)]
pub enum SenderError {
    Io(std::io::Error),
    Framing(FramingError),
    ResponseTimeout,
    Cancelled,
    UnexpectedResponse(u8),
    TransferComplete,
}

impl std::fmt::Display for SenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SenderError::Io(e) => write!(f, "I/O error: {}", e),
            SenderError::Framing(e) => write!(f, "framing error: {}", e),
            SenderError::ResponseTimeout => write!(f, "timed out waiting for receiver response"),
            SenderError::Cancelled => write!(f, "transfer cancelled by receiver"),
            SenderError::UnexpectedResponse(byte) => {
                write!(f, "unexpected response byte 0x{:02X}", byte)
            }
            SenderError::TransferComplete => write!(f, "transfer complete"),
        }
    }
}

impl std::error::Error for SenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SenderError::Io(e) => Some(e),
            SenderError::Framing(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SenderError {
    fn from(err: std::io::Error) -> Self {
        SenderError::Io(err)
    }
}

impl From<FramingError> for SenderError {
    fn from(err: FramingError) -> Self {
        SenderError::Framing(err)
    }
}

// ============================================================================
// Final Status
// ============================================================================

/// Terminal outcome of a transfer session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalStatus {
    /// EOT acknowledged and the terminating header sent
    Complete,
    /// Receiver sent the cancel pair; nothing further was written
    Cancelled,
    /// Receiver answered a packet with neither ACK nor CA; the loop halted
    /// without retransmitting
    UnexpectedResponse(u8),
}

// ============================================================================
// States
// ============================================================================

pub struct SendHeader;
pub struct SendData;
pub struct SendEot;
pub struct SendClose;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<'a, State> {
    state: PhantomData<State>,
    serial: &'a mut dyn SerialLink,
    file: Option<File>,
    name: String,
    block: Block,
    seq: u8,
    timeout: Duration,
    debug: bool,
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState<'a>: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState<'a> + 'a>, SenderError>;
}

// ============================================================================
// Helpers shared by all states
// ============================================================================

impl<'a, S> SenderFsm<'a, S> {
    fn transition<T>(self) -> Box<SenderFsm<'a, T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            serial: self.serial,
            file: self.file,
            name: self.name,
            block: self.block,
            seq: self.seq,
            timeout: self.timeout,
            debug: self.debug,
        })
    }

    fn io_error(&self, e: std::io::Error) -> SenderError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        SenderError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    /// Reads and classifies one response byte. A sequence-0 ACK may carry a
    /// piggy-backed CRC-mode byte, which is consumed and discarded; a CA
    /// arrives in pairs, so its partner is consumed before cancelling.
    fn read_response(&mut self) -> Result<u8, SenderError> {
        let response = match self.serial.read_byte(self.timeout) {
            Ok(byte) => byte,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                return Err(SenderError::ResponseTimeout);
            }
            Err(e) => return Err(self.io_error(e)),
        };

        match response {
            ACK if self.seq == 0 => {
                match self.serial.read_byte(self.timeout) {
                    Ok(extra) => {
                        if self.debug { println!("Discarded: 0x{:02X}", extra); }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => return Err(self.io_error(e)),
                }
                Ok(ACK)
            }
            CA => {
                match self.serial.read_byte(self.timeout) {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => return Err(self.io_error(e)),
                }
                if self.debug { println!("Received: CA CA"); }
                Err(SenderError::Cancelled)
            }
            byte => Ok(byte),
        }
    }

    /// Frames and writes one packet, then waits for the response. The
    /// sequence counter advances only on ACK.
    fn send_packet(&mut self, payload: &[u8]) -> Result<u8, SenderError> {
        let packet = packet::build(self.block, self.seq, payload)?;
        self.serial.write_all(&packet).map_err(|e| self.io_error(e))?;
        if self.debug {
            println!("Sent: packet seq {} ({} bytes)", self.seq, packet.len());
        }

        let response = self.read_response()?;
        if response == ACK {
            self.seq = self.seq.wrapping_add(1);
        }
        Ok(response)
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> SenderState<'a> for SenderFsm<'a, SendHeader> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState<'a> + 'a>, SenderError> {
        let mut fsm = *self;

        let mut file = match fsm.file.take() {
            Some(file) => file,
            None => {
                return Err(SenderError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no image file",
                )));
            }
        };
        let size = file.seek(SeekFrom::End(0)).map_err(|e| fsm.io_error(e))?;
        file.seek(SeekFrom::Start(0)).map_err(|e| fsm.io_error(e))?;
        fsm.file = Some(file);

        if fsm.debug { println!("Image size: {} bytes", size); }

        fsm.block = Block::Small;
        fsm.seq = 0;
        let payload = packet::header_payload(&fsm.name, size);
        let response = fsm.send_packet(&payload)?;

        if response == ACK {
            fsm.block = Block::Large;
            let next = fsm.transition::<SendData>();
            Ok(next as Box<dyn SenderState<'a> + 'a>)
        } else {
            Err(SenderError::UnexpectedResponse(response))
        }
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, SendData> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState<'a> + 'a>, SenderError> {
        let mut fsm = *self;

        let mut file = match fsm.file.take() {
            Some(file) => file,
            None => {
                return Err(SenderError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "image file missing",
                )));
            }
        };

        let mut buffer = [0u8; 1024];
        let mut filled = 0;
        while filled < buffer.len() {
            match file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(fsm.io_error(e)),
            }
        }

        if filled == 0 {
            // Image exhausted; the handle is no longer needed
            drop(file);
            let next = fsm.transition::<SendEot>();
            return Ok(next as Box<dyn SenderState<'a> + 'a>);
        }
        fsm.file = Some(file);

        let response = fsm.send_packet(&buffer[..filled])?;

        if response == ACK {
            Ok(Box::new(fsm) as Box<dyn SenderState<'a> + 'a>)
        } else {
            Err(SenderError::UnexpectedResponse(response))
        }
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, SendEot> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState<'a> + 'a>, SenderError> {
        let mut fsm = *self;

        fsm.serial.write_all(&[EOT]).map_err(|e| fsm.io_error(e))?;
        if fsm.debug { println!("Sent: EOT"); }

        let response = fsm.read_response()?;
        if response == ACK {
            let next = fsm.transition::<SendClose>();
            Ok(next as Box<dyn SenderState<'a> + 'a>)
        } else {
            Err(SenderError::UnexpectedResponse(response))
        }
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, SendClose> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState<'a> + 'a>, SenderError> {
        let mut fsm = *self;

        fsm.block = Block::Small;
        fsm.seq = 0;

        // Terminating batch header; the receiver's answer does not gate
        // completion
        let payload = packet::header_payload("", 0);
        match fsm.send_packet(&payload) {
            Ok(_) | Err(SenderError::Cancelled) => Err(SenderError::TransferComplete),
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl<'a> SenderFsm<'a, SendHeader> {
    pub fn new(
        serial: &'a mut dyn SerialLink,
        file: File,
        name: String,
        timeout: Duration,
        debug: bool,
    ) -> Box<dyn SenderState<'a> + 'a> {
        Box::new(SenderFsm {
            state: PhantomData::<SendHeader>,
            serial,
            file: Some(file),
            name,
            block: Block::Small,
            seq: 0,
            timeout,
            debug,
        })
    }
}

/// Steps the session to completion, mapping the terminal sentinel variants
/// to the reported outcome.
pub fn run<'a>(mut state: Box<dyn SenderState<'a> + 'a>) -> Result<FinalStatus, SenderError> {
    loop {
        match state.step() {
            Ok(next) => state = next,
            Err(SenderError::TransferComplete) => return Ok(FinalStatus::Complete),
            Err(SenderError::Cancelled) => return Ok(FinalStatus::Cancelled),
            Err(SenderError::UnexpectedResponse(byte)) => {
                return Ok(FinalStatus::UnexpectedResponse(byte));
            }
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::crc16;
    use crate::serial::MockSerialLink;

    fn framed(mark: u8, seq: u8, payload: &[u8], block_len: usize) -> Vec<u8> {
        let mut body = payload.to_vec();
        body.resize(block_len, PAD);

        let mut packet = vec![mark, seq, 0xFF - seq];
        packet.extend_from_slice(&body);

        let crc = crc16(&body, 0);
        packet.push((crc >> 8) as u8);
        packet.push((crc & 0xFF) as u8);
        packet
    }

    fn header_bytes(name: &str, size: u64) -> Vec<u8> {
        let mut payload = name.as_bytes().to_vec();
        payload.push(0);
        payload.extend_from_slice(size.to_string().as_bytes());
        payload.push(b' ');
        payload
    }

    fn write_image(name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn start<'a>(mock: &'a mut MockSerialLink, path: &std::path::Path) -> Box<dyn SenderState<'a> + 'a> {
        let file = File::open(path).unwrap();
        SenderFsm::new(mock, file, "firmware".to_string(), Duration::from_millis(10), true)
    }

    #[test]
    fn test_full_transfer() {
        let mut content = Vec::new();
        for i in 0..2050 {
            content.push((i % 256) as u8);
        }
        let path = write_image("fwlink_full.bin", &content);

        let responses = vec![
            Some(ACK), Some(CRC_REQUEST), // header ACK with piggy-backed mode byte
            Some(ACK),                    // data seq 1
            Some(ACK),                    // data seq 2
            Some(ACK),                    // data seq 3
            Some(ACK),                    // EOT
            Some(ACK), None,              // closing header ACK, nothing piggy-backed
        ];

        let mut expected_writes = Vec::new();
        expected_writes.extend_from_slice(&framed(SOH, 0, &header_bytes("firmware", 2050), 128));
        expected_writes.extend_from_slice(&framed(STX, 1, &content[..1024], 1024));
        expected_writes.extend_from_slice(&framed(STX, 2, &content[1024..2048], 1024));
        expected_writes.extend_from_slice(&framed(STX, 3, &content[2048..], 1024));
        expected_writes.push(EOT);
        expected_writes.extend_from_slice(&framed(SOH, 0, &header_bytes("", 0), 128));

        let mut mock = MockSerialLink::new(responses, expected_writes);
        let fsm = start(&mut mock, &path);

        assert_eq!(run(fsm).unwrap(), FinalStatus::Complete);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_empty_image() {
        let path = write_image("fwlink_empty.bin", b"");

        let responses = vec![
            Some(ACK), None, // header ACK, no piggy-backed byte
            Some(ACK),       // EOT
            Some(ACK), None, // closing header
        ];

        let mut expected_writes = Vec::new();
        expected_writes.extend_from_slice(&framed(SOH, 0, &header_bytes("firmware", 0), 128));
        expected_writes.push(EOT);
        expected_writes.extend_from_slice(&framed(SOH, 0, &header_bytes("", 0), 128));

        let mut mock = MockSerialLink::new(responses, expected_writes);
        let fsm = start(&mut mock, &path);

        assert_eq!(run(fsm).unwrap(), FinalStatus::Complete);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_cancelled_mid_transfer() {
        let content = vec![0x5Au8; 2500];
        let path = write_image("fwlink_cancel.bin", &content);

        let responses = vec![
            Some(ACK), None,     // header
            Some(ACK),           // data seq 1
            Some(CA), Some(CA),  // data seq 2 answered with the cancel pair
        ];

        // The second data packet goes out before the cancel arrives; nothing
        // after it, in particular no EOT
        let mut expected_writes = Vec::new();
        expected_writes.extend_from_slice(&framed(SOH, 0, &header_bytes("firmware", 2500), 128));
        expected_writes.extend_from_slice(&framed(STX, 1, &content[..1024], 1024));
        expected_writes.extend_from_slice(&framed(STX, 2, &content[1024..2048], 1024));

        let mut mock = MockSerialLink::new(responses, expected_writes);
        let fsm = start(&mut mock, &path);

        assert_eq!(run(fsm).unwrap(), FinalStatus::Cancelled);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_nak_halts_without_retransmission() {
        let content = vec![0x11u8; 100];
        let path = write_image("fwlink_nak.bin", &content);

        let responses = vec![
            Some(ACK), None, // header
            Some(NAK),       // data seq 1 rejected
        ];

        let mut expected_writes = Vec::new();
        expected_writes.extend_from_slice(&framed(SOH, 0, &header_bytes("firmware", 100), 128));
        expected_writes.extend_from_slice(&framed(STX, 1, &content, 1024));

        let mut mock = MockSerialLink::new(responses, expected_writes);
        let fsm = start(&mut mock, &path);

        assert_eq!(run(fsm).unwrap(), FinalStatus::UnexpectedResponse(NAK));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_header_rejected() {
        let path = write_image("fwlink_header_nak.bin", b"abc");

        let responses = vec![Some(NAK)];

        let expected_writes = framed(SOH, 0, &header_bytes("firmware", 3), 128);

        let mut mock = MockSerialLink::new(responses, expected_writes);
        let fsm = start(&mut mock, &path);

        assert_eq!(run(fsm).unwrap(), FinalStatus::UnexpectedResponse(NAK));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_closing_header_response_ignored() {
        let content = vec![0xEEu8; 10];
        let path = write_image("fwlink_close.bin", &content);

        let responses = vec![
            Some(ACK), None, // header
            Some(ACK),       // data seq 1
            Some(ACK),       // EOT
            Some(NAK),       // closing header rejected - still complete
        ];

        let mut expected_writes = Vec::new();
        expected_writes.extend_from_slice(&framed(SOH, 0, &header_bytes("firmware", 10), 128));
        expected_writes.extend_from_slice(&framed(STX, 1, &content, 1024));
        expected_writes.push(EOT);
        expected_writes.extend_from_slice(&framed(SOH, 0, &header_bytes("", 0), 128));

        let mut mock = MockSerialLink::new(responses, expected_writes);
        let fsm = start(&mut mock, &path);

        assert_eq!(run(fsm).unwrap(), FinalStatus::Complete);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_response_timeout() {
        let content = vec![0x42u8; 10];
        let path = write_image("fwlink_timeout.bin", &content);

        let responses = vec![
            Some(ACK), None, // header
            None,            // data seq 1 never answered
        ];

        let mut expected_writes = Vec::new();
        expected_writes.extend_from_slice(&framed(SOH, 0, &header_bytes("firmware", 10), 128));
        expected_writes.extend_from_slice(&framed(STX, 1, &content, 1024));

        let mut mock = MockSerialLink::new(responses, expected_writes);
        let fsm = start(&mut mock, &path);

        match run(fsm) {
            Err(SenderError::ResponseTimeout) => {}
            other => panic!("expected ResponseTimeout, got {:?}", other),
        }

        std::fs::remove_file(&path).ok();
    }
}
