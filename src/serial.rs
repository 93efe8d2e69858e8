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

use std::time::Duration;
use serialport::{SerialPort as SerialPortTrait, DataBits, Parity, StopBits};

// ============================================================================
// SerialLink Trait
// ============================================================================

/// Byte-channel operations needed by the YMODEM engine and the device
/// dialogue. Reads are byte-at-a-time because every protocol response is a
/// single byte.
pub trait SerialLink: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Reads one byte, waiting at most `timeout`. An expired wait surfaces
    /// as `ErrorKind::TimedOut`.
    fn read_byte(&mut self, timeout: Duration) -> std::io::Result<u8>;
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Serial link over a real port via the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(RealSerialPort { port })
    }
}

impl SerialLink for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_byte(&mut self, timeout: Duration) -> std::io::Result<u8> {
        self.port.set_timeout(timeout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let mut buf = [0u8; 1];
        self.port.read_exact(&mut buf)?;
        Ok(buf[0])
    }
}

// ============================================================================
// Mock Serial Link for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialLink {
    // Bytes to return on reads (None = timeout)
    responses: Vec<Option<u8>>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialLink {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialLink {
            responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
        }
    }
}

#[cfg(test)]
impl SerialLink for MockSerialLink {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_byte(&mut self, _timeout: Duration) -> std::io::Result<u8> {
        // Out of responses = timeout
        if self.read_pos >= self.responses.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "mock timeout",
            ));
        }

        let response = self.responses[self.read_pos];
        self.read_pos += 1;

        match response {
            Some(byte) => Ok(byte),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "mock timeout",
            )),
        }
    }
}

#[cfg(test)]
impl Drop for MockSerialLink {
    fn drop(&mut self) {
        assert_eq!(
            self.read_pos,
            self.responses.len(),
            "MockSerialLink dropped with {} unconsumed responses",
            self.responses.len() - self.read_pos
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialLink write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}
