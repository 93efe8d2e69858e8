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

//! Bootloader menu dialogue on either side of the YMODEM transfer
//!
//! The bootloader prints a menu framed by a banner line, takes single-digit
//! selections, and requests CRC-16 mode with a 'C' once it is ready to
//! receive the image.

use std::io::{Error, ErrorKind};
use std::time::Duration;
use crate::protocol::CRC_REQUEST;
use crate::serial::SerialLink;

/// Banner line the bootloader prints around its menu
const BANNER: &str = "==========================================================";

/// Menu selection that puts the bootloader into receive mode
const MENU_UPDATE: &[u8] = b"1";

/// Menu selection that boots the freshly written image
const MENU_RUN: &[u8] = b"3";

/// Pause between repeated menu selections
const SELECT_PAUSE: Duration = Duration::from_millis(100);

/// Attempts before a menu selection is considered unanswered
const SELECT_ATTEMPTS: u32 = 50;

/// Drives the bootloader's menu dialogue over the serial link
pub struct DeviceDialog<'a> {
    serial: &'a mut dyn SerialLink,
    timeout: Duration,
    debug: bool,
}

impl<'a> DeviceDialog<'a> {
    pub fn new(serial: &'a mut dyn SerialLink, timeout: Duration, debug: bool) -> Self {
        DeviceDialog { serial, timeout, debug }
    }

    /// Reads lines until the menu banner arrives.
    pub fn wait_for_banner(&mut self) -> std::io::Result<()> {
        loop {
            let line = self.read_line()?;
            if self.debug { println!("Banner wait: {:?}", line); }
            if line == BANNER {
                return Ok(());
            }
        }
    }

    /// Selects the update menu entry until the device reports `Waiting`.
    pub fn select_update(&mut self) -> std::io::Result<()> {
        self.select(MENU_UPDATE, "Waiting")
    }

    /// Selects the run menu entry until the device reports `Start`.
    pub fn select_run(&mut self) -> std::io::Result<()> {
        self.select(MENU_RUN, "Start")
    }

    /// Discards bytes until the receiver requests CRC-16 mode with 'C'.
    pub fn wait_crc_request(&mut self) -> std::io::Result<()> {
        loop {
            let byte = self.serial.read_byte(self.timeout)?;
            if byte == CRC_REQUEST {
                if self.debug { println!("Received: 'C'"); }
                return Ok(());
            }
        }
    }

    fn select(&mut self, digit: &[u8], marker: &str) -> std::io::Result<()> {
        for _ in 0..SELECT_ATTEMPTS {
            self.serial.write_all(digit)?;
            std::thread::sleep(SELECT_PAUSE);

            match self.read_line() {
                Ok(line) => {
                    if self.debug { println!("Menu response: {:?}", line); }
                    if line.contains(marker) {
                        return Ok(());
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(e) => return Err(e),
            }
        }

        Err(Error::new(
            ErrorKind::TimedOut,
            format!("no {} response from device", marker),
        ))
    }

    /// Reads up to a newline, stripping CR. A timeout mid-line yields the
    /// partial line; a timeout before any byte propagates.
    fn read_line(&mut self) -> std::io::Result<String> {
        let mut line = Vec::new();
        loop {
            match self.serial.read_byte(self.timeout) {
                Ok(b'\n') => break,
                Ok(b'\r') => {}
                Ok(byte) => line.push(byte),
                Err(e) if e.kind() == ErrorKind::TimedOut && !line.is_empty() => break,
                Err(e) => return Err(e),
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockSerialLink;

    fn push_line(responses: &mut Vec<Option<u8>>, line: &str) {
        for b in line.bytes() {
            responses.push(Some(b));
        }
        responses.push(Some(b'\r'));
        responses.push(Some(b'\n'));
    }

    #[test]
    fn test_wait_for_banner_skips_noise() {
        let mut responses = Vec::new();
        push_line(&mut responses, "Bootloader v2.1");
        push_line(&mut responses, "1. update firmware");
        push_line(&mut responses, BANNER);

        let mut mock = MockSerialLink::new(responses, Vec::new());
        let mut dialog = DeviceDialog::new(&mut mock, Duration::from_millis(10), false);
        dialog.wait_for_banner().unwrap();
    }

    #[test]
    fn test_select_update_retries_until_waiting() {
        let mut responses = vec![None]; // first selection unanswered
        push_line(&mut responses, "Waiting for file");

        let mut mock = MockSerialLink::new(responses, b"11".to_vec());
        let mut dialog = DeviceDialog::new(&mut mock, Duration::from_millis(10), false);
        dialog.select_update().unwrap();
    }

    #[test]
    fn test_wait_crc_request_discards_other_bytes() {
        let responses = vec![Some(b'.'), Some(b'.'), Some(CRC_REQUEST)];

        let mut mock = MockSerialLink::new(responses, Vec::new());
        let mut dialog = DeviceDialog::new(&mut mock, Duration::from_millis(10), false);
        dialog.wait_crc_request().unwrap();
    }

    #[test]
    fn test_select_run_on_start() {
        let mut responses = Vec::new();
        push_line(&mut responses, "Start application");

        let mut mock = MockSerialLink::new(responses, b"3".to_vec());
        let mut dialog = DeviceDialog::new(&mut mock, Duration::from_millis(10), false);
        dialog.select_run().unwrap();
    }
}
