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

// YMODEM firmware update over a serial link
mod crc;
mod device;
mod packet;
mod protocol;
mod sender;
mod serial;

use clap::Parser;
use serialport::{DataBits, Parity, StopBits};
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use device::DeviceDialog;
use sender::{FinalStatus, SenderFsm};
use serial::{RealSerialPort, SerialLink};

#[derive(Parser)]
#[command(name = "fwlink")]
#[command(about = "YMODEM firmware update over a serial link", long_about = None)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name = "BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name = "BITS")]
    stop_bits: u8,

    /// Seconds to wait for each receiver response
    #[arg(long, default_value = "5", value_name = "SECS")]
    timeout: u64,

    /// Logical file name placed in the transfer header
    #[arg(long, default_value = "firmware")]
    name: String,

    /// Skip the bootloader menu dialogue (receiver already in CRC mode)
    #[arg(long)]
    no_dialog: bool,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    /// Firmware image to send
    image: PathBuf,
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn main() {
    let cli = Cli::parse();

    let data_bits = match parse_data_bits(cli.data_bits) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let parity = match parse_parity(&cli.parity) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let stop_bits = match parse_stop_bits(cli.stop_bits) {
        Ok(sb) => sb,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let image = match File::open(&cli.image) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open image {}: {}", cli.image.display(), e);
            std::process::exit(1);
        }
    };

    println!("Opening serial port: {}", cli.port);
    println!("Settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);

    let mut serial = match RealSerialPort::open(&cli.port, cli.baud, data_bits, parity, stop_bits) {
        Ok(port) => port,
        Err(e) => {
            eprintln!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    };

    let timeout = Duration::from_secs(cli.timeout);

    if !cli.no_dialog {
        println!("Waiting for bootloader menu...");
        if let Err(e) = bring_up(&mut serial, timeout, cli.debug) {
            eprintln!("Bring-up failed: {}", e);
            std::process::exit(1);
        }
    }

    println!("\nSending image: {}", cli.image.display());
    let fsm = SenderFsm::new(&mut serial, image, cli.name.clone(), timeout, cli.debug);

    match sender::run(fsm) {
        Ok(FinalStatus::Complete) => println!("\nImage sent successfully"),
        Ok(FinalStatus::Cancelled) => {
            eprintln!("Transfer cancelled by receiver");
            std::process::exit(1);
        }
        Ok(FinalStatus::UnexpectedResponse(byte)) => {
            eprintln!("Receiver answered 0x{:02X}, transfer halted", byte);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Transfer failed: {}", e);
            std::process::exit(1);
        }
    }

    if !cli.no_dialog {
        if let Err(e) = restart(&mut serial, timeout, cli.debug) {
            eprintln!("Restart dialogue failed: {}", e);
            std::process::exit(1);
        }
    }

    println!("Firmware update done");
}

fn bring_up(serial: &mut dyn SerialLink, timeout: Duration, debug: bool) -> std::io::Result<()> {
    let mut dialog = DeviceDialog::new(serial, timeout, debug);
    dialog.wait_for_banner()?;
    dialog.select_update()?;
    dialog.wait_crc_request()?;
    Ok(())
}

fn restart(serial: &mut dyn SerialLink, timeout: Duration, debug: bool) -> std::io::Result<()> {
    let mut dialog = DeviceDialog::new(serial, timeout, debug);
    dialog.wait_for_banner()?;
    dialog.select_run()?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_bits() {
        assert_eq!(parse_data_bits(8), Ok(DataBits::Eight));
        assert_eq!(parse_data_bits(5), Ok(DataBits::Five));
        assert!(parse_data_bits(9).is_err());
    }

    #[test]
    fn test_parse_parity() {
        assert_eq!(parse_parity("none"), Ok(Parity::None));
        assert_eq!(parse_parity("Odd"), Ok(Parity::Odd));
        assert!(parse_parity("mark").is_err());
    }

    #[test]
    fn test_parse_stop_bits() {
        assert_eq!(parse_stop_bits(1), Ok(StopBits::One));
        assert_eq!(parse_stop_bits(2), Ok(StopBits::Two));
        assert!(parse_stop_bits(3).is_err());
    }
}
