//! Serial port setup
//!
//! Parses the classic `SPEED,PARITY,BITS,STOP` mode notation (either `,`
//! or `:` separates the fields) and opens the port accordingly.

use std::str::FromStr;
use std::time::Duration;

use serialport::{DataBits, Parity, SerialPort, StopBits};
use thiserror::Error;

/// Baud rates the panel link supports
const SPEEDS: [u32; 8] = [115200, 57600, 38400, 19200, 9600, 4800, 2400, 1200];

/// Default per-read timeout; the panel link swaps this out as needed
const OPEN_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModeError {
    #[error("serial mode needs SPEED,PARITY,BITS,STOP")]
    Format,
    #[error("unrecognised serial speed")]
    Speed,
    #[error("unrecognised serial parity")]
    Parity,
    #[error("unrecognised serial bit size")]
    BitSize,
    #[error("unrecognised serial stop bits")]
    StopBits,
}

/// Serial line configuration in `9600,n,8,1` notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialMode {
    pub speed: u32,
    pub parity: Parity,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
}

impl FromStr for SerialMode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, ModeError> {
        let mut parts = s.split([',', ':']);

        let speed: u32 = parts
            .next()
            .ok_or(ModeError::Format)?
            .parse()
            .map_err(|_| ModeError::Speed)?;
        if !SPEEDS.contains(&speed) {
            return Err(ModeError::Speed);
        }

        let parity = match parts.next().ok_or(ModeError::Format)? {
            "n" => Parity::None,
            "e" => Parity::Even,
            "o" => Parity::Odd,
            _ => return Err(ModeError::Parity),
        };

        let data_bits = match parts.next().ok_or(ModeError::Format)? {
            "5" => DataBits::Five,
            "6" => DataBits::Six,
            "7" => DataBits::Seven,
            "8" => DataBits::Eight,
            _ => return Err(ModeError::BitSize),
        };

        let stop_bits = match parts.next().ok_or(ModeError::Format)? {
            "1" => StopBits::One,
            "2" => StopBits::Two,
            _ => return Err(ModeError::StopBits),
        };

        if parts.next().is_some() {
            return Err(ModeError::Format);
        }

        Ok(Self {
            speed,
            parity,
            data_bits,
            stop_bits,
        })
    }
}

/// Open the device with the given mode
pub fn open(device: &str, mode: &SerialMode) -> serialport::Result<Box<dyn SerialPort>> {
    serialport::new(device, mode.speed)
        .parity(mode.parity)
        .data_bits(mode.data_bits)
        .stop_bits(mode.stop_bits)
        .timeout(OPEN_TIMEOUT)
        .open()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_mode() {
        let mode: SerialMode = "9600,n,8,1".parse().unwrap();
        assert_eq!(mode.speed, 9600);
        assert_eq!(mode.parity, Parity::None);
        assert_eq!(mode.data_bits, DataBits::Eight);
        assert_eq!(mode.stop_bits, StopBits::One);
    }

    #[test]
    fn test_parse_colon_separators() {
        let mode: SerialMode = "115200:e:7:2".parse().unwrap();
        assert_eq!(mode.speed, 115200);
        assert_eq!(mode.parity, Parity::Even);
        assert_eq!(mode.data_bits, DataBits::Seven);
        assert_eq!(mode.stop_bits, StopBits::Two);
    }

    #[test]
    fn test_parse_rejects_bad_fields() {
        assert_eq!("300,n,8,1".parse::<SerialMode>(), Err(ModeError::Speed));
        assert_eq!("9600,x,8,1".parse::<SerialMode>(), Err(ModeError::Parity));
        assert_eq!("9600,n,9,1".parse::<SerialMode>(), Err(ModeError::BitSize));
        assert_eq!("9600,n,8,3".parse::<SerialMode>(), Err(ModeError::StopBits));
        assert_eq!("9600,n,8".parse::<SerialMode>(), Err(ModeError::Format));
        assert_eq!("9600,n,8,1,x".parse::<SerialMode>(), Err(ModeError::Format));
    }
}
