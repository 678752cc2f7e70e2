// src/io/serial/utils.rs
//
// Shared utilities for the serial source and sink.
// Line settings, conversions for the serialport crate, port opening and
// port enumeration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity as SpParity, StopBits};

use crate::io::error::{BridgeError, Result};
use crate::io::types::SerialIo;

// ============================================================================
// Types
// ============================================================================

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Character framing for a port (8N1 by default)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl Default for LineSettings {
    fn default() -> Self {
        LineSettings {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

impl LineSettings {
    pub fn with_baud(baud_rate: u32) -> Self {
        LineSettings {
            baud_rate,
            ..Default::default()
        }
    }

    /// Short form such as `9600 8N1`
    pub fn describe(&self) -> String {
        format!(
            "{} {}{}{}",
            self.baud_rate,
            self.data_bits,
            match self.parity {
                Parity::None => 'N',
                Parity::Odd => 'O',
                Parity::Even => 'E',
            },
            self.stop_bits
        )
    }
}

/// Information about an available serial port
#[derive(Clone, Debug, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

// ============================================================================
// Conversion Functions
// ============================================================================

/// Convert our Parity enum to serialport crate's Parity type
pub fn to_serialport_parity(p: &Parity) -> SpParity {
    match p {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

/// Convert data bits count to serialport crate's DataBits type
pub fn to_serialport_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

/// Convert stop bits count to serialport crate's StopBits type
pub fn to_serialport_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

// ============================================================================
// Opening and Enumeration
// ============================================================================

/// Open a serial device with the given line settings and per-read timeout.
pub fn open_serial(
    device: &str,
    line: &LineSettings,
    read_timeout: Duration,
) -> Result<Box<dyn SerialIo>> {
    if line.baud_rate == 0 {
        return Err(BridgeError::port_unavailable(device, "baud rate must be non-zero"));
    }
    let port = serialport::new(device, line.baud_rate)
        .data_bits(to_serialport_data_bits(line.data_bits))
        .stop_bits(to_serialport_stop_bits(line.stop_bits))
        .parity(to_serialport_parity(&line.parity))
        .timeout(read_timeout)
        .open()
        .map_err(|e| BridgeError::port_unavailable(device, e.to_string()))?;
    Ok(Box::new(port))
}

/// List available serial ports.
///
/// On macOS, filters out /dev/tty.* devices and only shows /dev/cu.* devices.
/// The tty devices block on open waiting for carrier detect.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports()
        .map_err(|e| BridgeError::port_unavailable("*", format!("failed to enumerate ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    "USB".to_string(),
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::BluetoothPort => {
                    ("Bluetooth".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::PciPort => ("PCI".to_string(), None, None, None, None, None),
                serialport::SerialPortType::Unknown => {
                    ("Unknown".to_string(), None, None, None, None, None)
                }
            };
            SerialPortInfo {
                port_name: p.port_name,
                port_type,
                manufacturer,
                product,
                serial_number,
                vid,
                pid,
            }
        })
        .collect())
}

/// Number embedded in a port name (`COM10` -> 10, `/dev/ttyUSB0` -> 0)
fn port_number(name: &str) -> Option<u64> {
    let digits: String = name.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Pick the lowest-numbered port; names without a number sort last.
pub fn lowest_numbered_port<S: AsRef<str>>(ports: &[S]) -> Option<String> {
    ports
        .iter()
        .map(|p| p.as_ref())
        .min_by_key(|name| (port_number(name).unwrap_or(u64::MAX), name.to_string()))
        .map(|name| name.to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parity_default() {
        assert_eq!(Parity::default(), Parity::None);
        assert_eq!(LineSettings::default().parity, Parity::None);
    }

    #[test]
    fn test_to_serialport_parity() {
        assert!(matches!(to_serialport_parity(&Parity::None), SpParity::None));
        assert!(matches!(to_serialport_parity(&Parity::Odd), SpParity::Odd));
        assert!(matches!(to_serialport_parity(&Parity::Even), SpParity::Even));
    }

    #[test]
    fn test_to_serialport_data_bits() {
        assert!(matches!(to_serialport_data_bits(7), DataBits::Seven));
        assert!(matches!(to_serialport_data_bits(8), DataBits::Eight));
        assert!(matches!(to_serialport_data_bits(9), DataBits::Eight)); // default
    }

    #[test]
    fn test_to_serialport_stop_bits() {
        assert!(matches!(to_serialport_stop_bits(2), StopBits::Two));
        assert!(matches!(to_serialport_stop_bits(0), StopBits::One)); // default
    }

    #[test]
    fn test_line_settings_describe() {
        assert_eq!(LineSettings::default().describe(), "9600 8N1");
        let line = LineSettings {
            baud_rate: 115200,
            data_bits: 7,
            stop_bits: 2,
            parity: Parity::Even,
        };
        assert_eq!(line.describe(), "115200 7E2");
    }

    #[test]
    fn test_lowest_numbered_port() {
        assert_eq!(
            lowest_numbered_port(&["COM10", "COM3", "COM4"]),
            Some("COM3".to_string())
        );
        assert_eq!(
            lowest_numbered_port(&["/dev/ttyUSB1", "/dev/ttyUSB0"]),
            Some("/dev/ttyUSB0".to_string())
        );
        assert_eq!(
            lowest_numbered_port(&["/dev/serial", "/dev/ttyS2"]),
            Some("/dev/ttyS2".to_string())
        );
        assert_eq!(lowest_numbered_port::<&str>(&[]), None);
    }

    #[test]
    fn test_open_missing_device_is_unavailable() {
        let result = open_serial(
            "/dev/portbridge-does-not-exist",
            &LineSettings::default(),
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(BridgeError::PortUnavailable { .. })));
    }
}
