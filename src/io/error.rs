// src/io/error.rs
//
// Error taxonomy for port I/O and session setup.
// Per-attempt errors (read/write) are recoverable; open and configuration
// errors are fatal to session startup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Open failed: missing device, already held, or unsupported settings
    #[error("{device}: port unavailable: {message}")]
    PortUnavailable { device: String, message: String },

    /// A poll failed after the port was opened
    #[error("{device}: read failed: {message}")]
    ReadFailed { device: String, message: String },

    /// The device went away (or was closed) underneath the reader
    #[error("{device}: disconnected")]
    Disconnected { device: String },

    /// A write to a port failed, or the port is closed
    #[error("{device}: write failed: {message}")]
    WriteFailed { device: String, message: String },

    /// Hex command text is not an even run of hex digits
    #[error("invalid hex: {0}")]
    InvalidHexFormat(String),

    /// Invalid setup, detected before any port is opened
    #[error("configuration error: {0}")]
    Configuration(String),

    /// File I/O (frame logs, settings, playback sources)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn port_unavailable(device: &str, message: impl Into<String>) -> Self {
        BridgeError::PortUnavailable {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn read(device: &str, message: impl Into<String>) -> Self {
        BridgeError::ReadFailed {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn write(device: &str, message: impl Into<String>) -> Self {
        BridgeError::WriteFailed {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn disconnected(device: &str) -> Self {
        BridgeError::Disconnected {
            device: device.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Configuration(message.into())
    }

    /// Whether the error should end the session rather than be logged and skipped.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            BridgeError::Disconnected { .. }
                | BridgeError::PortUnavailable { .. }
                | BridgeError::Configuration(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_device() {
        let err = BridgeError::port_unavailable("/dev/ttyUSB0", "No such file or directory");
        assert_eq!(
            err.to_string(),
            "/dev/ttyUSB0: port unavailable: No such file or directory"
        );
    }

    #[test]
    fn test_permanent_classification() {
        assert!(BridgeError::disconnected("COM3").is_permanent());
        assert!(BridgeError::config("frame size must be positive").is_permanent());
        assert!(!BridgeError::read("COM3", "framing error").is_permanent());
        assert!(!BridgeError::write("COM4", "timed out").is_permanent());
        assert!(!BridgeError::InvalidHexFormat("odd length".into()).is_permanent());
    }
}
