// src/io/types.rs
//
// Shared types for the framing engine and the port adapters.

use std::fmt;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use super::codec::encode_spaced_hex;

// ============================================================================
// Frames
// ============================================================================

/// A group of bytes taken from (or destined for) the wire as one unit.
///
/// Frames cut from a live stream always hold exactly the configured frame
/// size; playback frames carry whatever payload the capture delimited.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Frame(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `AA BB CC` rendering used by the frame log
    pub fn to_hex(&self) -> String {
        encode_spaced_hex(&self.0)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Direction tag written next to each logged record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

impl Direction {
    pub fn tag(&self) -> &'static str {
        match self {
            Direction::Rx => "RX",
            Direction::Tx => "TX",
        }
    }
}

// ============================================================================
// Port handles
// ============================================================================

/// Anything that can stand in for an opened serial device.
/// `Box<dyn serialport::SerialPort>` satisfies this, as do in-memory test ports.
pub trait SerialIo: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> SerialIo for T {}

/// Open port shared between the read loop and transmit paths.
/// `None` once closed; taking the value out is what releases the device.
pub type SharedPort = Arc<Mutex<Option<Box<dyn SerialIo>>>>;

pub fn shared_port(io: Box<dyn SerialIo>) -> SharedPort {
    Arc::new(Mutex::new(Some(io)))
}

/// Close a shared port. Returns true if this call released the device.
pub fn close_shared_port(port: &SharedPort) -> bool {
    match port.lock() {
        Ok(mut guard) => guard.take().is_some(),
        // A poisoned lock still holds the handle; release it anyway
        Err(poisoned) => poisoned.into_inner().take().is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_hex_rendering() {
        let frame = Frame::new(vec![0xA1, 0x0B, 0xFF]);
        assert_eq!(frame.to_hex(), "A1 0B FF");
        assert_eq!(frame.to_string(), "A1 0B FF");
        assert_eq!(frame.len(), 3);
    }

    #[test]
    fn test_close_shared_port_is_idempotent() {
        let port = shared_port(Box::new(std::io::Cursor::new(Vec::<u8>::new())));
        assert!(close_shared_port(&port));
        assert!(!close_shared_port(&port));
        assert!(port.lock().unwrap().is_none());
    }
}
