// src/io/serial/writer.rs
//
// Transmit side of a serial port.
// A sink is a cheap, cloneable handle; every clone writes through the same
// lock, so a forwarded frame and a manual command never interleave on the wire.

use std::io::Write;
use std::time::Duration;

use tracing::debug;

use super::utils::{open_serial, LineSettings};
use crate::io::codec::decode_hex_command;
use crate::io::error::{BridgeError, Result};
use crate::io::types::{close_shared_port, shared_port, SerialIo, SharedPort};

/// Write timeout for sink-only ports
const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct FrameSink {
    device: String,
    port: SharedPort,
}

impl FrameSink {
    /// Open a port used only for transmission
    pub fn open(device: &str, line: &LineSettings) -> Result<Self> {
        let io = open_serial(device, line, WRITE_TIMEOUT)?;
        debug!("[serial:{}] Opened for transmit at {}", device, line.describe());
        Ok(Self::from_io(device, io))
    }

    /// Wrap an already-open device
    pub fn from_io(device: &str, io: Box<dyn SerialIo>) -> Self {
        FrameSink {
            device: device.to_string(),
            port: shared_port(io),
        }
    }

    /// Share a port that a `FrameSource` is also reading
    pub(crate) fn from_shared(device: &str, port: SharedPort) -> Self {
        FrameSink {
            device: device.to_string(),
            port,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_open(&self) -> bool {
        self.port.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Write bytes verbatim. No retry; the caller decides what a failure means.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self
            .port
            .lock()
            .map_err(|e| BridgeError::write(&self.device, format!("port mutex poisoned: {}", e)))?;
        let io = guard
            .as_mut()
            .ok_or_else(|| BridgeError::write(&self.device, "port is closed"))?;
        io.write_all(bytes)
            .and_then(|_| io.flush())
            .map_err(|e| BridgeError::write(&self.device, e.to_string()))
    }

    /// Decode a hex command and send it. Malformed text never reaches the port.
    pub fn send_hex_string(&self, text: &str) -> Result<Vec<u8>> {
        let bytes = decode_hex_command(text)?;
        self.send(&bytes)?;
        Ok(bytes)
    }

    /// Release the device. Idempotent, and closes it for every clone.
    pub fn close(&self) -> bool {
        let released = close_shared_port(&self.port);
        if released {
            debug!("[serial:{}] Sink closed", self.device);
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Read};
    use std::sync::{Arc, Mutex};

    /// Records every write; with `fail_all` set, every write errors
    #[derive(Clone, Default)]
    struct RecordingPort {
        written: Arc<Mutex<Vec<u8>>>,
        fail_all: bool,
    }

    impl Read for RecordingPort {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for RecordingPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_all {
                return Err(io::Error::new(io::ErrorKind::Other, "hardware fault"));
            }
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_send_writes_verbatim() {
        let port = RecordingPort::default();
        let sink = FrameSink::from_io("mem", Box::new(port.clone()));
        sink.send(&[0xA9, 0x9A, 0x01]).unwrap();
        assert_eq!(*port.written.lock().unwrap(), vec![0xA9, 0x9A, 0x01]);
    }

    #[test]
    fn test_send_hex_string() {
        let port = RecordingPort::default();
        let sink = FrameSink::from_io("mem", Box::new(port.clone()));
        assert_eq!(sink.send_hex_string("1a2b3c").unwrap(), vec![0x1A, 0x2B, 0x3C]);
        assert_eq!(*port.written.lock().unwrap(), vec![0x1A, 0x2B, 0x3C]);
    }

    #[test]
    fn test_invalid_hex_writes_nothing() {
        let port = RecordingPort::default();
        let sink = FrameSink::from_io("mem", Box::new(port.clone()));
        let err = sink.send_hex_string("1a2b3").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidHexFormat(_)));
        assert!(port.written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_hardware_error_is_write_failed() {
        let port = RecordingPort {
            fail_all: true,
            ..Default::default()
        };
        let sink = FrameSink::from_io("mem", Box::new(port));
        assert!(matches!(sink.send(&[1]), Err(BridgeError::WriteFailed { .. })));
    }

    #[test]
    fn test_send_after_close_fails() {
        let sink = FrameSink::from_io("mem", Box::new(RecordingPort::default()));
        let clone = sink.clone();
        assert!(sink.close());
        assert!(!sink.close());
        assert!(!clone.is_open());
        assert!(matches!(clone.send(&[1]), Err(BridgeError::WriteFailed { .. })));
    }
}
