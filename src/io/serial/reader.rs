// src/io/serial/reader.rs
//
// Pull-based byte source over a serial port.
// Each poll reads whatever the device has buffered, waiting at most the
// configured read timeout. The device is opened with a short OS timeout and a
// poll is a series of short reads; the shared port lock is held only for one
// short read at a time, so the transmit path never waits out a whole poll.

use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::utils::{open_serial, LineSettings};
use crate::io::error::{BridgeError, Result};
use crate::io::types::{close_shared_port, shared_port, SerialIo, SharedPort};
use super::writer::FrameSink;

/// Default per-poll read timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// OS-level timeout of one short read, and so the longest a writer waits for the lock
pub(crate) const POLL_SLICE: Duration = Duration::from_millis(10);

/// Pause between short reads when the device returns at once with nothing
const SLICE_PAUSE: Duration = Duration::from_millis(1);

/// Largest single read; anything beyond stays in the OS buffer for the next poll
const READ_CHUNK: usize = 256;

// ============================================================================
// FrameSource
// ============================================================================

pub struct FrameSource {
    device: String,
    read_timeout: Duration,
    port: Option<SharedPort>,
    buf: [u8; READ_CHUNK],
}

impl FrameSource {
    /// Unopened source; `poll` fails until `open` succeeds
    pub fn new(read_timeout: Duration) -> Self {
        FrameSource {
            device: String::new(),
            read_timeout,
            port: None,
            buf: [0u8; READ_CHUNK],
        }
    }

    /// Wrap an already-open device (an in-memory port in tests)
    pub fn from_io(device: &str, io: Box<dyn SerialIo>, read_timeout: Duration) -> Self {
        FrameSource {
            device: device.to_string(),
            read_timeout,
            port: Some(shared_port(io)),
            buf: [0u8; READ_CHUNK],
        }
    }

    /// Open the device exclusively. A source that is already open is closed first.
    pub fn open(&mut self, device: &str, line: &LineSettings) -> Result<()> {
        self.close();
        let io = open_serial(device, line, self.read_timeout.min(POLL_SLICE))?;
        self.device = device.to_string();
        self.port = Some(shared_port(io));
        info!(
            "[serial:{}] Opened at {} (read timeout {:?})",
            device,
            line.describe(),
            self.read_timeout
        );
        Ok(())
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_open(&self) -> bool {
        match &self.port {
            Some(port) => port.lock().map(|guard| guard.is_some()).unwrap_or(false),
            None => false,
        }
    }

    /// Sink writing to this same device, serialised with the reads
    pub fn sink(&self) -> Option<FrameSink> {
        self.port
            .as_ref()
            .map(|port| FrameSink::from_shared(&self.device, port.clone()))
    }

    /// Read the bytes currently available.
    ///
    /// Short reads repeat until one yields data or the read timeout elapses;
    /// an empty result means nothing arrived in time. A zero-byte read ends
    /// the poll at once. A closed or vanished device is reported as
    /// `Disconnected`; any other I/O error is a transient `ReadFailed`.
    pub fn poll(&mut self) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.read_timeout;

        loop {
            let port = match &self.port {
                Some(port) => port,
                None => return Err(BridgeError::disconnected(&self.device)),
            };

            // Lock only for this one short read
            let read_result = {
                let mut guard = port
                    .lock()
                    .map_err(|e| BridgeError::read(&self.device, format!("port mutex poisoned: {}", e)))?;
                match guard.as_mut() {
                    Some(io) => io.read(&mut self.buf),
                    None => return Err(BridgeError::disconnected(&self.device)),
                }
            };

            match read_result {
                Ok(n) => return Ok(self.buf[..n].to_vec()),
                // Timeout is expected for serial reads
                Err(ref e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(ref e)
                    if matches!(
                        e.kind(),
                        ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::NotFound
                    ) =>
                {
                    return Err(BridgeError::disconnected(&self.device))
                }
                Err(e) => return Err(BridgeError::read(&self.device, e.to_string())),
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            std::thread::sleep(SLICE_PAUSE);
        }
    }

    /// Release the device. Safe on a closed or never-opened source.
    pub fn close(&mut self) -> bool {
        let released = self.port.as_ref().map(close_shared_port).unwrap_or(false);
        if released {
            debug!("[serial:{}] Source closed", self.device);
        }
        released
    }
}
