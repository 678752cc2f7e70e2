// src/scan.rs
//
// Port discovery: open each candidate port in turn and report the first bytes
// it produces within a listening window. Blocking; run it off the async
// workers.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::io::codec::encode_spaced_hex;
use crate::io::serial::{FrameSource, LineSettings};

/// How long each port is listened to
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(10);

/// Per-read timeout while scanning, so the window is honoured closely
const SCAN_POLL_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub port: String,
    /// Spaced hex of the first chunk received, if any
    pub first_bytes: Option<String>,
    /// Why the port could not be sampled
    pub error: Option<String>,
}

impl ScanResult {
    pub fn is_active(&self) -> bool {
        self.first_bytes.is_some()
    }
}

/// Probe every port, one after another. A port that cannot be opened is
/// reported and the scan moves on.
pub fn scan_ports<S: AsRef<str>>(ports: &[S], line: &LineSettings, window: Duration) -> Vec<ScanResult> {
    let mut results = Vec::with_capacity(ports.len());

    for port in ports.iter().map(|p| p.as_ref()) {
        info!("[scan] Listening on {} for {:?}", port, window);
        let mut source = FrameSource::new(SCAN_POLL_TIMEOUT.min(window.max(Duration::from_millis(1))));

        let result = match source.open(port, line) {
            Ok(()) => {
                let first = sample_source(&mut source, window);
                source.close();
                match &first {
                    Some(hex) => info!("[scan] {} is active: {}", port, hex),
                    None => info!("[scan] {} was silent", port),
                }
                ScanResult {
                    port: port.to_string(),
                    first_bytes: first,
                    error: None,
                }
            }
            Err(e) => {
                warn!("[scan] {}", e);
                ScanResult {
                    port: port.to_string(),
                    first_bytes: None,
                    error: Some(e.to_string()),
                }
            }
        };
        results.push(result);
    }

    results
}

/// Poll an open source until it yields bytes or `window` elapses.
/// Transient read errors are skipped; a disconnect ends the sampling.
pub fn sample_source(source: &mut FrameSource, window: Duration) -> Option<String> {
    let deadline = Instant::now() + window;

    while Instant::now() < deadline {
        match source.poll() {
            Ok(bytes) if !bytes.is_empty() => return Some(encode_spaced_hex(&bytes)),
            Ok(_) => {
                // In-memory or non-blocking ports return at once
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) if e.is_permanent() => {
                debug!("[scan] {}", e);
                return None;
            }
            Err(e) => debug!("[scan] {}", e),
        }
    }
    None
}
