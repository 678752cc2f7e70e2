// src/logging.rs
//
// Diagnostics go through `tracing`; received frames (RX) and manual sends (TX)
// go to a FrameLog, an append-only text file owned by whoever created it and
// handed to the bridge.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::io::error::{BridgeError, Result};
use crate::io::types::{Direction, Frame};

/// Timestamp layout at the start of every frame-log line
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Name of the symlink that tracks the newest frame log (Unix only)
const LATEST_LINK: &str = "frames.log";

/// Install the process-wide tracing subscriber. Call once from `main`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Render one frame-log record (no trailing newline)
pub fn format_record(timestamp: &chrono::DateTime<chrono::Local>, direction: Direction, frame: &Frame) -> String {
    format!(
        "{} - {} - {}",
        timestamp.format(TIMESTAMP_FORMAT),
        direction.tag(),
        frame.to_hex()
    )
}

// ============================================================================
// FrameLog
// ============================================================================

/// Append-only frame log. One line per record, never rewritten.
pub struct FrameLog {
    out: Mutex<Box<dyn Write + Send>>,
    path: Option<PathBuf>,
}

impl FrameLog {
    /// Log to any writer (stdout, a pipe, an in-memory buffer)
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        FrameLog {
            out: Mutex::new(out),
            path: None,
        }
    }

    /// Append to an explicit file, creating it if needed
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(path)?;
        Ok(FrameLog {
            out: Mutex::new(Box::new(file)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Start a timestamped log in `dir` and point the `frames.log` symlink at it.
    pub fn create_in_dir(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let filename = chrono::Local::now()
            .format("%Y%m%d-%H%M%S-frames.log")
            .to_string();
        let log_path = dir.join(&filename);
        let file = open_append(&log_path)?;

        // Symlinks on Windows need elevated privileges; skip there
        #[cfg(unix)]
        {
            let symlink_path = dir.join(LATEST_LINK);
            let _ = std::fs::remove_file(&symlink_path);
            if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
                warn!("[logging] Failed to create {} symlink: {}", LATEST_LINK, e);
            }
        }

        info!("[logging] Frame log started: {}", log_path.display());

        Ok(FrameLog {
            out: Mutex::new(Box::new(file)),
            path: Some(log_path),
        })
    }

    /// Backing file, if the log has one
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one record and mirror it to the diagnostics stream.
    pub fn record(&self, direction: Direction, frame: &Frame) -> Result<()> {
        let line = format_record(&chrono::Local::now(), direction, frame);
        info!("{}", line);
        let mut out = self
            .out
            .lock()
            .map_err(|e| BridgeError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}
