// src/settings.rs
//
// File-backed settings for a bridge session (TOML). Every field has a default,
// so a partial or empty file is valid. Command-line flags override on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bridge::{BridgeConfig, BridgeMode};
use crate::io::error::{BridgeError, Result};
use crate::io::serial::{LineSettings, Parity, DEFAULT_FRAME_SIZE};
use crate::playback::{PlaybackQueue, DEFAULT_TRIM};
use crate::watchdog::{WatchdogConfig, WatchdogPolicy};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WatchdogSettings {
    #[serde(default = "default_watchdog_policy")]
    pub policy: WatchdogPolicy,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BridgeSettings {
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    #[serde(default)]
    pub mode: BridgeMode,
    #[serde(default)]
    pub forward_port: Option<String>,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Absent = no watchdog
    #[serde(default)]
    pub watchdog: Option<WatchdogSettings>,
    #[serde(default = "default_replay_interval_ms")]
    pub replay_interval_ms: u64,
    #[serde(default)]
    pub playback_file: Option<PathBuf>,
    #[serde(default = "default_playback_trim")]
    pub playback_trim: usize,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_watchdog_policy() -> WatchdogPolicy {
    WatchdogPolicy::FromFirstFrame
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_frame_size() -> usize {
    DEFAULT_FRAME_SIZE
}
fn default_read_timeout_ms() -> u64 {
    1000
}
fn default_replay_interval_ms() -> u64 {
    1000
}
fn default_playback_trim() -> usize {
    DEFAULT_TRIM
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            frame_size: default_frame_size(),
            mode: BridgeMode::default(),
            forward_port: None,
            read_timeout_ms: default_read_timeout_ms(),
            watchdog: None,
            replay_interval_ms: default_replay_interval_ms(),
            playback_file: None,
            playback_trim: default_playback_trim(),
            log_dir: default_log_dir(),
        }
    }
}

impl BridgeSettings {
    pub fn line(&self) -> LineSettings {
        LineSettings {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
        }
    }

    /// Build the runtime configuration. Playback sources are loaded here;
    /// range checks are left to `BridgeController::new`.
    pub fn to_config(&self) -> Result<BridgeConfig> {
        let port = self
            .port
            .clone()
            .ok_or_else(|| BridgeError::config("no port configured"))?;

        let playback = match self.mode {
            BridgeMode::Playback => {
                let path = self
                    .playback_file
                    .as_deref()
                    .ok_or_else(|| BridgeError::config("playback mode needs a playback file"))?;
                let queue = PlaybackQueue::load(path, self.playback_trim).map_err(|e| match e {
                    BridgeError::Io(io) => {
                        BridgeError::config(format!("cannot read {}: {}", path.display(), io))
                    }
                    other => other,
                })?;
                Some(queue)
            }
            _ => None,
        };

        Ok(BridgeConfig {
            port,
            line: self.line(),
            frame_size: self.frame_size,
            mode: self.mode,
            forward_port: self.forward_port.clone(),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            watchdog: self.watchdog.as_ref().map(|w| WatchdogConfig {
                policy: w.policy,
                timeout: Duration::from_secs(w.timeout_secs),
            }),
            replay_interval: Duration::from_millis(self.replay_interval_ms),
            playback,
        })
    }
}

/// `<config_dir>/portbridge/portbridge.toml`
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("portbridge").join("portbridge.toml"))
}

/// Read settings from a TOML file.
pub fn load_settings(path: &Path) -> Result<BridgeSettings> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| BridgeError::config(format!("failed to read {}: {}", path.display(), e)))?;
    let settings = toml::from_str(&content)
        .map_err(|e| BridgeError::config(format!("failed to parse {}: {}", path.display(), e)))?;
    debug!("[settings] Loaded {}", path.display());
    Ok(settings)
}

/// Settings from `path` if given, else from the default location when it
/// exists, else defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<BridgeSettings> {
    match path {
        Some(path) => load_settings(path),
        None => match default_settings_path().filter(|p| p.exists()) {
            Some(path) => load_settings(&path),
            None => Ok(BridgeSettings::default()),
        },
    }
}
