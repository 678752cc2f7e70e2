// src/bridge.rs
//
// BridgeController: owns the ports, the framing buffer and the watchdog of a
// single link session, and runs the read -> frame -> log -> forward loop.
//
// Modes:
// - receive_only: frames are logged; manual sends go back to the primary port
// - forward: frames are logged and forwarded to a secondary port, which is
//   also the target of manual sends
// - playback: a pre-loaded queue is replayed to the primary port at a fixed
//   interval; nothing is read
//
// Tasks: the read loop runs on the blocking pool (serial reads block), a
// supervisor task waits for Stopping, joins the worker, closes every owned
// port once and marks the session Closed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::io::error::{BridgeError, Result};
use crate::io::serial::{
    ByteBuffer, FrameSink, FrameSource, LineSettings, DEFAULT_FRAME_SIZE, DEFAULT_READ_TIMEOUT, MAX_FRAME_SIZE,
};
use crate::io::types::{Direction, Frame, SerialIo};
use crate::logging::FrameLog;
use crate::playback::{self, PlaybackQueue, DEFAULT_REPLAY_INTERVAL};
use crate::session::{LinkSession, LinkState, StopReason};
use crate::watchdog::{Watchdog, WatchdogConfig};

/// Pause after a poll that returned nothing, so a non-blocking port cannot spin
const IDLE_PAUSE: Duration = Duration::from_millis(10);

// ============================================================================
// Configuration
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeMode {
    #[default]
    ReceiveOnly,
    Forward,
    Playback,
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Primary port: read in receive_only/forward, written in playback
    pub port: String,
    /// Line settings, shared by the primary and the forward port
    pub line: LineSettings,
    pub frame_size: usize,
    pub mode: BridgeMode,
    pub forward_port: Option<String>,
    pub read_timeout: Duration,
    pub watchdog: Option<WatchdogConfig>,
    pub replay_interval: Duration,
    pub playback: Option<PlaybackQueue>,
}

impl BridgeConfig {
    /// Defaults: 9600 8N1, 8-byte frames, 1 s read timeout, no watchdog
    pub fn new(port: &str, mode: BridgeMode) -> Self {
        BridgeConfig {
            port: port.to_string(),
            line: LineSettings::default(),
            frame_size: DEFAULT_FRAME_SIZE,
            mode,
            forward_port: None,
            read_timeout: DEFAULT_READ_TIMEOUT,
            watchdog: None,
            replay_interval: DEFAULT_REPLAY_INTERVAL,
            playback: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(BridgeError::config("no primary port configured"));
        }
        if self.frame_size == 0 {
            return Err(BridgeError::config("frame size must be at least 1 byte"));
        }
        if self.frame_size > MAX_FRAME_SIZE {
            return Err(BridgeError::config(format!(
                "frame size {} exceeds the {}-byte limit",
                self.frame_size, MAX_FRAME_SIZE
            )));
        }
        if self.line.baud_rate == 0 {
            return Err(BridgeError::config("baud rate must be non-zero"));
        }
        if self.read_timeout.is_zero() {
            return Err(BridgeError::config("read timeout must be non-zero"));
        }
        if let Some(watchdog) = &self.watchdog {
            if watchdog.timeout.is_zero() {
                return Err(BridgeError::config("watchdog timeout must be non-zero"));
            }
        }
        match self.mode {
            BridgeMode::Forward => match self.forward_port.as_deref() {
                None | Some("") => {
                    return Err(BridgeError::config("forward mode needs a forward port"))
                }
                Some(p) if p == self.port => {
                    return Err(BridgeError::config("forward port must differ from the primary port"))
                }
                Some(_) => {}
            },
            BridgeMode::Playback => {
                if self.playback.is_none() {
                    return Err(BridgeError::config("playback mode needs a playback queue"));
                }
                if self.replay_interval.is_zero() {
                    return Err(BridgeError::config("replay interval must be non-zero"));
                }
            }
            BridgeMode::ReceiveOnly => {}
        }
        Ok(())
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters shared between the worker tasks and the controller
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    bytes_read: AtomicU64,
    frames: AtomicU64,
    forwarded: AtomicU64,
    forward_failures: AtomicU64,
    read_failures: AtomicU64,
    manual_sends: AtomicU64,
    replayed: AtomicU64,
    replay_failures: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_replayed(&self) {
        self.replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_replay_failure(&self) {
        self.replay_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LinkStats {
        LinkStats {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            forward_failures: self.forward_failures.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            manual_sends: self.manual_sends.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            replay_failures: self.replay_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time session counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub bytes_read: u64,
    pub frames: u64,
    pub forwarded: u64,
    pub forward_failures: u64,
    pub read_failures: u64,
    pub manual_sends: u64,
    pub replayed: u64,
    pub replay_failures: u64,
}

// ============================================================================
// BridgeController
// ============================================================================

pub struct BridgeController {
    config: BridgeConfig,
    frame_log: Arc<FrameLog>,
    session: LinkSession,
    stats: Arc<StatsCounters>,
    buffer: Option<ByteBuffer>,
    /// Target of manual sends, set once the session is running
    command_sink: Option<FrameSink>,
    supervisor: Option<JoinHandle<()>>,
}

impl BridgeController {
    /// Validate the configuration. No port is touched here.
    pub fn new(config: BridgeConfig, frame_log: Arc<FrameLog>) -> Result<Self> {
        config.validate()?;
        let buffer = ByteBuffer::new(config.frame_size)?;
        Ok(BridgeController {
            config,
            frame_log,
            session: LinkSession::new(),
            stats: Arc::new(StatsCounters::default()),
            buffer: Some(buffer),
            command_sink: None,
            supervisor: None,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> LinkState {
        self.session.state()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.session.stop_reason()
    }

    pub fn stats(&self) -> LinkStats {
        self.stats.snapshot()
    }

    /// Open the configured serial ports and start the session.
    /// On failure nothing stays open and the session remains Idle.
    pub async fn start(&mut self) -> Result<()> {
        self.ensure_idle()?;
        let config = self.config.clone();

        // Opening a serial device blocks; keep it off the async workers
        let opened = tokio::task::spawn_blocking(move || open_ports(&config))
            .await
            .map_err(|e| BridgeError::config(format!("port open task failed: {}", e)))??;

        match opened {
            OpenedPorts::Reader { source, forward } => self.launch_reader(source, forward),
            OpenedPorts::Playback(sink) => self.launch_playback(sink),
        }
    }

    /// Start the session over already-open devices. `forward` is required in
    /// forward mode and ignored otherwise.
    pub fn start_with_ports(
        &mut self,
        primary: Box<dyn SerialIo>,
        forward: Option<Box<dyn SerialIo>>,
    ) -> Result<()> {
        self.ensure_idle()?;
        let port = self.config.port.clone();

        match self.config.mode {
            BridgeMode::ReceiveOnly => {
                let source = FrameSource::from_io(&port, primary, self.config.read_timeout);
                self.launch_reader(source, None)
            }
            BridgeMode::Forward => {
                let device = self.config.forward_port.clone().unwrap_or_default();
                let forward = forward
                    .map(|io| FrameSink::from_io(&device, io))
                    .ok_or_else(|| BridgeError::config("forward mode needs a forward port"))?;
                let source = FrameSource::from_io(&port, primary, self.config.read_timeout);
                self.launch_reader(source, Some(forward))
            }
            BridgeMode::Playback => self.launch_playback(FrameSink::from_io(&port, primary)),
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.session.state() {
            LinkState::Idle => Ok(()),
            state => Err(BridgeError::config(format!(
                "session already {}; create a new controller",
                state
            ))),
        }
    }

    fn launch_reader(&mut self, source: FrameSource, forward: Option<FrameSink>) -> Result<()> {
        let buffer = self
            .buffer
            .take()
            .ok_or_else(|| BridgeError::config("framing buffer already in use"))?;
        let primary_sink = source
            .sink()
            .ok_or_else(|| BridgeError::disconnected(source.device()))?;

        self.session.transition(LinkState::Idle, LinkState::Running);
        info!(
            "[bridge] Session running: {:?} on {} ({}-byte frames{})",
            self.config.mode,
            self.config.port,
            self.config.frame_size,
            forward
                .as_ref()
                .map(|f| format!(", forwarding to {}", f.device()))
                .unwrap_or_default()
        );

        let watchdog = self.spawn_watchdog();
        self.command_sink = Some(forward.clone().unwrap_or_else(|| primary_sink.clone()));

        let read_loop = ReadLoop {
            source,
            buffer,
            frame_log: self.frame_log.clone(),
            forward: forward.clone(),
            watchdog: watchdog.clone(),
            session: self.session.clone(),
            stats: self.stats.clone(),
        };
        let worker = tokio::task::spawn_blocking(move || read_loop.run());

        let mut owned = vec![primary_sink];
        owned.extend(forward);
        self.supervisor = Some(self.spawn_supervisor(worker, owned, watchdog));
        Ok(())
    }

    fn launch_playback(&mut self, sink: FrameSink) -> Result<()> {
        let queue = self
            .config
            .playback
            .clone()
            .ok_or_else(|| BridgeError::config("playback mode needs a playback queue"))?;

        self.session.transition(LinkState::Idle, LinkState::Running);
        info!(
            "[bridge] Session running: playback of {} payloads to {}",
            queue.len(),
            sink.device()
        );

        let watchdog = self.spawn_watchdog();
        self.command_sink = Some(sink.clone());

        let worker = tokio::spawn(playback::replay(
            queue,
            sink.clone(),
            self.config.replay_interval,
            self.session.clone(),
            self.stats.clone(),
        ));
        self.supervisor = Some(self.spawn_supervisor(worker, vec![sink], watchdog));
        Ok(())
    }

    fn spawn_watchdog(&self) -> Option<Arc<Watchdog>> {
        self.config.watchdog.clone().map(|cfg| {
            info!(
                "[watchdog] {:?} policy, timeout {:?}",
                cfg.policy, cfg.timeout
            );
            Arc::new(Watchdog::spawn(cfg, self.session.clone()))
        })
    }

    fn spawn_supervisor(
        &self,
        worker: JoinHandle<()>,
        ports: Vec<FrameSink>,
        watchdog: Option<Arc<Watchdog>>,
    ) -> JoinHandle<()> {
        let session = self.session.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            session.wait_until(|s| s == LinkState::Stopping).await;
            let reason = session
                .stop_reason()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            info!("[bridge] Stopping session ({})", reason);

            if let Err(e) = worker.await {
                error!("[bridge] Worker task failed: {}", e);
            }
            if let Some(watchdog) = watchdog {
                watchdog.cancel();
            }

            // A manual send may still hold a port lock
            let closed = tokio::task::spawn_blocking(move || {
                ports.iter().filter(|sink| sink.close()).count()
            })
            .await
            .unwrap_or(0);
            debug!("[bridge] Released {} port(s)", closed);

            session.transition(LinkState::Stopping, LinkState::Closed);
            let s = stats.snapshot();
            info!(
                "[bridge] Session closed: {} bytes, {} frames, {} forwarded ({} failed), {} read errors, {} manual sends, {} replayed",
                s.bytes_read, s.frames, s.forwarded, s.forward_failures, s.read_failures, s.manual_sends, s.replayed
            );
        })
    }

    /// Manual send to the session's sink. Allowed only while Running.
    /// Sent bytes are recorded in the frame log as TX.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        let sink = self.running_sink()?;
        sink.send(bytes)?;
        self.stats.manual_sends.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.frame_log.record(Direction::Tx, &Frame::new(bytes.to_vec())) {
            warn!("[bridge] Frame log write failed: {}", e);
        }
        Ok(())
    }

    /// Decode and send a hex command. Bad hex is rejected before any write.
    pub fn send_hex(&self, text: &str) -> Result<Vec<u8>> {
        let bytes = crate::io::codec::decode_hex_command(text)?;
        self.send(&bytes)?;
        Ok(bytes)
    }

    fn running_sink(&self) -> Result<&FrameSink> {
        let device = self
            .command_sink
            .as_ref()
            .map(|s| s.device())
            .unwrap_or(self.config.port.as_str());
        if !self.session.is_running() {
            return Err(BridgeError::write(
                device,
                format!("link is {}", self.session.state()),
            ));
        }
        self.command_sink
            .as_ref()
            .ok_or_else(|| BridgeError::write(device, "no transmit port"))
    }

    /// Stop the session and wait until every port is released. Idempotent.
    pub async fn stop(&mut self) {
        if self.session.transition(LinkState::Idle, LinkState::Closed) {
            return;
        }
        self.session.request_stop(StopReason::Command);
        self.join().await;
    }

    /// Wait for the session to close on its own (watchdog or fatal read error).
    /// Returns immediately if the session never started.
    pub async fn closed(&mut self) {
        if self.session.state() == LinkState::Idle {
            return;
        }
        self.session.wait_until(|s| s == LinkState::Closed).await;
        self.join().await;
    }

    async fn join(&mut self) {
        if let Some(handle) = self.supervisor.take() {
            if let Err(e) = handle.await {
                error!("[bridge] Supervisor task failed: {}", e);
            }
        }
    }
}

impl Drop for BridgeController {
    fn drop(&mut self) {
        // Let the supervisor release the ports rather than orphan the reader
        if self.session.request_stop(StopReason::Command) {
            debug!("[bridge] Controller dropped while running");
        }
    }
}

// ============================================================================
// Port opening
// ============================================================================

enum OpenedPorts {
    Reader {
        source: FrameSource,
        forward: Option<FrameSink>,
    },
    Playback(FrameSink),
}

/// Open every device the mode needs. Blocking.
fn open_ports(config: &BridgeConfig) -> Result<OpenedPorts> {
    match config.mode {
        BridgeMode::ReceiveOnly | BridgeMode::Forward => {
            let mut source = FrameSource::new(config.read_timeout);
            source.open(&config.port, &config.line)?;

            let forward = match (config.mode, config.forward_port.as_deref()) {
                (BridgeMode::Forward, Some(device)) => match FrameSink::open(device, &config.line) {
                    Ok(sink) => Some(sink),
                    Err(e) => {
                        source.close();
                        return Err(e);
                    }
                },
                _ => None,
            };
            Ok(OpenedPorts::Reader { source, forward })
        }
        BridgeMode::Playback => Ok(OpenedPorts::Playback(FrameSink::open(&config.port, &config.line)?)),
    }
}

// ============================================================================
// Read loop
// ============================================================================

struct ReadLoop {
    source: FrameSource,
    buffer: ByteBuffer,
    frame_log: Arc<FrameLog>,
    forward: Option<FrameSink>,
    watchdog: Option<Arc<Watchdog>>,
    session: LinkSession,
    stats: Arc<StatsCounters>,
}

impl ReadLoop {
    /// Blocking: poll, frame, log, forward until the session leaves Running.
    fn run(mut self) {
        let device = self.source.device().to_string();
        debug!("[bridge] Read loop started on {}", device);
        let mut first_frame_seen = false;

        while self.session.is_running() {
            let got_bytes = match self.source.poll() {
                Ok(bytes) if bytes.is_empty() => false,
                Ok(bytes) => {
                    self.stats
                        .bytes_read
                        .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                    self.buffer.append(&bytes);
                    true
                }
                Err(e) if e.is_permanent() => {
                    error!("[bridge] {}", e);
                    self.session.request_stop(StopReason::ReadError(e.to_string()));
                    break;
                }
                Err(e) => {
                    self.stats.read_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("[bridge] {}", e);
                    false
                }
            };

            for frame in self.buffer.extract_frames() {
                self.stats.frames.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.frame_log.record(Direction::Rx, &frame) {
                    warn!("[bridge] Frame log write failed: {}", e);
                }

                if let Some(sink) = &self.forward {
                    match sink.send(frame.as_bytes()) {
                        Ok(()) => {
                            self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            self.stats.forward_failures.fetch_add(1, Ordering::Relaxed);
                            warn!("[bridge] Forward of {} failed: {}", frame, e);
                        }
                    }
                }

                if !first_frame_seen {
                    first_frame_seen = true;
                    if let Some(watchdog) = &self.watchdog {
                        if watchdog.arm() {
                            info!("[watchdog] Armed by first frame");
                        }
                    }
                }
            }

            if got_bytes {
                std::thread::yield_now();
            } else {
                std::thread::sleep(IDLE_PAUSE);
            }
        }

        debug!(
            "[bridge] Read loop on {} exited ({} bytes left unframed)",
            device,
            self.buffer.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> Arc<FrameLog> {
        Arc::new(FrameLog::new(Box::new(std::io::sink())))
    }

    #[test]
    fn test_zero_frame_size_fails_at_construction() {
        let mut config = BridgeConfig::new("COM3", BridgeMode::ReceiveOnly);
        config.frame_size = 0;
        assert!(matches!(
            BridgeController::new(config, log()),
            Err(BridgeError::Configuration(_))
        ));
    }

    #[test]
    fn test_huge_frame_size_fails_at_construction() {
        let mut config = BridgeConfig::new("COM3", BridgeMode::ReceiveOnly);
        config.frame_size = usize::MAX / 2;
        assert!(matches!(
            BridgeController::new(config, log()),
            Err(BridgeError::Configuration(_))
        ));
    }

    #[test]
    fn test_forward_mode_requires_distinct_port() {
        let config = BridgeConfig::new("COM3", BridgeMode::Forward);
        assert!(matches!(config.validate(), Err(BridgeError::Configuration(_))));

        let mut config = BridgeConfig::new("COM3", BridgeMode::Forward);
        config.forward_port = Some("COM3".to_string());
        assert!(config.validate().is_err());

        config.forward_port = Some("COM4".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_playback_mode_requires_queue() {
        let mut config = BridgeConfig::new("COM4", BridgeMode::Playback);
        assert!(config.validate().is_err());
        config.playback = Some(PlaybackQueue::default());
        assert!(config.validate().is_ok());
        config.replay_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_watchdog_timeout_rejected() {
        let mut config = BridgeConfig::new("COM3", BridgeMode::ReceiveOnly);
        config.watchdog = Some(WatchdogConfig {
            policy: crate::watchdog::WatchdogPolicy::FromOpen,
            timeout: Duration::ZERO,
        });
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_open_failure_leaves_session_idle() {
        let config = BridgeConfig::new("/dev/portbridge-does-not-exist", BridgeMode::ReceiveOnly);
        let mut bridge = BridgeController::new(config, log()).unwrap();
        let err = bridge.start().await.unwrap_err();
        assert!(matches!(err, BridgeError::PortUnavailable { .. }));
        assert_eq!(bridge.state(), LinkState::Idle);
        assert!(matches!(bridge.send(&[1]), Err(BridgeError::WriteFailed { .. })));
    }

    #[tokio::test]
    async fn test_stop_before_start_closes() {
        let config = BridgeConfig::new("COM3", BridgeMode::ReceiveOnly);
        let mut bridge = BridgeController::new(config, log()).unwrap();
        bridge.stop().await;
        assert_eq!(bridge.state(), LinkState::Closed);
        bridge.stop().await;
        assert_eq!(bridge.state(), LinkState::Closed);
    }
}
