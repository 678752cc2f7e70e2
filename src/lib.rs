// src/lib.rs
//
// portbridge: a serial-port bridge and debugging tool.
// Reads a port, cuts the byte stream into fixed-size frames, logs each frame,
// optionally forwards it to a second port, and replays captured traffic.

pub mod bridge;
pub mod io;
pub mod logging;
pub mod playback;
pub mod scan;
pub mod session;
pub mod settings;
pub mod watchdog;

pub use bridge::{BridgeConfig, BridgeController, BridgeMode, LinkStats};
pub use io::error::{BridgeError, Result};
pub use io::serial::{
    list_serial_ports, lowest_numbered_port, ByteBuffer, FrameSink, FrameSource, LineSettings, Parity,
    SerialPortInfo,
};
pub use io::types::{Direction, Frame, SerialIo};
pub use logging::FrameLog;
pub use playback::{extract_rx_records, write_playback_file, PlaybackQueue};
pub use scan::{scan_ports, ScanResult};
pub use session::{LinkState, StopReason};
pub use settings::BridgeSettings;
pub use watchdog::{WatchdogConfig, WatchdogPolicy};
