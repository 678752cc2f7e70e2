// src/io/serial/mod.rs
//
// Serial port driver with fixed-size framing.
//
// Features:
// - Pull-based reads with a bounded per-poll timeout (reader)
// - Fixed-size FIFO frame extraction (framer)
// - Serialised transmit shared between forwarding and manual sends (writer)

pub mod framer;
pub mod reader;
pub mod utils;
pub mod writer;

pub use framer::{ByteBuffer, Frames, DEFAULT_FRAME_SIZE, MAX_FRAME_SIZE};
pub use reader::{FrameSource, DEFAULT_READ_TIMEOUT};
pub use utils::{list_serial_ports, lowest_numbered_port, LineSettings, Parity, SerialPortInfo};
pub use writer::FrameSink;
