// src/io/mod.rs
//
// Port I/O for the bridge: the serial driver, the hex text codecs and the
// error taxonomy shared by every layer above.

pub mod codec;
pub mod error;
pub mod serial;
pub mod types;

pub use codec::{decode_hex_command, encode_spaced_hex};
pub use error::{BridgeError, Result};
pub use types::{Direction, Frame, SerialIo};
