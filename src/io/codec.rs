// src/io/codec.rs
//
// Hex text codecs used on the operator side of the bridge:
// - frame log rendering (`AA BB CC`, uppercase, space separated)
// - hex command input (`1a2b3c`, case-insensitive, even length)

use super::error::{BridgeError, Result};

/// Render bytes as space-separated, two-digit uppercase hex.
pub fn encode_spaced_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02X}", byte));
    }
    out
}

/// Decode a hex command string into raw bytes.
///
/// Whitespace between digit pairs is tolerated (so a frame-log record can be
/// pasted back in); anything else must be an even run of hex digits.
pub fn decode_hex_command(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(BridgeError::InvalidHexFormat("no hex digits".to_string()));
    }
    if compact.len() % 2 != 0 {
        return Err(BridgeError::InvalidHexFormat(format!(
            "odd number of hex digits ({})",
            compact.len()
        )));
    }
    hex::decode(&compact).map_err(|e| BridgeError::InvalidHexFormat(format!("{}: {:?}", e, text)))
}
