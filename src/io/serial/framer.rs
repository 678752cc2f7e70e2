// src/io/serial/framer.rs
//
// Fixed-size framing for serial byte streams.
// Bytes arrive in arbitrary chunks from the reader; the buffer hands them back
// as frames of exactly `frame_size` bytes, strictly in arrival order.

use std::collections::VecDeque;

use crate::io::error::{BridgeError, Result};
use crate::io::types::Frame;

/// Default frame size when none is configured
pub const DEFAULT_FRAME_SIZE: usize = 8;

/// Largest accepted frame size (64 KiB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

// =============================================================================
// ByteBuffer
// =============================================================================

/// Append-only byte accumulator with FIFO frame extraction.
///
/// Only the read loop mutates a buffer, so it carries no locking of its own.
#[derive(Debug)]
pub struct ByteBuffer {
    buffer: VecDeque<u8>,
    frame_size: usize,
}

impl ByteBuffer {
    /// Create a buffer cutting frames of `frame_size` bytes.
    /// A size of zero or above `MAX_FRAME_SIZE` is a configuration error.
    pub fn new(frame_size: usize) -> Result<Self> {
        if frame_size == 0 {
            return Err(BridgeError::config("frame size must be at least 1 byte"));
        }
        if frame_size > MAX_FRAME_SIZE {
            return Err(BridgeError::config(format!(
                "frame size {} exceeds the {}-byte limit",
                frame_size, MAX_FRAME_SIZE
            )));
        }
        Ok(ByteBuffer {
            buffer: VecDeque::new(),
            frame_size,
        })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Bytes waiting for enough company to make a frame
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Copy of the leftover bytes, oldest first
    pub fn pending(&self) -> Vec<u8> {
        self.buffer.iter().copied().collect()
    }

    /// Add bytes to the tail. Empty input is fine.
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend(data);
    }

    /// Lazily yield every complete frame currently buffered.
    /// Leftover bytes (< frame_size) stay for the next append.
    pub fn extract_frames(&mut self) -> Frames<'_> {
        Frames { source: self }
    }
}

/// Iterator returned by [`ByteBuffer::extract_frames`]
pub struct Frames<'a> {
    source: &'a mut ByteBuffer,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        let size = self.source.frame_size;
        if self.source.buffer.len() < size {
            return None;
        }
        let bytes: Vec<u8> = self.source.buffer.drain(..size).collect();
        Some(Frame::new(bytes))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.source.buffer.len() / self.source.frame_size;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Frames<'_> {}
