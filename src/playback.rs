// src/playback.rs
//
// Playback of captured traffic.
//
// A playback source is hex text (whitespace and line breaks anywhere between
// bytes). Every run that starts with the A9 9A header and ends with the 0D 0A
// trailer becomes one payload; the first `trim` bytes of each run are dropped
// before replay. Frame logs can be turned into playback sources with
// `write_playback_file`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::bridge::StatsCounters;
use crate::io::codec::decode_hex_command;
use crate::io::error::{BridgeError, Result};
use crate::io::serial::FrameSink;
use crate::io::types::Frame;
use crate::session::{LinkSession, LinkState};

/// Header that opens a captured run
pub const START_MARKER: [u8; 2] = [0xA9, 0x9A];
/// Trailer that closes a captured run
pub const END_MARKER: [u8; 2] = [0x0D, 0x0A];
/// Leading bytes dropped from each run before it is replayed
pub const DEFAULT_TRIM: usize = 2;
/// Pause between replayed payloads
pub const DEFAULT_REPLAY_INTERVAL: Duration = Duration::from_secs(1);

/// Marker between the tag and the payload of a received-frame log line
const RX_RECORD_MARKER: &str = " - RX - ";

// ============================================================================
// PlaybackQueue
// ============================================================================

/// Payloads loaded once from a capture, replayed strictly in file order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaybackQueue {
    frames: Vec<Frame>,
}

impl PlaybackQueue {
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        PlaybackQueue { frames }
    }

    /// Extract every delimited run from hex text
    pub fn parse(text: &str, trim: usize) -> Result<Self> {
        let mut bytes = Vec::with_capacity(text.len() / 3);
        for (i, token) in text.split_whitespace().enumerate() {
            let decoded = decode_hex_command(token).map_err(|_| {
                BridgeError::InvalidHexFormat(format!("playback token {} is not hex: {:?}", i + 1, token))
            })?;
            bytes.extend(decoded);
        }

        let mut frames = Vec::new();
        let mut pos = 0;
        while let Some(start) = find(&bytes[pos..], &START_MARKER).map(|i| pos + i) {
            let body = start + START_MARKER.len();
            let end = match find(&bytes[body..], &END_MARKER) {
                Some(i) => body + i + END_MARKER.len(),
                None => {
                    debug!("[playback] Unterminated run at byte {} ignored", start);
                    break;
                }
            };
            let run = &bytes[start..end];
            if trim >= run.len() {
                warn!("[playback] Run at byte {} is shorter than the trim, skipped", start);
            } else {
                frames.push(Frame::new(run[trim..].to_vec()));
            }
            pos = end;
        }

        Ok(PlaybackQueue { frames })
    }

    pub fn load(path: &Path, trim: usize) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let queue = Self::parse(&text, trim)?;
        info!(
            "[playback] Loaded {} payloads from {}",
            queue.len(),
            path.display()
        );
        Ok(queue)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ============================================================================
// Replay
// ============================================================================

/// Send each queued payload, pausing `interval` between sends.
/// Stops early if the session leaves Running. Send failures are logged and
/// the replay moves on to the next payload.
pub(crate) async fn replay(
    queue: PlaybackQueue,
    sink: FrameSink,
    interval: Duration,
    session: LinkSession,
    stats: Arc<StatsCounters>,
) {
    let total = queue.len();
    info!(
        "[playback] Replaying {} payloads to {} every {:?}",
        total,
        sink.device(),
        interval
    );

    for (i, frame) in queue.frames.into_iter().enumerate() {
        if !session.is_running() {
            break;
        }

        let writer = sink.clone();
        let bytes = frame.as_bytes().to_vec();
        // Serial writes block; keep them off the async workers
        match tokio::task::spawn_blocking(move || writer.send(&bytes)).await {
            Ok(Ok(())) => {
                stats.record_replayed();
                info!("[playback] TX {}/{}: {}", i + 1, total, frame);
            }
            Ok(Err(e)) => {
                stats.record_replay_failure();
                warn!("[playback] Payload {}/{} not sent: {}", i + 1, total, e);
            }
            Err(e) => {
                stats.record_replay_failure();
                warn!("[playback] Send task failed: {}", e);
            }
        }

        if i + 1 < total {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = session.wait_until(|s| s != LinkState::Running) => break,
            }
        }
    }

    info!("[playback] Replay finished");
}

// ============================================================================
// Frame log extraction
// ============================================================================

/// Hex payload of every received-frame record in a frame log, in order
pub fn extract_rx_records(log_text: &str) -> Vec<String> {
    log_text
        .lines()
        .filter_map(|line| {
            line.find(RX_RECORD_MARKER)
                .map(|i| line[i + RX_RECORD_MARKER.len()..].trim().to_string())
        })
        .filter(|payload| !payload.is_empty())
        .collect()
}

/// Concatenate the RX records of several frame logs into one playback source,
/// one record per line. Missing logs are skipped. Returns the record count.
pub fn write_playback_file(logs: &[PathBuf], out: &Path) -> Result<usize> {
    let mut records = Vec::new();
    for log in logs {
        if !log.exists() {
            warn!("[playback] {} not found, skipped", log.display());
            continue;
        }
        let text = std::fs::read_to_string(log)?;
        let extracted = extract_rx_records(&text);
        debug!("[playback] {} records from {}", extracted.len(), log.display());
        records.extend(extracted);
    }

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut content = records.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    std::fs::write(out, content)?;

    info!("[playback] Wrote {} records to {}", records.len(), out.display());
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPTURE: &str = "\
A9 9A 01 02 03 0D 0A
00 11
A9 9A 10 20
30 40 0D 0A A9 9A FF";

    #[test]
    fn test_parse_delimited_runs() {
        let queue = PlaybackQueue::parse(CAPTURE, DEFAULT_TRIM).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.frames()[0].as_bytes(), &[0x01, 0x02, 0x03, 0x0D, 0x0A]);
        // Runs may span line breaks
        assert_eq!(
            queue.frames()[1].as_bytes(),
            &[0x10, 0x20, 0x30, 0x40, 0x0D, 0x0A]
        );
    }

    #[test]
    fn test_parse_without_trim_keeps_header() {
        let queue = PlaybackQueue::parse("a99a0d0a", 0).unwrap();
        assert_eq!(queue.frames()[0].as_bytes(), &[0xA9, 0x9A, 0x0D, 0x0A]);
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        let err = PlaybackQueue::parse("A9 9A XX 0D 0A", DEFAULT_TRIM).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidHexFormat(_)));
    }

    #[test]
    fn test_parse_empty_source() {
        assert!(PlaybackQueue::parse("", DEFAULT_TRIM).unwrap().is_empty());
        assert!(PlaybackQueue::parse("01 02 03", DEFAULT_TRIM).unwrap().is_empty());
    }

    #[test]
    fn test_extract_rx_records() {
        let log = "\
2024-03-05 14:07:09.000 - RX - A9 9A 01 02 03 04 05 06
2024-03-05 14:07:09.100 - INFO - something else
2024-03-05 14:07:09.200 - RX - 07 08 0D 0A 00 00 00 00
";
        assert_eq!(
            extract_rx_records(log),
            vec![
                "A9 9A 01 02 03 04 05 06".to_string(),
                "07 08 0D 0A 00 00 00 00".to_string()
            ]
        );
    }

    #[test]
    fn test_write_playback_file_round_trips_through_parse() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("id 001.log");
        let missing = dir.path().join("id 002.log");
        std::fs::write(
            &first,
            "2024-03-05 14:07:09.000 - RX - A9 9A 01 02 03 04 05 06\n\
             2024-03-05 14:07:09.200 - RX - 07 08 0D 0A 00 00 00 00\n",
        )
        .unwrap();

        let out = dir.path().join("data").join("data 01.txt");
        let count = write_playback_file(&[first, missing], &out).unwrap();
        assert_eq!(count, 2);

        let queue = PlaybackQueue::load(&out, DEFAULT_TRIM).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.frames()[0].as_bytes(),
            &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x0D, 0x0A]
        );
    }
}
