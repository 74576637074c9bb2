use serde::de::DeserializeOwned;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    Oversized { size: usize, max: usize },
    #[error("frame decode failed: {0}")]
    Decode(String),
}

/// Decodes one JSON stream frame. The transport delivers frames already
/// delimited; this only guards size and shape. A failed decode is a
/// per-frame condition; the owning session drops the frame and stays
/// open.
pub fn decode_frame<T: DeserializeOwned>(
    bytes: &[u8],
    max_frame_bytes: usize,
) -> Result<T, FrameError> {
    let mut raw = bytes;
    if raw.ends_with(b"\n") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.ends_with(b"\r") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.len() > max_frame_bytes {
        return Err(FrameError::Oversized {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_slice(raw).map_err(|err| FrameError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventAction, LifecycleEvent};

    #[test]
    fn decodes_event_frame_with_trailing_newline() {
        let frame = b"{\"Action\":\"start\",\"Actor\":{\"ID\":\"abc\"}}\r\n";
        let event: LifecycleEvent =
            decode_frame(frame, DEFAULT_MAX_FRAME_BYTES).expect("decode event");
        assert_eq!(event.action, EventAction::Start);
        assert_eq!(event.workload_id(), "abc");
    }

    #[test]
    fn malformed_frame_reports_decode_error() {
        let result: Result<LifecycleEvent, _> =
            decode_frame(b"{\"Action\":", DEFAULT_MAX_FRAME_BYTES);
        assert!(matches!(result, Err(FrameError::Decode(_))));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let frame = format!("{{\"blob\":\"{}\"}}", "x".repeat(2_000));
        let result: Result<serde_json::Value, _> = decode_frame(frame.as_bytes(), 1_024);
        assert!(matches!(result, Err(FrameError::Oversized { .. })));
    }
}
