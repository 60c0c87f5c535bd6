//! Wire codec for streamed frames
//!
//! Each frame travels as one Server-Sent Event whose `data:` field is a
//! JSON object with exactly one key:
//!
//! ```text
//! data: {"delta":"Hel"}
//!
//! data: {"delta":"lo"}
//!
//! data: {"done":true}
//!
//! ```
//!
//! Errors use `{"error":"..."}`. Decoders accept `{"content":"..."}` as a
//! delta for compatibility with older backends.

use crate::gateway::lines::LineBuffer;
use crate::gateway::Frame;
use serde::{Deserialize, Serialize};

/// JSON shape of one frame
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireFrame {
    #[serde(default, alias = "content", skip_serializing_if = "Option::is_none")]
    delta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    done: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&Frame> for WireFrame {
    fn from(frame: &Frame) -> Self {
        match frame {
            Frame::Delta(text) => WireFrame {
                delta: Some(text.clone()),
                ..Default::default()
            },
            Frame::Done => WireFrame {
                done: Some(true),
                ..Default::default()
            },
            Frame::Error(message) => WireFrame {
                error: Some(message.clone()),
                ..Default::default()
            },
        }
    }
}

/// Serialize a frame to its JSON payload
pub fn frame_to_json(frame: &Frame) -> String {
    // A struct of optional strings and bools always serializes
    serde_json::to_string(&WireFrame::from(frame)).unwrap_or_else(|_| "{}".to_string())
}

/// Parse a JSON payload into a frame
///
/// Returns `None` for anything that is not a recognizable frame. `error`
/// wins over `done`, which wins over `delta`. `{"done": false}` and empty
/// deltas carry nothing and yield `None`.
pub fn frame_from_json(data: &str) -> Option<Frame> {
    let wire: WireFrame = match serde_json::from_str(data) {
        Ok(wire) => wire,
        Err(e) => {
            tracing::debug!(error = %e, "Dropping malformed frame");
            return None;
        }
    };

    if let Some(error) = wire.error {
        return Some(Frame::Error(error));
    }
    if wire.done == Some(true) {
        return Some(Frame::Done);
    }
    wire.delta.filter(|d| !d.is_empty()).map(Frame::Delta)
}

/// Encode a frame as a complete SSE event, including the blank-line terminator
pub fn encode_sse(frame: &Frame) -> String {
    format!("data: {}\n\n", frame_to_json(frame))
}

/// Incremental SSE decoder
///
/// Feed raw body chunks with [`SseDecoder::push`]; complete events are
/// decoded into frames. Comment lines, `event:`/`id:`/`retry:` fields and
/// malformed payloads are skipped without affecting later events.
#[derive(Debug, Default)]
pub struct SseDecoder {
    lines: LineBuffer,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for line in self.lines.push(chunk) {
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Decode whatever is left when the body ends
    pub fn finish(&mut self) -> Option<Frame> {
        if let Some(line) = self.lines.finish() {
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        frame_from_json(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_json_shapes() {
        assert_eq!(frame_to_json(&Frame::Delta("hi".into())), r#"{"delta":"hi"}"#);
        assert_eq!(frame_to_json(&Frame::Done), r#"{"done":true}"#);
        assert_eq!(
            frame_to_json(&Frame::Error("boom".into())),
            r#"{"error":"boom"}"#
        );
    }

    #[test]
    fn test_frame_from_json_accepts_content_alias() {
        assert_eq!(
            frame_from_json(r#"{"content":"x"}"#),
            Some(Frame::Delta("x".into()))
        );
    }

    #[test]
    fn test_frame_from_json_precedence_and_noise() {
        assert_eq!(
            frame_from_json(r#"{"error":"e","done":true}"#),
            Some(Frame::Error("e".into()))
        );
        assert_eq!(frame_from_json(r#"{"done":false}"#), None);
        assert_eq!(frame_from_json(r#"{"delta":""}"#), None);
        assert_eq!(frame_from_json("not json"), None);
    }

    #[test]
    fn test_decoder_handles_partial_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"del").is_empty());
        assert!(decoder.push(b"ta\":\"Hel\"}\n").is_empty());
        assert_eq!(decoder.push(b"\n"), vec![Frame::Delta("Hel".into())]);
    }

    #[test]
    fn test_decoder_multiple_events_in_one_chunk() {
        let mut decoder = SseDecoder::new();
        let body = format!(
            "{}{}{}",
            encode_sse(&Frame::Delta("a".into())),
            encode_sse(&Frame::Delta("b".into())),
            encode_sse(&Frame::Done)
        );
        assert_eq!(
            decoder.push(body.as_bytes()),
            vec![
                Frame::Delta("a".into()),
                Frame::Delta("b".into()),
                Frame::Done
            ]
        );
    }

    #[test]
    fn test_decoder_skips_malformed_event_and_continues() {
        let mut decoder = SseDecoder::new();
        let body = "data: {oops\n\n: keep-alive\n\nevent: message\ndata: {\"delta\":\"ok\"}\n\n";
        assert_eq!(decoder.push(body.as_bytes()), vec![Frame::Delta("ok".into())]);
    }

    #[test]
    fn test_decoder_crlf_and_unterminated_tail() {
        let mut decoder = SseDecoder::new();
        assert_eq!(
            decoder.push(b"data: {\"delta\":\"x\"}\r\n\r\n"),
            vec![Frame::Delta("x".into())]
        );
        assert!(decoder.push(b"data: {\"done\":true}").is_empty());
        assert_eq!(decoder.finish(), Some(Frame::Done));
    }
}
