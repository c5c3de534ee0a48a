//! Server-Sent Events encoding for completion streams.
//!
//! Every [`TokenEvent`] maps to one `data: <json>\n\n` frame carrying
//! exactly one payload: `{"token":…}`, `{"error":…}`, or `{"done":true}`.
//! The encoder owns the end-of-stream rule: once it has emitted a terminal
//! frame it emits nothing further, whatever it is fed.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::http::{Response, StatusCode};
use crate::llm::TokenEvent;

/// Stateful frame encoder for one stream.
#[derive(Debug, Default)]
pub struct SseEncoder {
    terminated: bool,
}

impl SseEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes one event as a wire frame.
    ///
    /// Returns `None` once a terminal frame has been produced; the caller
    /// should stop feeding events and close the transport.
    pub fn encode(&mut self, event: &TokenEvent) -> Option<Bytes> {
        if self.terminated {
            return None;
        }

        let payload = match event {
            TokenEvent::Token(text) => serde_json::json!({ "token": text }),
            TokenEvent::Error(message) => serde_json::json!({ "error": message }),
            TokenEvent::Done => serde_json::json!({ "done": true }),
        };
        if event.is_terminal() {
            self.terminated = true;
        }

        Some(Bytes::from(format!("data: {payload}\n\n")))
    }

    /// Returns `true` once a terminal frame has been emitted.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

/// Builds the streaming HTTP response an event stream rides on.
///
/// Caching is disabled and the advisory `Connection: keep-alive` header
/// matches what streaming clients expect; the transport itself still closes
/// when the frame channel ends.
pub fn event_stream_response(frames: mpsc::Receiver<Bytes>) -> Response {
    Response::stream(StatusCode::Ok, frames)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(frame: Bytes) -> String {
        String::from_utf8(frame.to_vec()).unwrap()
    }

    #[test]
    fn token_frame_shape() {
        let mut enc = SseEncoder::new();
        let frame = enc.encode(&TokenEvent::Token("Hello".into())).unwrap();
        assert_eq!(text(frame), "data: {\"token\":\"Hello\"}\n\n");
        assert!(!enc.is_terminated());
    }

    #[test]
    fn token_content_is_json_escaped() {
        let mut enc = SseEncoder::new();
        let frame = enc.encode(&TokenEvent::Token("a\"b\n".into())).unwrap();
        assert_eq!(text(frame), "data: {\"token\":\"a\\\"b\\n\"}\n\n");
    }

    #[test]
    fn done_frame_terminates() {
        let mut enc = SseEncoder::new();
        assert_eq!(text(enc.encode(&TokenEvent::Done).unwrap()), "data: {\"done\":true}\n\n");
        assert!(enc.is_terminated());
        assert!(enc.encode(&TokenEvent::Token("late".into())).is_none());
        assert!(enc.encode(&TokenEvent::Done).is_none());
    }

    #[test]
    fn error_frame_terminates() {
        let mut enc = SseEncoder::new();
        let frame = enc.encode(&TokenEvent::Error("backend failure: oom".into())).unwrap();
        assert_eq!(text(frame), "data: {\"error\":\"backend failure: oom\"}\n\n");
        assert!(enc.encode(&TokenEvent::Done).is_none());
    }

    #[test]
    fn response_headers_disable_caching() {
        let (_tx, rx) = mpsc::channel(1);
        let response = event_stream_response(rx);
        let (head, _) = response.into_wire();
        let s = String::from_utf8(head.to_vec()).unwrap();
        assert!(s.contains("Content-Type: text/event-stream\r\n"));
        assert!(s.contains("Cache-Control: no-cache\r\n"));
        assert!(s.contains("Connection: keep-alive\r\n"));
    }
}
