//! HTTP/1.1 response builder with buffered and streaming bodies.
//!
//! Most endpoints answer with a fully buffered body serialized in one write.
//! The chat endpoint instead hands the connection a [`Body::Stream`]: a
//! channel of pre-encoded frames written to the socket as they arrive, so
//! tokens reach the client while generation is still running.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use tokio::sync::mpsc;

use super::{Headers, StatusCode};

/// Response body: either fully buffered, or a live channel of frames.
#[derive(Debug)]
pub enum Body {
    Full(Vec<u8>),
    /// Frames are written to the socket in arrival order and flushed
    /// individually. Dropping the connection drops the receiver, which the
    /// producing side observes as its send failing.
    Stream(mpsc::Receiver<Bytes>),
}

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use tokengate::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
/// assert_eq!(response.status(), StatusCode::Ok);
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::Full(Vec::new()),
            keep_alive: true,
        }
    }

    /// Creates a `200 OK` response with a JSON body.
    pub fn json(value: &impl Serialize) -> Self {
        Self::json_with_status(StatusCode::Ok, value)
    }

    /// Creates a response with the given status and a JSON body.
    pub fn json_with_status(status: StatusCode, value: &impl Serialize) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => Self::new(status)
                .header("Content-Type", "application/json")
                .body_bytes(bytes),
            Err(e) => Self::new(StatusCode::InternalServerError)
                .body(format!("response serialization failed: {e}")),
        }
    }

    /// Creates a streaming response fed by `frames`.
    ///
    /// No `Content-Length` is written; the body is delimited by connection
    /// close, so streaming responses never keep the connection alive at the
    /// transport level regardless of any advisory `Connection` header.
    pub fn stream(status: StatusCode, frames: mpsc::Receiver<Bytes>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::Stream(frames),
            keep_alive: false,
        }
    }

    /// Appends a response header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place. Intended for middleware pipelines that
    /// decorate a downstream `Response` without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Body::Full(body.into().into_bytes());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Body::Full(body.into());
        self
    }

    /// Controls the `Connection` header on buffered responses.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns `true` if this response carries a streaming body.
    pub fn is_stream(&self) -> bool {
        matches!(self.body, Body::Stream(_))
    }

    /// Splits the response into its serialized head (plus buffered body, if
    /// any) and the frame receiver for a streaming body.
    ///
    /// For [`Body::Full`] the returned buffer is the complete wire image:
    /// status line, headers, `Content-Length`, and body. For
    /// [`Body::Stream`] the buffer ends at the header/body separator and the
    /// receiver yields the body frames.
    pub fn into_wire(mut self) -> (BytesMut, Option<mpsc::Receiver<Bytes>>) {
        let mut buf = BytesMut::with_capacity(256 + self.headers.len() * 64);

        match self.body {
            Body::Full(body) => {
                if !body.is_empty() && !self.headers.contains("content-type") {
                    self.headers
                        .insert("Content-Type", "text/plain; charset=utf-8");
                }
                let connection = if self.keep_alive { "keep-alive" } else { "close" };
                self.headers.insert("Connection", connection);

                write_head(&mut buf, self.status, &self.headers);
                buf.put(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
                if !body.is_empty() {
                    buf.put(body.as_slice());
                }
                (buf, None)
            }
            Body::Stream(rx) => {
                write_head(&mut buf, self.status, &self.headers);
                buf.put(&b"\r\n"[..]);
                (buf, Some(rx))
            }
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

fn write_head(buf: &mut BytesMut, status: StatusCode, headers: &Headers) {
    buf.put(format!("HTTP/1.1 {} {}\r\n", status.as_u16(), status.canonical_reason()).as_bytes());
    for (name, value) in headers.iter() {
        buf.put(format!("{name}: {value}\r\n").as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn simple_ok_response() {
        let (head, rx) = Response::new(StatusCode::Ok).body("Hello").into_wire();
        assert!(rx.is_none());
        let s = to_string(head);
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn json_sets_content_type() {
        let value = serde_json::json!({"status": "healthy"});
        let (head, _) = Response::json(&value).into_wire();
        let s = to_string(head);
        assert!(s.contains("Content-Type: application/json\r\n"));
        assert!(s.contains(r#"{"status":"healthy"}"#));
    }

    #[test]
    fn connection_close() {
        let (head, _) = Response::new(StatusCode::Ok)
            .keep_alive(false)
            .into_wire();
        assert!(to_string(head).contains("Connection: close\r\n"));
    }

    #[test]
    fn stream_head_has_no_content_length() {
        let (_tx, rx) = mpsc::channel(1);
        let resp = Response::stream(StatusCode::Ok, rx)
            .header("Content-Type", "text/event-stream");
        assert!(resp.is_stream());
        let (head, rx) = resp.into_wire();
        assert!(rx.is_some());
        let s = to_string(head);
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Type: text/event-stream\r\n"));
        assert!(!s.contains("Content-Length"));
        assert!(s.ends_with("\r\n\r\n"));
    }
}
