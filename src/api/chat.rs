//! `POST /api/v1/chat` — the streaming chat-completion endpoint.
//!
//! The response is always `200 OK` with an SSE body; once a request parses,
//! every failure travels in-band as an `error` frame. Only a body that is
//! not valid JSON at all gets a plain 400 — there is no request to stream
//! an answer for.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::context::Context;
use crate::llm::GenerationRequest;
use crate::realtime::{SseEncoder, event_stream_response};
use crate::{Response, StatusCode};

use super::error_response;

/// Frame channel capacity; matches the gateway's event channel so a slow
/// client stalls generation instead of buffering it.
const FRAME_CAPACITY: usize = 32;

pub async fn chat(ctx: Context) -> Response {
    let request: GenerationRequest = match ctx.json() {
        Ok(request) => request,
        Err(e) => {
            return error_response(
                StatusCode::BadRequest,
                "BAD_REQUEST",
                format!("invalid chat request body: {e}"),
            );
        }
    };

    let mut events = ctx.state().gateway.stream(request);
    let (frames_tx, frames_rx) = mpsc::channel::<Bytes>(FRAME_CAPACITY);

    tokio::spawn(async move {
        let mut encoder = SseEncoder::new();
        while let Some(event) = events.next().await {
            let Some(frame) = encoder.encode(&event) else {
                break;
            };
            if frames_tx.send(frame).await.is_err() {
                // Client disconnected; dropping `events` below propagates
                // the cancellation down to the backend call.
                break;
            }
            if encoder.is_terminated() {
                break;
            }
        }
    });

    event_stream_response(frames_rx)
}
