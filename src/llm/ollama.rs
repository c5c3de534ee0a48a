//! Remote backend adapter — a stateless HTTP client for an Ollama-compatible
//! inference daemon.
//!
//! The daemon owns its model lifecycle; this adapter only probes liveness,
//! lists models, and consumes the newline-delimited JSON chat stream. A
//! frame whose `done` flag is set ends the sequence; a malformed frame is
//! skipped, not fatal.

use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ChatMessage, FragmentSender, GatewayError, SamplingParams};

/// Deadline for the liveness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for the chat endpoint to start responding. Generation itself is
/// not bounded — slow hardware takes as long as it takes once data flows.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// A model advertised by the daemon's listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<DaemonModel>,
}

#[derive(Serialize)]
struct ChatPayload<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// Accumulates response-body chunks and yields complete NDJSON lines.
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_owned())
    }
}

/// Client for the inference daemon's HTTP API.
pub struct DaemonClient {
    base: String,
    http: reqwest::Client,
}

impl DaemonClient {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_owned();
        Self {
            base,
            http: reqwest::Client::new(),
        }
    }

    /// Probes the daemon's model-listing endpoint. True on any 2xx.
    pub async fn available(&self) -> bool {
        let url = format!("{}/api/tags", self.base);
        match tokio::time::timeout(PROBE_TIMEOUT, self.http.get(&url).send()).await {
            Ok(Ok(res)) => res.status().is_success(),
            Ok(Err(e)) => {
                debug!(error = %e, "daemon probe failed");
                false
            }
            Err(_) => {
                debug!("daemon probe timed out");
                false
            }
        }
    }

    /// Lists the models the daemon currently serves.
    pub async fn list_models(&self) -> Result<Vec<DaemonModel>, GatewayError> {
        let url = format!("{}/api/tags", self.base);
        let res = tokio::time::timeout(PROBE_TIMEOUT, self.http.get(&url).send())
            .await
            .map_err(|_| GatewayError::Timeout(PROBE_TIMEOUT))?
            .map_err(|e| GatewayError::BackendUnavailable(e.to_string()))?;
        if !res.status().is_success() {
            return Err(GatewayError::BackendUnavailable(format!(
                "daemon returned {}",
                res.status()
            )));
        }
        let body: TagsResponse = res
            .json()
            .await
            .map_err(|e| GatewayError::BackendFailure(e.to_string()))?;
        Ok(body.models)
    }

    /// Streams one chat completion for `model` into `tx`.
    ///
    /// Consumes the daemon's NDJSON response frame by frame: each frame's
    /// `message.content` becomes one fragment; the frame with `done: true`
    /// ends the sequence and nothing past it is read. The probe failing, a
    /// non-success status, or no response before the deadline each produce
    /// a single error fragment.
    pub async fn stream_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        params: SamplingParams,
        tx: FragmentSender,
    ) {
        if !self.available().await {
            let _ = tx
                .send(Err(GatewayError::BackendUnavailable(format!(
                    "daemon unreachable at {}",
                    self.base
                ))))
                .await;
            return;
        }

        let url = format!("{}/api/chat", self.base);
        let payload = ChatPayload {
            model,
            messages,
            stream: true,
            options: ChatOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
                top_p: params.top_p,
            },
        };

        let res = match tokio::time::timeout(
            RESPONSE_TIMEOUT,
            self.http.post(&url).json(&payload).send(),
        )
        .await
        {
            Ok(Ok(res)) => res,
            Ok(Err(e)) => {
                let _ = tx
                    .send(Err(GatewayError::BackendUnavailable(e.to_string())))
                    .await;
                return;
            }
            Err(_) => {
                let _ = tx.send(Err(GatewayError::Timeout(RESPONSE_TIMEOUT))).await;
                return;
            }
        };

        if !res.status().is_success() {
            let _ = tx
                .send(Err(GatewayError::BackendUnavailable(format!(
                    "daemon request failed with {}",
                    res.status()
                ))))
                .await;
            return;
        }

        let mut body = res.bytes_stream();
        let mut lines = LineBuffer::new();

        loop {
            while let Some(line) = lines.next_line() {
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<ChatChunk>(&line) {
                    Ok(chunk) => {
                        if chunk.done {
                            debug!(model, "daemon stream complete");
                            return;
                        }
                        let content = chunk.message.map(|m| m.content).unwrap_or_default();
                        if !content.is_empty() && tx.send(Ok(content)).await.is_err() {
                            // Consumer gone — stop reading the body.
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "skipping malformed daemon frame");
                    }
                }
            }

            match body.next().await {
                Some(Ok(bytes)) => lines.push(&bytes),
                Some(Err(e)) => {
                    let _ = tx
                        .send(Err(GatewayError::BackendFailure(format!(
                            "daemon stream error: {e}"
                        ))))
                        .await;
                    return;
                }
                // Body ended without a done frame; the gateway appends the
                // terminal event.
                None => return,
            }
        }
    }
}
