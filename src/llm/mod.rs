//! Chat-completion gateway core.
//!
//! This module owns the streaming pipeline: request validation, backend
//! routing by model identifier, the two backend adapters (embedded engine
//! and Ollama daemon), and the normalization of their output into a single
//! [`TokenEvent`] sequence.
//!
//! Failures are values end to end: adapters push `Result` fragments through
//! a channel and the [`gateway`] folds them into the event stream, so a
//! partial stream followed by an error frame is a well-defined outcome, not
//! an unwound stack.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod engine;
pub mod gateway;
#[cfg(feature = "llama")]
pub mod llama;
pub mod local;
pub mod ollama;
pub mod prompt;

pub use gateway::{EventStream, Gateway};
pub use local::LocalEngine;
pub use ollama::DaemonClient;

/// Identifier prefix that routes a request to the inference daemon.
pub const DAEMON_PREFIX: &str = "ollama:";

/// A chat message role.
///
/// Unknown roles deserialize into [`Role::Other`] instead of failing the
/// request; the prompt formatter drops such messages silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    #[serde(other)]
    Other,
}

/// One message of an ordered conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    512
}

fn default_top_p() -> f32 {
    0.9
}

/// A validated-on-entry chat completion request.
///
/// Sampling parameters default to the values the served frontend omits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

impl GenerationRequest {
    /// Checks the sampling parameters against their documented ranges.
    ///
    /// Runs before any backend is contacted; a violation is the one error
    /// the gateway reports without dispatching.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(GatewayError::Validation(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if !(1..=4096).contains(&self.max_tokens) {
            return Err(GatewayError::Validation(format!(
                "max_tokens must be within [1, 4096], got {}",
                self.max_tokens
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(GatewayError::Validation(format!(
                "top_p must be within [0, 1], got {}",
                self.top_p
            )));
        }
        Ok(())
    }

    /// Sampling parameters alone, as passed down to the adapters.
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        }
    }
}

/// Sampling knobs shared by both backends.
#[derive(Debug, Clone, Copy)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}

/// A model identifier resolved into its backend, parsed exactly once at
/// request entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelRef {
    /// `ollama:<name>` — served by the inference daemon under `<name>`.
    Daemon(String),
    /// `<category>/<filename>` — a GGUF file under the local model root.
    Local(String),
}

impl ModelRef {
    /// Resolves the routing convention for a raw identifier.
    pub fn parse(id: &str) -> Self {
        match id.strip_prefix(DAEMON_PREFIX) {
            Some(rest) => Self::Daemon(rest.to_owned()),
            None => Self::Local(id.to_owned()),
        }
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daemon(name) => write!(f, "{DAEMON_PREFIX}{name}"),
            Self::Local(id) => f.write_str(id),
        }
    }
}

/// One element of a completion stream.
///
/// `Done` or `Error` is always the last event of a stream, and each stream
/// carries at most one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    Token(String),
    Error(String),
    Done,
}

impl TokenEvent {
    /// Returns `true` for the two terminal events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Done)
    }
}

/// Failures surfaced by the gateway and its backends.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Bad sampling parameters, rejected before dispatch.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A local identifier that resolves to no file under the model root.
    #[error("model not found: {0}")]
    NotFound(String),

    /// Daemon unreachable or the native runtime is missing.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Runtime error during load or generation.
    #[error("backend failure: {0}")]
    BackendFailure(String),

    /// Daemon call exceeded its deadline before producing data.
    #[error("backend timed out after {0:?}")]
    Timeout(Duration),
}

/// A fragment of generated text, or the failure that ended the stream.
pub type Fragment = Result<String, GatewayError>;

/// Channel half adapters push fragments into.
///
/// A closed channel means the consumer went away; adapters treat a failed
/// send as a cancellation signal and abort generation.
pub type FragmentSender = mpsc::Sender<Fragment>;
