//! Trait seam between the local adapter and the native model runtime.
//!
//! The adapter's residency, retry, and streaming logic is runtime-agnostic;
//! everything that actually touches llama.cpp lives behind [`EngineRuntime`]
//! and only compiles with the `llama` cargo feature. A build without the
//! feature still routes, validates, and serves the daemon backend — local
//! loads report the runtime as unavailable.

use std::path::Path;

use thiserror::Error;

use super::SamplingParams;

/// Failures at the runtime boundary.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// No native runtime compiled into this binary.
    #[error("native runtime unavailable: {0}")]
    Unavailable(String),

    /// Model weights could not be initialized.
    #[error("model initialization failed: {0}")]
    Init(String),

    /// The decode loop failed mid-generation.
    #[error("generation failed: {0}")]
    Generation(String),
}

/// Options for a single load attempt.
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// Offload layers to an accelerator when true; CPU-only when false.
    pub use_gpu: bool,
    /// Context window size in tokens.
    pub context_size: u32,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            use_gpu: true,
            context_size: 2048,
        }
    }
}

/// Decision returned by the fragment sink after each generated piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepControl {
    Continue,
    /// Stop decoding — the consumer is gone or has seen enough.
    Stop,
}

/// A loadable model runtime.
///
/// `load` is blocking and is always called from a `spawn_blocking` thread.
pub trait EngineRuntime: Send + Sync + 'static {
    fn load(&self, path: &Path, opts: LoadOptions) -> Result<Box<dyn EngineModel>, EngineError>;
}

/// A resident model able to run completions.
pub trait EngineModel: Send + Sync {
    /// Runs one completion over `prompt`, invoking `emit` once per generated
    /// piece of text, in generation order. Blocking; honors
    /// [`StepControl::Stop`] by ending the decode loop early.
    fn complete(
        &self,
        prompt: &str,
        params: &SamplingParams,
        emit: &mut dyn FnMut(&str) -> StepControl,
    ) -> Result<(), EngineError>;
}

/// Placeholder runtime for builds without the `llama` feature.
///
/// Every load fails with [`EngineError::Unavailable`], which the adapter
/// surfaces as a `BackendUnavailable` error frame.
pub struct DisabledRuntime;

impl EngineRuntime for DisabledRuntime {
    fn load(&self, _path: &Path, _opts: LoadOptions) -> Result<Box<dyn EngineModel>, EngineError> {
        Err(EngineError::Unavailable(
            "tokengate was built without the `llama` feature".to_owned(),
        ))
    }
}

/// The runtime this binary was compiled with.
pub fn default_runtime() -> std::sync::Arc<dyn EngineRuntime> {
    #[cfg(feature = "llama")]
    {
        match super::llama::LlamaRuntime::try_new() {
            Ok(runtime) => std::sync::Arc::new(runtime),
            Err(e) => {
                tracing::warn!(error = %e, "llama runtime unavailable — local models disabled");
                std::sync::Arc::new(DisabledRuntime)
            }
        }
    }
    #[cfg(not(feature = "llama"))]
    {
        std::sync::Arc::new(DisabledRuntime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_runtime_reports_unavailable() {
        let err = DisabledRuntime
            .load(Path::new("chat/m.gguf"), LoadOptions::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }
}
