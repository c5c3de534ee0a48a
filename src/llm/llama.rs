//! llama.cpp-backed engine runtime (`llama` feature).
//!
//! Thin mapping from the [`EngineRuntime`] seam onto `llama-cpp-2`:
//! weights load once per cache entry, each completion gets a fresh context,
//! and the decode loop emits one piece per sampled token. Nothing here is
//! hardware-tested in CI; the adapter logic above this seam is covered with
//! scripted runtimes instead.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use tracing::info;

use super::SamplingParams;
use super::engine::{EngineError, EngineModel, EngineRuntime, LoadOptions, StepControl};

/// Offload everything the device can take; llama.cpp clamps to the model's
/// actual layer count.
const ALL_GPU_LAYERS: u32 = 1_000_000;

/// Engine runtime backed by an in-process llama.cpp.
pub struct LlamaRuntime {
    backend: Arc<LlamaBackend>,
}

impl LlamaRuntime {
    /// Initializes the llama.cpp backend for this process.
    pub fn try_new() -> Result<Self, EngineError> {
        let backend = LlamaBackend::init()
            .map_err(|e| EngineError::Unavailable(format!("llama backend init failed: {e}")))?;
        Ok(Self {
            backend: Arc::new(backend),
        })
    }
}

impl EngineRuntime for LlamaRuntime {
    fn load(&self, path: &Path, opts: LoadOptions) -> Result<Box<dyn EngineModel>, EngineError> {
        let mut params = LlamaModelParams::default();
        if opts.use_gpu {
            params = params.with_n_gpu_layers(ALL_GPU_LAYERS);
        }

        let model = LlamaModel::load_from_file(&self.backend, path, &params)
            .map_err(|e| EngineError::Init(e.to_string()))?;
        info!(path = %path.display(), gpu = opts.use_gpu, "model weights loaded");

        Ok(Box::new(LoadedLlama {
            backend: Arc::clone(&self.backend),
            model,
            context_size: opts.context_size,
        }))
    }
}

struct LoadedLlama {
    backend: Arc<LlamaBackend>,
    model: LlamaModel,
    context_size: u32,
}

impl LoadedLlama {
    fn build_sampler(params: &SamplingParams) -> LlamaSampler {
        if params.temperature <= 0.0 {
            return LlamaSampler::greedy();
        }
        LlamaSampler::chain_simple([
            LlamaSampler::top_p(params.top_p, 1),
            LlamaSampler::temp(params.temperature),
            LlamaSampler::dist(0),
        ])
    }
}

impl EngineModel for LoadedLlama {
    fn complete(
        &self,
        prompt: &str,
        params: &SamplingParams,
        emit: &mut dyn FnMut(&str) -> StepControl,
    ) -> Result<(), EngineError> {
        let tokens = self
            .model
            .str_to_token(prompt, AddBos::Always)
            .map_err(|e| EngineError::Generation(format!("tokenization failed: {e}")))?;

        let ctx_params =
            LlamaContextParams::default().with_n_ctx(NonZeroU32::new(self.context_size));
        let mut ctx = self
            .model
            .new_context(&self.backend, ctx_params)
            .map_err(|e| EngineError::Generation(format!("context creation failed: {e}")))?;

        // Prefill the prompt in batch-sized chunks.
        let n_batch = ctx.n_batch() as usize;
        for chunk in tokens.chunks(n_batch) {
            let mut batch = LlamaBatch::get_one(chunk)
                .map_err(|e| EngineError::Generation(format!("batch creation failed: {e}")))?;
            ctx.decode(&mut batch)
                .map_err(|e| EngineError::Generation(format!("prefill decode failed: {e}")))?;
        }

        let mut sampler = Self::build_sampler(params);
        for _ in 0..params.max_tokens {
            let token = sampler.sample(&ctx, -1);
            sampler.accept(token);

            if self.model.is_eog_token(token) {
                break;
            }

            let piece = self
                .model
                .token_to_str(token, Special::Plaintext)
                .map_err(|e| EngineError::Generation(format!("token decode failed: {e}")))?;
            if !piece.is_empty() && emit(&piece) == StepControl::Stop {
                return Ok(());
            }

            let step = [token];
            let mut batch = LlamaBatch::get_one(&step)
                .map_err(|e| EngineError::Generation(format!("batch creation failed: {e}")))?;
            ctx.decode(&mut batch)
                .map_err(|e| EngineError::Generation(format!("decode failed: {e}")))?;
        }

        Ok(())
    }
}
