//! Local backend adapter — owns model residency and drives the embedded
//! runtime.
//!
//! Loads are memoized through the [`ModelCache`]: the first request for an
//! identifier pays the load, everyone after shares the resident handle.
//! Initialization is attempted GPU-accelerated first; on failure it is
//! retried exactly once CPU-only. That retry is the only automatic retry in
//! the system — a second failure is final for the request.

use std::sync::Arc;

use tokio::task;
use tracing::{info, warn};

use crate::cache::{ModelCache, ResidentModel};
use crate::catalog::Catalog;

use super::engine::{EngineError, EngineRuntime, LoadOptions, StepControl};
use super::prompt::format_transcript;
use super::{ChatMessage, FragmentSender, GatewayError, SamplingParams};

/// The embedded-engine backend.
pub struct LocalEngine {
    runtime: Arc<dyn EngineRuntime>,
    cache: Arc<ModelCache>,
    catalog: Catalog,
}

impl LocalEngine {
    pub fn new(runtime: Arc<dyn EngineRuntime>, cache: Arc<ModelCache>, catalog: Catalog) -> Self {
        Self {
            runtime,
            cache,
            catalog,
        }
    }

    /// The residency cache this adapter loads into.
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Returns the resident handle for `id`, loading it first if needed.
    ///
    /// Concurrent calls for the same identifier collapse onto one load: the
    /// per-identifier guard serializes them and the second caller finds the
    /// freshly inserted handle instead of allocating again.
    pub async fn load(&self, id: &str) -> Result<Arc<ResidentModel>, GatewayError> {
        if let Some(handle) = self.cache.get(id) {
            return Ok(handle);
        }

        let guard = self.cache.entry_guard(id);
        let _locked = guard.lock().await;

        // A racing load may have finished while we waited for the guard.
        if let Some(handle) = self.cache.get(id) {
            return Ok(handle);
        }

        let path = self.catalog.resolve(id)?;

        let runtime = Arc::clone(&self.runtime);
        let load_path = path.clone();
        let model_id = id.to_owned();
        let model = task::spawn_blocking(move || {
            match runtime.load(&load_path, LoadOptions::default()) {
                Ok(model) => Ok(model),
                Err(EngineError::Unavailable(msg)) => Err(GatewayError::BackendUnavailable(msg)),
                Err(first) => {
                    warn!(
                        model = %model_id,
                        error = %first,
                        "accelerated initialization failed — retrying CPU-only"
                    );
                    let cpu_only = LoadOptions {
                        use_gpu: false,
                        ..LoadOptions::default()
                    };
                    runtime.load(&load_path, cpu_only).map_err(|second| match second {
                        EngineError::Unavailable(msg) => GatewayError::BackendUnavailable(msg),
                        other => GatewayError::BackendFailure(other.to_string()),
                    })
                }
            }
        })
        .await
        .map_err(|e| GatewayError::BackendFailure(format!("model load task failed: {e}")))??;

        let handle = Arc::new(ResidentModel {
            id: id.to_owned(),
            path,
            model,
        });
        self.cache.insert(Arc::clone(&handle));
        info!(model = %id, "model loaded");
        Ok(handle)
    }

    /// Removes `id` from residency. Returns whether anything was removed.
    ///
    /// Takes the same per-identifier guard as [`load`](Self::load), so an
    /// unload never interleaves with an in-progress load of the same id.
    pub async fn unload(&self, id: &str) -> bool {
        let guard = self.cache.entry_guard(id);
        let _locked = guard.lock().await;
        let removed = self.cache.remove(id);
        if removed {
            info!(model = %id, "model unloaded");
        }
        removed
    }

    /// Streams one completion for `id` into `tx`, one fragment per generated
    /// piece of text.
    ///
    /// The sequence is finite (bounded by the engine honoring `max_tokens`
    /// and end-of-generation) and not restartable. The generation loop runs
    /// on a blocking thread; a closed channel stops it at the next step.
    pub async fn stream_completion(
        &self,
        id: &str,
        messages: &[ChatMessage],
        params: SamplingParams,
        tx: FragmentSender,
    ) {
        let handle = match self.load(id).await {
            Ok(handle) => handle,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        let prompt = format_transcript(messages);
        let fragments = tx.clone();
        let result = task::spawn_blocking(move || {
            handle.model.complete(&prompt, &params, &mut |piece| {
                if fragments.blocking_send(Ok(piece.to_owned())).is_err() {
                    // Consumer dropped the stream — abort generation.
                    StepControl::Stop
                } else {
                    StepControl::Continue
                }
            })
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = tx
                    .send(Err(GatewayError::BackendFailure(e.to_string())))
                    .await;
            }
            Err(e) => {
                let _ = tx
                    .send(Err(GatewayError::BackendFailure(format!(
                        "generation task failed: {e}"
                    ))))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use crate::llm::engine::EngineModel;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Scripted runtime: fails a configurable number of load attempts, then
    /// hands out models that emit a fixed fragment sequence.
    struct ScriptedRuntime {
        fail_first: usize,
        attempts: Mutex<Vec<LoadOptions>>,
        loads: AtomicUsize,
        pieces: Vec<&'static str>,
        generation_error: Option<&'static str>,
    }

    impl ScriptedRuntime {
        fn new(pieces: Vec<&'static str>) -> Self {
            Self {
                fail_first: 0,
                attempts: Mutex::new(Vec::new()),
                loads: AtomicUsize::new(0),
                pieces,
                generation_error: None,
            }
        }

        fn failing_first(mut self, n: usize) -> Self {
            self.fail_first = n;
            self
        }

        fn with_generation_error(mut self, msg: &'static str) -> Self {
            self.generation_error = Some(msg);
            self
        }

        fn attempt_log(&self) -> Vec<bool> {
            self.attempts.lock().unwrap().iter().map(|o| o.use_gpu).collect()
        }

        fn successful_loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    struct ScriptedModel {
        pieces: Vec<&'static str>,
        generation_error: Option<&'static str>,
    }

    impl EngineModel for ScriptedModel {
        fn complete(
            &self,
            _prompt: &str,
            params: &SamplingParams,
            emit: &mut dyn FnMut(&str) -> StepControl,
        ) -> Result<(), EngineError> {
            for piece in self.pieces.iter().take(params.max_tokens as usize) {
                if emit(piece) == StepControl::Stop {
                    return Ok(());
                }
            }
            match self.generation_error {
                Some(msg) => Err(EngineError::Generation(msg.to_owned())),
                None => Ok(()),
            }
        }
    }

    impl EngineRuntime for ScriptedRuntime {
        fn load(&self, _path: &Path, opts: LoadOptions) -> Result<Box<dyn EngineModel>, EngineError> {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                attempts.push(opts);
                attempts.len()
            };
            // Slow enough that racing loads overlap if the guard is broken.
            std::thread::sleep(std::time::Duration::from_millis(20));
            if attempt <= self.fail_first {
                return Err(EngineError::Init("device allocation failed".into()));
            }
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedModel {
                pieces: self.pieces.clone(),
                generation_error: self.generation_error,
            }))
        }
    }

    fn scratch_catalog(name: &str, files: &[&str]) -> (Catalog, PathBuf) {
        let root = std::env::temp_dir().join(format!("tokengate-local-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        for file in files {
            let path = root.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"gguf").unwrap();
        }
        std::fs::create_dir_all(&root).unwrap();
        (Catalog::new(&root), root)
    }

    fn engine_with(runtime: Arc<ScriptedRuntime>, catalog: Catalog) -> LocalEngine {
        LocalEngine::new(runtime, Arc::new(ModelCache::new()), catalog)
    }

    fn params() -> SamplingParams {
        SamplingParams {
            temperature: 0.7,
            max_tokens: 512,
            top_p: 0.9,
        }
    }

    #[tokio::test]
    async fn load_missing_file_is_not_found_without_runtime_call() {
        let runtime = Arc::new(ScriptedRuntime::new(vec![]));
        let (catalog, root) = scratch_catalog("missing", &[]);
        let engine = engine_with(Arc::clone(&runtime), catalog);

        let err = engine.load("chat/absent.gguf").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
        assert!(runtime.attempt_log().is_empty());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn gpu_failure_retries_cpu_once() {
        let runtime = Arc::new(ScriptedRuntime::new(vec!["ok"]).failing_first(1));
        let (catalog, root) = scratch_catalog("retry", &["chat/m.gguf"]);
        let engine = engine_with(Arc::clone(&runtime), catalog);

        engine.load("chat/m.gguf").await.unwrap();
        assert_eq!(runtime.attempt_log(), vec![true, false]);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn second_failure_is_fatal_with_no_third_attempt() {
        let runtime = Arc::new(ScriptedRuntime::new(vec![]).failing_first(2));
        let (catalog, root) = scratch_catalog("fatal", &["chat/m.gguf"]);
        let engine = engine_with(Arc::clone(&runtime), catalog);

        let err = engine.load("chat/m.gguf").await.unwrap_err();
        assert!(matches!(err, GatewayError::BackendFailure(_)));
        assert_eq!(runtime.attempt_log(), vec![true, false]);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_allocation() {
        let runtime = Arc::new(ScriptedRuntime::new(vec!["ok"]));
        let (catalog, root) = scratch_catalog("concurrent", &["chat/m.gguf"]);
        let engine = Arc::new(engine_with(Arc::clone(&runtime), catalog));

        let a = Arc::clone(&engine);
        let b = Arc::clone(&engine);
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.load("chat/m.gguf").await }),
            tokio::spawn(async move { b.load("chat/m.gguf").await }),
        );
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();
        assert_eq!(runtime.successful_loads(), 1);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn load_is_memoized_until_unload() {
        let runtime = Arc::new(ScriptedRuntime::new(vec!["ok"]));
        let (catalog, root) = scratch_catalog("memo", &["chat/m.gguf"]);
        let engine = engine_with(Arc::clone(&runtime), catalog);

        engine.load("chat/m.gguf").await.unwrap();
        engine.load("chat/m.gguf").await.unwrap();
        assert_eq!(runtime.successful_loads(), 1);

        assert!(engine.unload("chat/m.gguf").await);
        assert!(!engine.unload("chat/m.gguf").await);

        engine.load("chat/m.gguf").await.unwrap();
        assert_eq!(runtime.successful_loads(), 2);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn stream_completion_emits_fragments_in_order() {
        let runtime = Arc::new(ScriptedRuntime::new(vec!["Hel", "lo"]));
        let (catalog, root) = scratch_catalog("stream", &["chat/m.gguf"]);
        let engine = engine_with(runtime, catalog);

        let (tx, mut rx) = mpsc::channel(8);
        let messages = vec![ChatMessage::new(Role::User, "hi")];
        engine
            .stream_completion("chat/m.gguf", &messages, params(), tx)
            .await;

        assert_eq!(rx.recv().await.unwrap().unwrap(), "Hel");
        assert_eq!(rx.recv().await.unwrap().unwrap(), "lo");
        assert!(rx.recv().await.is_none());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn generation_error_is_the_last_fragment() {
        let runtime =
            Arc::new(ScriptedRuntime::new(vec!["partial"]).with_generation_error("kv cache full"));
        let (catalog, root) = scratch_catalog("generr", &["chat/m.gguf"]);
        let engine = engine_with(runtime, catalog);

        let (tx, mut rx) = mpsc::channel(8);
        engine
            .stream_completion("chat/m.gguf", &[], params(), tx)
            .await;

        assert_eq!(rx.recv().await.unwrap().unwrap(), "partial");
        let err = rx.recv().await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::BackendFailure(_)));
        assert!(rx.recv().await.is_none());

        let _ = std::fs::remove_dir_all(&root);
    }
}
