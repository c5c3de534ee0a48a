//! Residency cache for locally loaded models.
//!
//! Maps model identifiers to their loaded engine resources for the lifetime
//! of the serving process. There is no eviction: a model stays resident
//! until an explicit unload. The cache is owned by the process state and
//! injected wherever it is needed — it is not a global.
//!
//! Concurrency contract: `get`/`insert`/`remove`/`resident_ids` are cheap
//! and lock-free at the await level. Long-running load work must happen
//! while holding the per-identifier guard from [`ModelCache::entry_guard`],
//! which serializes concurrent loads of the same identifier as well as
//! load-versus-unload, so neither duplicate allocation nor an undefined
//! race is possible.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::Mutex as AsyncMutex;

use crate::llm::engine::EngineModel;

/// A model resident in process memory, ready to generate without a reload.
pub struct ResidentModel {
    /// The identifier the model was loaded under.
    pub id: String,
    /// Resolved file path under the model root.
    pub path: PathBuf,
    /// The loaded engine resource.
    pub model: Box<dyn EngineModel>,
}

impl std::fmt::Debug for ResidentModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResidentModel")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Process-wide registry of resident local models.
#[derive(Default)]
pub struct ModelCache {
    resident: RwLock<HashMap<String, Arc<ResidentModel>>>,
    // One async mutex per identifier; entries are created on demand and
    // never removed, so a guard handed out stays valid across the id's
    // whole load/unload history.
    guards: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the resident model for `id`, if any.
    pub fn get(&self, id: &str) -> Option<Arc<ResidentModel>> {
        self.resident
            .read()
            .expect("model cache lock poisoned")
            .get(id)
            .cloned()
    }

    /// Inserts a freshly loaded model. Call only while holding the
    /// identifier's [`entry_guard`](Self::entry_guard).
    pub fn insert(&self, handle: Arc<ResidentModel>) {
        self.resident
            .write()
            .expect("model cache lock poisoned")
            .insert(handle.id.clone(), handle);
    }

    /// Removes `id` from residency, releasing its resources once the last
    /// in-flight generation drops its `Arc`. Returns whether anything was
    /// removed.
    pub fn remove(&self, id: &str) -> bool {
        self.resident
            .write()
            .expect("model cache lock poisoned")
            .remove(id)
            .is_some()
    }

    /// Identifiers of all currently resident models, in no particular order.
    pub fn resident_ids(&self) -> Vec<String> {
        self.resident
            .read()
            .expect("model cache lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// The per-identifier lock serializing load and unload for `id`.
    pub fn entry_guard(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut guards = self.guards.lock().expect("model cache lock poisoned");
        guards
            .entry(id.to_owned())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::SamplingParams;
    use crate::llm::engine::{EngineError, StepControl};

    struct NoopModel;

    impl EngineModel for NoopModel {
        fn complete(
            &self,
            _prompt: &str,
            _params: &SamplingParams,
            _emit: &mut dyn FnMut(&str) -> StepControl,
        ) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn handle(id: &str) -> Arc<ResidentModel> {
        Arc::new(ResidentModel {
            id: id.to_owned(),
            path: PathBuf::from(format!("models/{id}")),
            model: Box::new(NoopModel),
        })
    }

    #[test]
    fn insert_then_get() {
        let cache = ModelCache::new();
        assert!(cache.get("chat/a.gguf").is_none());
        cache.insert(handle("chat/a.gguf"));
        assert!(cache.get("chat/a.gguf").is_some());
    }

    #[test]
    fn remove_reports_whether_resident() {
        let cache = ModelCache::new();
        cache.insert(handle("chat/a.gguf"));
        assert!(cache.remove("chat/a.gguf"));
        assert!(!cache.remove("chat/a.gguf"));
        assert!(cache.get("chat/a.gguf").is_none());
    }

    #[test]
    fn unloading_missing_id_has_no_side_effect() {
        let cache = ModelCache::new();
        cache.insert(handle("chat/a.gguf"));
        assert!(!cache.remove("chat/b.gguf"));
        assert_eq!(cache.resident_ids(), vec!["chat/a.gguf".to_owned()]);
    }

    #[test]
    fn resident_ids_tracks_inserts_and_removes() {
        let cache = ModelCache::new();
        cache.insert(handle("chat/a.gguf"));
        cache.insert(handle("code/b.gguf"));
        let mut ids = cache.resident_ids();
        ids.sort();
        assert_eq!(ids, vec!["chat/a.gguf", "code/b.gguf"]);
        cache.remove("chat/a.gguf");
        assert_eq!(cache.resident_ids(), vec!["code/b.gguf".to_owned()]);
    }

    #[test]
    fn entry_guard_is_shared_per_identifier() {
        let cache = ModelCache::new();
        let a = cache.entry_guard("chat/a.gguf");
        let b = cache.entry_guard("chat/a.gguf");
        assert!(Arc::ptr_eq(&a, &b));
        let c = cache.entry_guard("chat/c.gguf");
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
