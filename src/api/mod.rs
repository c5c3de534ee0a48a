//! HTTP surface — application state and route registration.
//!
//! Handlers live in the submodules; this module wires them to paths and
//! owns [`AppState`], the explicit process-wide state injected into every
//! request instead of living in globals.

use std::sync::Arc;

use crate::cache::ModelCache;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::context::Context;
use crate::llm::engine::EngineRuntime;
use crate::llm::{DaemonClient, Gateway, LocalEngine};
use crate::router::Router;
use crate::store::ConversationStore;
use crate::{Response, StatusCode};

pub mod chat;
pub mod conversations;
pub mod models;

/// Everything the serving process owns, shared across all requests.
pub struct AppState {
    pub config: Config,
    pub gateway: Gateway,
    pub local: Arc<LocalEngine>,
    pub daemon: Arc<DaemonClient>,
    pub catalog: Catalog,
    pub cache: Arc<ModelCache>,
    pub conversations: ConversationStore,
}

impl AppState {
    /// Builds the state for the given configuration and engine runtime.
    pub fn new(config: Config, runtime: Arc<dyn EngineRuntime>) -> Self {
        let cache = Arc::new(ModelCache::new());
        let catalog = Catalog::new(&config.models_dir);
        let local = Arc::new(LocalEngine::new(
            runtime,
            Arc::clone(&cache),
            catalog.clone(),
        ));
        let daemon = Arc::new(DaemonClient::new(config.ollama_base_url.clone()));
        let gateway = Gateway::new(Arc::clone(&local), Arc::clone(&daemon));

        Self {
            config,
            gateway,
            local,
            daemon,
            catalog,
            cache,
            conversations: ConversationStore::new(),
        }
    }

    /// State over an empty model root, a disabled engine runtime, and a
    /// daemon address nothing listens on.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        let config = Config {
            models_dir: std::env::temp_dir().join("tokengate-tests-empty"),
            ollama_base_url: "http://127.0.0.1:1".to_owned(),
            ..Config::default()
        };
        Self::new(config, Arc::new(crate::llm::engine::DisabledRuntime))
    }
}

/// Registers every route of the service.
pub fn build_router() -> Router {
    let mut router = Router::new();

    router.get("/", root);
    router.get("/health", health);

    router.post("/api/v1/chat", chat::chat);

    router.get("/api/v1/models", models::list_models);
    router.post("/api/v1/models/:category/:file/load", models::load_model);
    router.post("/api/v1/models/:category/:file/unload", models::unload_model);
    // Single-segment ids (daemon-prefixed or malformed) get a JSON error
    // instead of a bare 404 from the router.
    router.post("/api/v1/models/:id/load", models::manage_flat_id);
    router.post("/api/v1/models/:id/unload", models::manage_flat_id);

    router.get("/api/v1/conversations", conversations::list);
    router.post("/api/v1/conversations", conversations::create);
    router.get("/api/v1/conversations/:id", conversations::get);
    router.delete("/api/v1/conversations/:id", conversations::delete);

    router
}

/// Standard JSON error body, shared by all non-streaming endpoints.
pub(crate) fn error_response(
    status: StatusCode,
    code: &str,
    message: impl Into<String>,
) -> Response {
    Response::json_with_status(
        status,
        &serde_json::json!({
            "error": { "code": code, "message": message.into() }
        }),
    )
}

async fn root(_ctx: Context) -> Response {
    Response::json(&serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

async fn health(_ctx: Context) -> Response {
    Response::json(&serde_json::json!({ "status": "healthy" }))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::http::Request;

    /// Builds a request context against a fresh test state.
    pub fn context(method: &str, path: &str, body: Option<&str>) -> Context {
        context_with_state(method, path, body, Arc::new(AppState::for_tests()))
    }

    pub fn context_with_state(
        method: &str,
        path: &str,
        body: Option<&str>,
        state: Arc<AppState>,
    ) -> Context {
        let body = body.unwrap_or("");
        let raw = format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        Context::new(req, state)
    }

    /// Serialized head of a buffered response, plus its parsed JSON body.
    pub fn json_body(res: Response) -> serde_json::Value {
        let (wire, _) = res.into_wire();
        let text = String::from_utf8(wire.to_vec()).unwrap();
        let body = text.split("\r\n\r\n").nth(1).unwrap();
        serde_json::from_str(body).unwrap()
    }
}
