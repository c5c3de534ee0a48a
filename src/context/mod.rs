//! Per-request context handed to route handlers.
//!
//! Bundles the parsed request, the path parameters captured by the router,
//! and a handle to the process-wide [`AppState`] — the explicit, injectable
//! alternative to global registries.

use std::collections::HashMap;
use std::sync::Arc;

use crate::api::AppState;
use crate::http::Request;

/// Path parameters extracted from the matched route pattern.
#[derive(Default, Debug, Clone)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }
}

/// Everything a handler needs for one request.
pub struct Context {
    request: Request,
    params: PathParams,
    state: Arc<AppState>,
}

impl Context {
    pub fn new(request: Request, state: Arc<AppState>) -> Self {
        Self {
            request,
            params: PathParams::new(),
            state,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Installs the parameters captured by the matched route.
    pub fn set_params(&mut self, params: PathParams) {
        self.params = params;
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Deserializes the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }
}
