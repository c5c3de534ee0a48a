//! Process configuration read from the environment.
//!
//! Every knob has a default suitable for local development; nothing here
//! parses model identifiers or touches the catalog — those conventions live
//! in [`crate::llm`] and [`crate::catalog`].

use std::env;
use std::path::PathBuf;

/// Runtime configuration for the serving process.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address the HTTP server binds to.
    pub bind_addr: String,
    /// Root directory holding local GGUF models (`<category>/<file>.gguf`).
    pub models_dir: PathBuf,
    /// Base URL of the Ollama-compatible inference daemon.
    pub ollama_base_url: String,
    /// Frontend origin allowed by CORS, in addition to the dev default.
    pub frontend_url: String,
}

impl Config {
    /// Builds a `Config` from environment variables, falling back to
    /// development defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".to_owned()),
            models_dir: env::var("MODELS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./models")),
            ollama_base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_owned()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3001".to_owned()),
        }
    }

    /// The origins the CORS layer should accept.
    pub fn allowed_origins(&self) -> Vec<String> {
        // Both dev ports, mirroring the frontend's fallback behavior.
        vec![self.frontend_url.clone(), "http://localhost:3000".to_owned()]
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_owned(),
            models_dir: PathBuf::from("./models"),
            ollama_base_url: "http://localhost:11434".to_owned(),
            frontend_url: "http://localhost:3001".to_owned(),
        }
    }
}
