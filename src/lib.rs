//! # tokengate
//!
//! A streaming chat-completion gateway over two inference backends: an
//! embedded GGUF runtime loaded into this process, and an Ollama-compatible
//! daemon reached over HTTP. Requests route by model identifier
//! (`ollama:<name>` goes to the daemon, `<category>/<file>` to the local
//! engine) and every completion streams back as Server-Sent Events.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokengate::api::{self, AppState};
//! use tokengate::config::Config;
//! use tokengate::context::Context;
//! use tokengate::llm::engine;
//! use tokengate::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env();
//!     let state = Arc::new(AppState::new(config.clone(), engine::default_runtime()));
//!     let router = Arc::new(api::build_router());
//!
//!     let server = Server::bind(&config.bind_addr).await?;
//!     server.run(move |request| {
//!         let state = Arc::clone(&state);
//!         let router = Arc::clone(&router);
//!         async move { router.dispatch(Context::new(request, state)).await }
//!     }).await?;
//!     Ok(())
//! }
//! ```

// ── Transport ─────────────────────────────────────────────────────────────────
pub mod http;
pub mod server;

// ── Request pipeline ──────────────────────────────────────────────────────────
pub mod context;
pub mod middleware;
pub mod router;
pub mod security;

// ── Gateway core ──────────────────────────────────────────────────────────────
pub mod cache;
pub mod llm;
pub mod realtime;

// ── Collaborators ─────────────────────────────────────────────────────────────
pub mod api;
pub mod catalog;
pub mod config;
pub mod store;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
