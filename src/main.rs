//! Service entry point: logging, configuration, middleware, serve.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use tokengate::api::{self, AppState};
use tokengate::config::Config;
use tokengate::context::Context;
use tokengate::llm::engine;
use tokengate::middleware::{LoggerMiddleware, MiddlewareHandler, Next, from_middleware};
use tokengate::security::CorsMiddleware;
use tokengate::server::Server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    info!(
        models_dir = %config.models_dir.display(),
        daemon = %config.ollama_base_url,
        "starting tokengate"
    );

    let state = Arc::new(AppState::new(config.clone(), engine::default_runtime()));
    let router = Arc::new(api::build_router());

    let terminal: MiddlewareHandler = {
        let router = Arc::clone(&router);
        Arc::new(move |ctx, _next| {
            let router = Arc::clone(&router);
            Box::pin(async move { router.dispatch(ctx).await })
        })
    };
    let pipeline = vec![
        from_middleware(Arc::new(LoggerMiddleware)),
        from_middleware(Arc::new(CorsMiddleware::new(config.allowed_origins()))),
        terminal,
    ];

    let server = Server::bind(&config.bind_addr).await?;
    server
        .run(move |request| {
            let state = Arc::clone(&state);
            let pipeline = pipeline.clone();
            async move {
                let ctx = Context::new(request, state);
                Next::new(pipeline).run(ctx).await
            }
        })
        .await?;

    Ok(())
}
