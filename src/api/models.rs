//! Model management endpoints — catalog listing and local residency control.
//!
//! Listing merges the local catalog scan with whatever the daemon
//! advertises; load/unload only ever touch local models, because the
//! daemon's model lifecycle is its own business.

use std::collections::HashSet;

use tracing::debug;

use crate::context::Context;
use crate::llm::{DAEMON_PREFIX, GatewayError};
use crate::{Response, StatusCode};

use super::error_response;

pub async fn list_models(ctx: Context) -> Response {
    let state = ctx.state();
    let resident: HashSet<String> = state.cache.resident_ids().into_iter().collect();

    let mut models: Vec<serde_json::Value> = state
        .catalog
        .scan()
        .await
        .into_iter()
        .map(|entry| {
            serde_json::json!({
                "id": entry.id,
                "backend": "local",
                "category": entry.category,
                "file_name": entry.file_name,
                "size_bytes": entry.size_bytes,
                "resident": resident.contains(&entry.id),
            })
        })
        .collect();

    match state.daemon.list_models().await {
        Ok(daemon_models) => {
            for model in daemon_models {
                models.push(serde_json::json!({
                    "id": format!("{DAEMON_PREFIX}{}", model.name),
                    "backend": "ollama",
                    "size_bytes": model.size,
                }));
            }
        }
        Err(e) => {
            // A dark daemon just means a shorter list.
            debug!(error = %e, "daemon models unavailable");
        }
    }

    Response::json(&serde_json::json!({ "models": models }))
}

fn local_id(ctx: &Context) -> String {
    format!(
        "{}/{}",
        ctx.params().get("category").unwrap_or(""),
        ctx.params().get("file").unwrap_or("")
    )
}

pub async fn load_model(ctx: Context) -> Response {
    let id = local_id(&ctx);
    match ctx.state().local.load(&id).await {
        Ok(_) => Response::json(&serde_json::json!({ "id": id, "resident": true })),
        Err(GatewayError::NotFound(_)) => error_response(
            StatusCode::NotFound,
            "MODEL_NOT_FOUND",
            format!("no local model at {id}"),
        ),
        Err(e @ GatewayError::BackendUnavailable(_)) => {
            error_response(StatusCode::ServiceUnavailable, "BACKEND_UNAVAILABLE", e.to_string())
        }
        Err(e) => error_response(
            StatusCode::InternalServerError,
            "BACKEND_FAILURE",
            e.to_string(),
        ),
    }
}

pub async fn unload_model(ctx: Context) -> Response {
    let id = local_id(&ctx);
    let removed = ctx.state().local.unload(&id).await;
    Response::json(&serde_json::json!({ "id": id, "removed": removed }))
}

/// Fallback for load/unload with a single-segment id.
///
/// Daemon-prefixed identifiers are rejected explicitly — residency there is
/// the daemon's concern — and anything else cannot name a local model,
/// which always lives at `<category>/<file>`.
pub async fn manage_flat_id(ctx: Context) -> Response {
    let id = ctx.params().get("id").unwrap_or("").to_owned();
    if id.starts_with(DAEMON_PREFIX) {
        return error_response(
            StatusCode::UnprocessableEntity,
            "DAEMON_MANAGED",
            format!("{id} is managed by the inference daemon"),
        );
    }
    error_response(
        StatusCode::NotFound,
        "MODEL_NOT_FOUND",
        "local model ids take the form <category>/<file>",
    )
}
