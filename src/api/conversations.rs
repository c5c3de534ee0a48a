//! Conversation CRUD endpoints over the in-memory store.

use crate::context::Context;
use crate::store::NewConversation;
use crate::{Response, StatusCode};

use super::error_response;

pub async fn list(ctx: Context) -> Response {
    Response::json(&serde_json::json!({
        "conversations": ctx.state().conversations.list(),
    }))
}

pub async fn create(ctx: Context) -> Response {
    // An empty body is a valid "blank conversation" request.
    let new: NewConversation = if ctx.request().body().is_empty() {
        NewConversation::default()
    } else {
        match ctx.json() {
            Ok(new) => new,
            Err(e) => {
                return error_response(
                    StatusCode::BadRequest,
                    "BAD_REQUEST",
                    format!("invalid conversation body: {e}"),
                );
            }
        }
    };

    let conversation = ctx.state().conversations.create(new);
    Response::json_with_status(StatusCode::Created, &conversation)
}

pub async fn get(ctx: Context) -> Response {
    let id = ctx.params().get("id").unwrap_or("");
    match ctx.state().conversations.get(id) {
        Some(conversation) => Response::json(&conversation),
        None => error_response(
            StatusCode::NotFound,
            "CONVERSATION_NOT_FOUND",
            format!("no conversation with id {id}"),
        ),
    }
}

pub async fn delete(ctx: Context) -> Response {
    let id = ctx.params().get("id").unwrap_or("");
    if ctx.state().conversations.delete(id) {
        Response::json(&serde_json::json!({ "deleted": true }))
    } else {
        error_response(
            StatusCode::NotFound,
            "CONVERSATION_NOT_FOUND",
            format!("no conversation with id {id}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{context_with_state, json_body};
    use crate::api::{AppState, build_router};
    use std::sync::Arc;

    #[tokio::test]
    async fn create_then_fetch_then_delete() {
        let router = build_router();
        let state = Arc::new(AppState::for_tests());

        let body = r#"{"title":"Testing","messages":[{"role":"user","content":"hi"}]}"#;
        let res = router
            .dispatch(context_with_state(
                "POST",
                "/api/v1/conversations",
                Some(body),
                Arc::clone(&state),
            ))
            .await;
        assert_eq!(res.status(), StatusCode::Created);
        let created = json_body(res);
        let id = created["id"].as_str().unwrap().to_owned();

        let res = router
            .dispatch(context_with_state(
                "GET",
                &format!("/api/v1/conversations/{id}"),
                None,
                Arc::clone(&state),
            ))
            .await;
        assert_eq!(res.status(), StatusCode::Ok);
        let fetched = json_body(res);
        assert_eq!(fetched["title"], "Testing");
        assert_eq!(fetched["messages"][0]["content"], "hi");

        let res = router
            .dispatch(context_with_state(
                "GET",
                "/api/v1/conversations",
                None,
                Arc::clone(&state),
            ))
            .await;
        let listed = json_body(res);
        assert_eq!(listed["conversations"].as_array().unwrap().len(), 1);

        let res = router
            .dispatch(context_with_state(
                "DELETE",
                &format!("/api/v1/conversations/{id}"),
                None,
                Arc::clone(&state),
            ))
            .await;
        assert_eq!(json_body(res)["deleted"], true);

        let res = router
            .dispatch(context_with_state(
                "GET",
                &format!("/api/v1/conversations/{id}"),
                None,
                state,
            ))
            .await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn missing_conversation_is_404() {
        let router = build_router();
        let state = Arc::new(AppState::for_tests());
        let res = router
            .dispatch(context_with_state(
                "GET",
                "/api/v1/conversations/nope",
                None,
                state,
            ))
            .await;
        assert_eq!(res.status(), StatusCode::NotFound);
        assert_eq!(json_body(res)["error"]["code"], "CONVERSATION_NOT_FOUND");
    }

    #[tokio::test]
    async fn create_with_empty_body_makes_blank_conversation() {
        let router = build_router();
        let state = Arc::new(AppState::for_tests());
        let res = router
            .dispatch(context_with_state(
                "POST",
                "/api/v1/conversations",
                None,
                state,
            ))
            .await;
        assert_eq!(res.status(), StatusCode::Created);
        let body = json_body(res);
        assert_eq!(body["title"], "New conversation");
        assert_eq!(body["messages"], serde_json::json!([]));
    }
}
