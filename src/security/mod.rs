//! Security middleware — CORS header injection and preflight handling.
//!
//! The served frontend runs on a different origin in development, so every
//! browser request arrives with an `Origin` header and preflights the chat
//! POST. Origins come from [`Config::allowed_origins`](crate::config::Config).

use std::pin::Pin;

use crate::{
    Response,
    context::Context,
    middleware::{Middleware, Next},
};

/// CORS middleware — validates the `Origin` header, short-circuits
/// preflight requests, and injects `Access-Control-*` headers on actual
/// responses.
///
/// - No `Origin` header: the request passes through unmodified.
/// - Origin not in the allow-list: passes through unmodified (the browser
///   enforces the missing headers).
/// - `OPTIONS` preflight: answered directly with `204 No Content`; the
///   downstream handler is not called.
/// - Otherwise the downstream response is decorated, with `Vary: Origin`
///   when a specific origin is echoed back.
pub struct CorsMiddleware {
    allowed_origins: Vec<String>,
    allowed_methods: String,
    allowed_headers: String,
}

impl CorsMiddleware {
    /// Builds the CORS policy for the given origin allow-list.
    ///
    /// Pass `"*"` as an origin to accept any. Methods and headers cover
    /// what the gateway's surface actually uses.
    pub fn new(allowed_origins: Vec<String>) -> Self {
        Self {
            allowed_origins,
            allowed_methods: "GET, POST, DELETE, OPTIONS".to_owned(),
            allowed_headers: "Content-Type".to_owned(),
        }
    }
}

impl Middleware for CorsMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let allowed_origins = self.allowed_origins.clone();
        let methods = self.allowed_methods.clone();
        let headers = self.allowed_headers.clone();

        Box::pin(async move {
            let request_origin = ctx.request().headers().get("origin").map(str::to_owned);
            let is_preflight = ctx.request().method() == &crate::Method::Options;
            let Some(origin) = request_origin else {
                return next.run(ctx).await;
            };

            let allow_origin = if allowed_origins.iter().any(|o| o == "*") {
                "*".to_owned()
            } else if allowed_origins.contains(&origin) {
                origin.clone()
            } else {
                return next.run(ctx).await;
            };
            let is_wildcard = allow_origin == "*";

            if is_preflight {
                let mut resp = Response::new(crate::StatusCode::NoContent)
                    .header("Access-Control-Allow-Origin", &allow_origin)
                    .header("Access-Control-Allow-Methods", &methods)
                    .header("Access-Control-Allow-Headers", &headers)
                    .header("Access-Control-Max-Age", "3600");
                if !is_wildcard {
                    resp.add_header("Vary", "Origin");
                }
                return resp;
            }

            let mut resp = next.run(ctx).await;
            resp.add_header("Access-Control-Allow-Origin", &allow_origin);
            resp.add_header("Access-Control-Allow-Methods", &methods);
            resp.add_header("Access-Control-Allow-Headers", &headers);
            if !is_wildcard {
                resp.add_header("Vary", "Origin");
            }
            resp
        })
    }
}
