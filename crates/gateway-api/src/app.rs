//! Router assembly for the admitgate API server

use crate::rate_limiting::admission_middleware;
use admitgate_gateway_core::Gateway;
use axum::{
    extract::{Extension, Request},
    http::{StatusCode, Uri},
    middleware::{self, Next},
    response::Response,
    routing::{any, get},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

/// Request ID for tracking requests through the system
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    request_id: String,
}

/// Middleware to add request ID to every request
async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = RequestId(Uuid::new_v4().to_string());
    req.extensions_mut().insert(request_id);
    next.run(req).await
}

/// Build the API router with admission control in front of every route.
///
/// Real business handlers are mounted by the embedding application; the
/// catch-all `/api/*` handler here only echoes the admitted path.
pub fn build_router(gateway: Gateway) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/api/health", get(health_check))
        .route("/api/{*rest}", any(api_stub))
        .fallback(not_found);

    #[cfg(feature = "metrics")]
    let router = router.route("/metrics", get(crate::metrics::metrics_handler));

    router
        .layer(middleware::from_fn_with_state(gateway, admission_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(request_id_middleware))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Placeholder for admitted API calls
async fn api_stub(uri: Uri, Extension(request_id): Extension<RequestId>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "path": uri.path(),
        "request_id": request_id.0,
    }))
}

async fn not_found(
    uri: Uri,
    Extension(request_id): Extension<RequestId>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("No route for '{}'", uri.path()),
            request_id: request_id.0,
        }),
    )
}
