//! Rate limiting middleware for admitgate
//!
//! This module puts the admission [`Gateway`] in front of every API route:
//! - Caller identity from the session cookie, or the forwarded client IP
//! - Per-route fixed-window policies, matched in declaration order
//! - Informational `X-RateLimit-*` headers on every admitted response
//! - RFC 6585 `429 Too Many Requests` with `Retry-After` when over the limit
//!
//! Requests outside the API namespace or on the exclusion list pass straight
//! through with no headers and no counters touched.
//!
//! ## Response headers
//!
//! | Header | When | Value |
//! |--------|------|-------|
//! | `X-RateLimit-Limit` | always | policy limit |
//! | `X-RateLimit-Remaining` | always | requests left, `0` when denied |
//! | `X-RateLimit-Reset` | always | ISO-8601 end of the window |
//! | `X-RateLimit-Warning` | admitted, near the limit | advisory text |
//! | `Retry-After` | denied | seconds until the window ends |
//!
//! ## Example
//!
//! ```rust,ignore
//! use admitgate_gateway_api::rate_limiting;
//! use admitgate_gateway_core::Gateway;
//! use axum::Router;
//!
//! let gateway = Gateway::with_defaults();
//! let app = Router::new().layer(axum::middleware::from_fn_with_state(
//!     gateway,
//!     rate_limiting::admission_middleware,
//! ));
//! ```

use crate::app::RequestId;
use admitgate_gateway_core::identity::{FORWARDED_FOR_HEADER, REAL_IP_HEADER};
use admitgate_gateway_core::{AdmissionDecision, Cookies, Gateway, GatewayOutcome, RequestInfo};
use axum::{
    extract::{Request, State},
    http::{
        header::{HeaderName, HeaderValue, COOKIE, RETRY_AFTER},
        HeaderMap, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, warn};

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";
pub const X_RATELIMIT_WARNING: &str = "x-ratelimit-warning";

/// JSON body of a 429 response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitErrorBody {
    pub error: &'static str,
    pub message: String,
    pub retry_after: u64,
    pub limit: u32,
    /// Window length, e.g. `"60 seconds"`
    pub window: String,
    /// ISO-8601 end of the current window
    pub reset: String,
}

impl RateLimitErrorBody {
    pub fn from_decision(decision: &AdmissionDecision) -> Self {
        Self {
            error: "Too Many Requests",
            message: decision.denial_message(),
            retry_after: decision.retry_after_secs,
            limit: decision.limit,
            window: format!("{} seconds", decision.window_secs_display()),
            reset: decision.reset_iso(),
        }
    }
}

/// Extract what the gateway needs from an inbound request.
pub fn request_info<B>(req: &axum::http::Request<B>) -> RequestInfo {
    let headers = req.headers();
    let mut cookies = Cookies::default();
    for value in headers.get_all(COOKIE) {
        if let Ok(value) = value.to_str() {
            cookies.extend_from_header(value);
        }
    }

    RequestInfo {
        path: req.uri().path().to_string(),
        forwarded_for: header_str(headers, FORWARDED_FOR_HEADER),
        real_ip: header_str(headers, REAL_IP_HEADER),
        cookies,
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Write the `X-RateLimit-*` headers shared by admitted and denied responses.
fn insert_limit_headers(headers: &mut HeaderMap, decision: &AdmissionDecision, remaining: u64) {
    headers.insert(
        HeaderName::from_static(X_RATELIMIT_LIMIT),
        HeaderValue::from(decision.limit),
    );
    headers.insert(
        HeaderName::from_static(X_RATELIMIT_REMAINING),
        HeaderValue::from(remaining),
    );
    if let Ok(reset) = HeaderValue::from_str(&decision.reset_iso()) {
        headers.insert(HeaderName::from_static(X_RATELIMIT_RESET), reset);
    }
}

/// Attach rate limit headers to a response from the real handler.
pub fn apply_admit_headers(response: &mut Response, decision: &AdmissionDecision) {
    let headers = response.headers_mut();
    insert_limit_headers(headers, decision, decision.remaining);

    if let Some(warning) = &decision.warning {
        if let Ok(value) = HeaderValue::from_str(warning) {
            headers.insert(HeaderName::from_static(X_RATELIMIT_WARNING), value);
        }
    }
}

/// Build the terminal 429 response for a denied request.
pub fn too_many_requests(decision: &AdmissionDecision) -> Response {
    let body = RateLimitErrorBody::from_decision(decision);
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();

    let headers = response.headers_mut();
    headers.insert(RETRY_AFTER, HeaderValue::from(decision.retry_after_secs));
    insert_limit_headers(headers, decision, 0);

    response
}

/// Admission control middleware
///
/// Runs before every route handler. Denied requests never reach the handler.
pub async fn admission_middleware(
    State(gateway): State<Gateway>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let info = request_info(&req);
    let outcome = gateway.evaluate(&info).await;

    #[cfg(feature = "metrics")]
    crate::metrics::record_outcome(&outcome, gateway.store().len());

    match outcome {
        GatewayOutcome::Bypass => next.run(req).await,
        GatewayOutcome::Admit(admission) => {
            debug!(
                request_id = %request_id,
                identity = %admission.identity,
                path = %info.path,
                policy = %admission.policy.path_prefix,
                count = admission.decision.count,
                remaining = admission.decision.remaining,
                "Admitted request"
            );
            let mut response = next.run(req).await;
            apply_admit_headers(&mut response, &admission.decision);
            response
        }
        GatewayOutcome::Deny(admission) => {
            warn!(
                request_id = %request_id,
                identity = %admission.identity,
                path = %info.path,
                policy = %admission.policy.path_prefix,
                limit = admission.decision.limit,
                retry_after = admission.decision.retry_after_secs,
                "Rejected request with 429"
            );
            too_many_requests(&admission.decision)
        }
    }
}
