//! admitgate Gateway API Library
//!
//! axum integration for the admission gateway: the rate limiting middleware,
//! session providers backed by the auth service, optional Prometheus metrics,
//! and the router used by the `admitgate-api` binary.

pub mod app;
pub mod rate_limiting;

#[cfg(feature = "remote-session")]
pub mod session;

#[cfg(feature = "metrics")]
pub mod metrics;

pub use app::{build_router, RequestId};
pub use rate_limiting::{admission_middleware, request_info};
