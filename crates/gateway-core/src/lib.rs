//! admitgate Gateway Core
//!
//! Admission control for inbound API requests: caller identity resolution,
//! per-route policy selection, fixed-window counters and the allow/deny
//! decision. Nothing in this crate depends on an HTTP framework; the
//! `admitgate-gateway-api` crate wires it into axum.
//!
//! ## Flow
//!
//! 1. [`BypassRules`] decide whether a path is subject to admission at all.
//! 2. [`IdentityResolver`] turns the request into a [`CallerIdentity`].
//! 3. [`PolicyTable::match_path`] picks the [`RoutePolicy`] in declaration order.
//! 4. [`CounterStore::hit`] bumps the `(identity, path)` counter atomically.
//! 5. [`AdmissionDecision::evaluate`] turns the counter into allow/deny metadata.
//!
//! [`Gateway`] bundles all of the above into a single owned service.

pub mod clock;
pub mod config;
pub mod decision;
pub mod gateway;
pub mod identity;
pub mod policy;
pub mod store;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{GatewayConfig, SessionConfig};
pub use decision::AdmissionDecision;
pub use gateway::{Admission, Gateway, GatewayOutcome};
pub use identity::{
    CallerIdentity, Cookies, IdentityResolver, NoSessionProvider, RequestInfo, Session,
    SessionError, SessionProvider, StaticSessionProvider,
};
pub use policy::{BypassRules, PolicyPrefix, PolicyTable, RoutePolicy};
pub use store::{composite_key, CounterStore, InMemoryCounterStore, RateWindowCounter};
pub use sweeper::{
    spawn_eviction_sweeper, EvictionSweeper, SweepObserver, DEFAULT_SWEEP_INTERVAL_SECS,
};

/// Errors raised while building or configuring the gateway.
///
/// None of these surface during request handling; admission itself never fails.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid policy table: {0}")]
    InvalidPolicy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for gateway construction
pub type Result<T> = std::result::Result<T, GatewayError>;
