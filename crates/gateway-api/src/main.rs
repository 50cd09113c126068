//! admitgate API Server
//!
//! Serves the API namespace behind the admission gateway.

use admitgate_gateway_api::build_router;
use admitgate_gateway_core::{Gateway, GatewayConfig, NoSessionProvider, SessionProvider};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env();

    let provider = session_provider(&config);
    let gateway = Gateway::from_config(&config, provider).expect("Invalid gateway configuration");

    for policy in gateway.policies().entries() {
        tracing::info!(
            prefix = %policy.path_prefix,
            requests = policy.requests,
            window_ms = policy.window_ms,
            "Loaded route policy"
        );
    }

    let sweeper = gateway.sweeper(config.sweep_interval);
    #[cfg(feature = "metrics")]
    let sweeper = sweeper.with_observer(admitgate_gateway_api::metrics::sweep_observer());
    sweeper.spawn();

    let app = build_router(gateway);

    // Get port from environment or use default
    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .expect("PORT must be a valid number");

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("admitgate API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app).await.expect("Server error");
}

#[cfg(feature = "remote-session")]
fn session_provider(config: &GatewayConfig) -> Arc<dyn SessionProvider> {
    use admitgate_gateway_api::session::RemoteSessionProvider;

    match RemoteSessionProvider::from_config(&config.session) {
        Ok(Some(provider)) => {
            tracing::info!(cookie = %config.session.cookie_name, "Session lookups enabled");
            Arc::new(provider)
        }
        Ok(None) => {
            tracing::warn!("ADMITGATE_SESSION_URL not set, all callers are limited by IP");
            Arc::new(NoSessionProvider)
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to build session client, limiting by IP");
            Arc::new(NoSessionProvider)
        }
    }
}

#[cfg(not(feature = "remote-session"))]
fn session_provider(_config: &GatewayConfig) -> Arc<dyn SessionProvider> {
    Arc::new(NoSessionProvider)
}
