//! Gateway configuration.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `ADMITGATE_POLICY_FILE` | unset | JSON policy table; unset uses the reference table |
//! | `ADMITGATE_API_PREFIX` | `/api/` | Namespace subject to admission control |
//! | `ADMITGATE_EXCLUDED_PATHS` | health, auth callback, static | Comma-separated bypass prefixes |
//! | `ADMITGATE_SWEEP_INTERVAL_SECS` | 300 | Eviction sweep interval |
//! | `ADMITGATE_SESSION_URL` | unset | Session endpoint for authenticated identities |
//! | `ADMITGATE_SESSION_COOKIE` | `sb-access-token` | Cookie carrying the access token |
//! | `ADMITGATE_SESSION_API_KEY` | unset | `apikey` header sent to the session endpoint |
//! | `ADMITGATE_SESSION_TIMEOUT_MS` | 2000 | Session lookup timeout |

use crate::policy::{BypassRules, PolicyTable, DEFAULT_API_PREFIX, DEFAULT_EXCLUDED_PATHS};
use crate::sweeper::DEFAULT_SWEEP_INTERVAL_SECS;
use crate::{GatewayError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default cookie holding the session access token
pub const DEFAULT_SESSION_COOKIE: &str = "sb-access-token";

/// Default timeout for session lookups
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 2_000;

/// Session endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Endpoint returning the user for a bearer token
    pub url: Option<String>,
    pub cookie_name: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: None,
            cookie_name: DEFAULT_SESSION_COOKIE.to_string(),
            api_key: None,
            timeout: Duration::from_millis(DEFAULT_SESSION_TIMEOUT_MS),
        }
    }
}

/// Configuration for the admission gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub policy_file: Option<PathBuf>,
    pub api_prefix: String,
    pub excluded_paths: Vec<String>,
    pub sweep_interval: Duration,
    pub session: SessionConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            policy_file: None,
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            excluded_paths: DEFAULT_EXCLUDED_PATHS
                .iter()
                .map(|path| path.to_string())
                .collect(),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            session: SessionConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    ///
    /// Unset or unparsable values fall back to their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            policy_file: non_empty_var("ADMITGATE_POLICY_FILE").map(PathBuf::from),
            api_prefix: non_empty_var("ADMITGATE_API_PREFIX").unwrap_or(defaults.api_prefix),
            excluded_paths: non_empty_var("ADMITGATE_EXCLUDED_PATHS")
                .map(|s| {
                    s.split(',')
                        .map(|path| path.trim().to_string())
                        .filter(|path| !path.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.excluded_paths),
            sweep_interval: std::env::var("ADMITGATE_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            session: SessionConfig {
                url: non_empty_var("ADMITGATE_SESSION_URL"),
                cookie_name: non_empty_var("ADMITGATE_SESSION_COOKIE")
                    .unwrap_or(defaults.session.cookie_name),
                api_key: non_empty_var("ADMITGATE_SESSION_API_KEY"),
                timeout: std::env::var("ADMITGATE_SESSION_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.session.timeout),
            },
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero() {
            return Err(GatewayError::Config(
                "sweep_interval must be > 0".to_string(),
            ));
        }
        if !self.api_prefix.starts_with('/') {
            return Err(GatewayError::Config(format!(
                "api_prefix must start with '/', got '{}'",
                self.api_prefix
            )));
        }
        if self.session.timeout.is_zero() {
            return Err(GatewayError::Config(
                "session timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Load the policy table this configuration points at.
    pub fn load_policies(&self) -> Result<PolicyTable> {
        match &self.policy_file {
            Some(path) => PolicyTable::from_file(path),
            None => Ok(PolicyTable::reference()),
        }
    }

    pub fn bypass_rules(&self) -> BypassRules {
        BypassRules::new(self.api_prefix.clone(), self.excluded_paths.clone())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
