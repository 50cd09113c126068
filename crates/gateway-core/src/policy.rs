//! Route policy table and path matching
//!
//! A [`PolicyTable`] is an ordered list of `(prefix, requests, window)` entries
//! plus exactly one `default` fallback. Matching walks the list in declaration
//! order and returns the first prefix hit; it does **not** prefer the longest
//! prefix. Reordering the table changes which policy wins for overlapping
//! prefixes such as `/api/foo` and `/api/foo/bar`.
//!
//! ## Policy file format
//!
//! ```json
//! [
//!   { "prefix": "/api/quick-scan", "requests": 5, "window_ms": 60000 },
//!   { "prefix": "default", "requests": 60, "window_ms": 60000 }
//! ]
//! ```
//!
//! [`BypassRules`] sit in front of the table: paths outside the API namespace
//! or on the exclusion list never reach a counter.

use crate::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

const SECOND_MS: u64 = 1_000;
const MINUTE_MS: u64 = 60 * SECOND_MS;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Sentinel spelling of the fallback entry in policy files
pub const DEFAULT_PREFIX: &str = "default";

/// Default API namespace subject to admission control
pub const DEFAULT_API_PREFIX: &str = "/api/";

/// Paths inside the API namespace that skip admission entirely
pub const DEFAULT_EXCLUDED_PATHS: &[&str] = &[
    "/api/health",
    "/api/auth/callback",
    "/_next/static",
    "/_next/image",
    "/favicon.ico",
];

/// File extensions treated as static assets
const STATIC_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "ico", "css", "js", "webp", "woff", "woff2",
];

/// Which paths a policy applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PolicyPrefix {
    /// Applies to any path starting with this string
    Prefix(String),
    /// Fallback used when no prefix matches
    Default,
}

impl From<String> for PolicyPrefix {
    fn from(value: String) -> Self {
        if value == DEFAULT_PREFIX {
            PolicyPrefix::Default
        } else {
            PolicyPrefix::Prefix(value)
        }
    }
}

impl From<PolicyPrefix> for String {
    fn from(value: PolicyPrefix) -> Self {
        match value {
            PolicyPrefix::Prefix(prefix) => prefix,
            PolicyPrefix::Default => DEFAULT_PREFIX.to_string(),
        }
    }
}

impl std::fmt::Display for PolicyPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyPrefix::Prefix(prefix) => f.write_str(prefix),
            PolicyPrefix::Default => f.write_str(DEFAULT_PREFIX),
        }
    }
}

/// Throttling policy for one path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePolicy {
    /// Path prefix (or the `default` sentinel)
    #[serde(rename = "prefix")]
    pub path_prefix: PolicyPrefix,
    /// Maximum admitted requests per window
    pub requests: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl RoutePolicy {
    pub fn new(prefix: impl Into<String>, requests: u32, window_ms: u64) -> Self {
        Self {
            path_prefix: PolicyPrefix::from(prefix.into()),
            requests,
            window_ms,
        }
    }

    pub fn fallback(requests: u32, window_ms: u64) -> Self {
        Self {
            path_prefix: PolicyPrefix::Default,
            requests,
            window_ms,
        }
    }

    pub fn is_default(&self) -> bool {
        self.path_prefix == PolicyPrefix::Default
    }

    /// Whether this (non-default) entry covers `path`.
    pub fn matches(&self, path: &str) -> bool {
        match &self.path_prefix {
            PolicyPrefix::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PolicyPrefix::Default => false,
        }
    }

    /// Window length in seconds, formatted without a trailing `.0`
    /// (`60`, `900`, `1.5`).
    pub fn window_secs_display(&self) -> String {
        format_window_secs(self.window_ms)
    }
}

/// Render a millisecond window as seconds without a trailing `.0`.
pub fn format_window_secs(window_ms: u64) -> String {
    if window_ms % SECOND_MS == 0 {
        (window_ms / SECOND_MS).to_string()
    } else {
        (window_ms as f64 / SECOND_MS as f64).to_string()
    }
}

/// Ordered, immutable set of route policies.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    entries: Vec<RoutePolicy>,
    default_index: usize,
}

impl PolicyTable {
    /// Build a table from entries in declaration order.
    ///
    /// Fails unless exactly one `default` entry exists and every entry has a
    /// non-zero limit and window. Overlapping prefixes are accepted; shadowed
    /// entries are logged.
    pub fn new(entries: Vec<RoutePolicy>) -> Result<Self> {
        let mut default_index = None;

        for (index, entry) in entries.iter().enumerate() {
            if entry.requests == 0 {
                return Err(GatewayError::InvalidPolicy(format!(
                    "policy '{}' must allow at least one request",
                    entry.path_prefix
                )));
            }
            if entry.window_ms == 0 {
                return Err(GatewayError::InvalidPolicy(format!(
                    "policy '{}' must have a non-zero window",
                    entry.path_prefix
                )));
            }

            match &entry.path_prefix {
                PolicyPrefix::Default => {
                    if default_index.replace(index).is_some() {
                        return Err(GatewayError::InvalidPolicy(
                            "more than one default policy declared".to_string(),
                        ));
                    }
                }
                PolicyPrefix::Prefix(prefix) if prefix.is_empty() => {
                    return Err(GatewayError::InvalidPolicy(
                        "policy prefix cannot be empty".to_string(),
                    ));
                }
                PolicyPrefix::Prefix(_) => {}
            }
        }

        let default_index = default_index.ok_or_else(|| {
            GatewayError::InvalidPolicy("a default policy is required".to_string())
        })?;

        let table = Self {
            entries,
            default_index,
        };
        table.warn_on_shadowed();
        Ok(table)
    }

    /// The reference configuration shipped with the gateway.
    pub fn reference() -> Self {
        let entries = vec![
            // AI analysis
            RoutePolicy::new("/api/quick-scan", 5, MINUTE_MS),
            RoutePolicy::new("/api/analyze", 3, MINUTE_MS),
            RoutePolicy::new("/api/predict", 5, MINUTE_MS),
            // Report generation
            RoutePolicy::new("/api/reports", 10, HOUR_MS),
            // Auth
            RoutePolicy::new("/api/auth", 5, 15 * MINUTE_MS),
            // Data fetch
            RoutePolicy::new("/api/timeline", 30, MINUTE_MS),
            RoutePolicy::new("/api/progress", 30, MINUTE_MS),
            RoutePolicy::new("/api/photos", 30, MINUTE_MS),
            RoutePolicy::fallback(60, MINUTE_MS),
        ];
        let default_index = entries.len() - 1;
        Self {
            entries,
            default_index,
        }
    }

    /// Parse a table from its JSON array form.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let entries: Vec<RoutePolicy> = serde_json::from_str(json)?;
        Self::new(entries)
    }

    /// Load a table from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let table = Self::from_json_str(&raw)?;
        debug!(
            path = %path.display(),
            entries = table.entries.len(),
            "Loaded policy table"
        );
        Ok(table)
    }

    /// Select the policy for `path`.
    ///
    /// First prefix match in declaration order wins; the default applies when
    /// nothing matches.
    pub fn match_path(&self, path: &str) -> &RoutePolicy {
        self.entries
            .iter()
            .filter(|entry| !entry.is_default())
            .find(|entry| entry.matches(path))
            .unwrap_or_else(|| self.default_policy())
    }

    pub fn default_policy(&self) -> &RoutePolicy {
        &self.entries[self.default_index]
    }

    /// All entries in declaration order, default included.
    pub fn entries(&self) -> &[RoutePolicy] {
        &self.entries
    }

    /// Pairs of `(earlier, later)` where every path the later prefix covers is
    /// already claimed by the earlier one.
    pub fn shadowed(&self) -> Vec<(&RoutePolicy, &RoutePolicy)> {
        let mut shadowed = Vec::new();
        for (i, later) in self.entries.iter().enumerate() {
            let PolicyPrefix::Prefix(later_prefix) = &later.path_prefix else {
                continue;
            };
            if let Some(earlier) = self.entries[..i]
                .iter()
                .find(|earlier| earlier.matches(later_prefix))
            {
                shadowed.push((earlier, later));
            }
        }
        shadowed
    }

    fn warn_on_shadowed(&self) {
        for (earlier, later) in self.shadowed() {
            warn!(
                earlier = %earlier.path_prefix,
                later = %later.path_prefix,
                "Policy is unreachable: an earlier prefix matches first"
            );
        }
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::reference()
    }
}

/// Rules for requests that skip admission control entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BypassRules {
    /// Only paths under this namespace are rate limited
    pub api_prefix: String,
    /// Path prefixes that are never rate limited
    pub excluded: Vec<String>,
}

impl Default for BypassRules {
    fn default() -> Self {
        Self {
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            excluded: DEFAULT_EXCLUDED_PATHS
                .iter()
                .map(|path| path.to_string())
                .collect(),
        }
    }
}

impl BypassRules {
    pub fn new(api_prefix: impl Into<String>, excluded: Vec<String>) -> Self {
        Self {
            api_prefix: api_prefix.into(),
            excluded,
        }
    }

    /// True when `path` should pass straight through without touching counters.
    pub fn should_bypass(&self, path: &str) -> bool {
        if !path.starts_with(self.api_prefix.as_str()) {
            return true;
        }
        if self
            .excluded
            .iter()
            .any(|excluded| path.starts_with(excluded.as_str()))
        {
            return true;
        }
        is_static_asset(path)
    }
}

fn is_static_asset(path: &str) -> bool {
    let last_segment = path.rsplit('/').next().unwrap_or(path);
    match last_segment.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_ascii_lowercase();
            STATIC_EXTENSIONS.contains(&ext.as_str())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_table_matches_own_entry() {
        let table = PolicyTable::reference();

        let policy = table.match_path("/api/timeline");
        assert_eq!(policy.path_prefix, PolicyPrefix::Prefix("/api/timeline".into()));
        assert_eq!(policy.requests, 30);
        assert_eq!(policy.window_ms, 60_000);

        let policy = table.match_path("/api/quick-scan");
        assert_eq!(policy.requests, 5);
    }

    #[test]
    fn test_unmatched_path_uses_default() {
        let table = PolicyTable::reference();
        let policy = table.match_path("/api/settings");
        assert!(policy.is_default());
        assert_eq!(policy.requests, 60);
        assert_eq!(policy.window_ms, 60_000);
    }

    #[test]
    fn test_prefix_matches_subpaths() {
        let table = PolicyTable::reference();
        assert_eq!(table.match_path("/api/reports/2026/pdf").requests, 10);
        assert_eq!(table.match_path("/api/reports/2026/pdf").window_ms, HOUR_MS);
    }

    #[test]
    fn test_declaration_order_wins_over_specificity() {
        let broad_first = PolicyTable::new(vec![
            RoutePolicy::new("/api/foo", 10, MINUTE_MS),
            RoutePolicy::new("/api/foo/bar", 2, MINUTE_MS),
            RoutePolicy::fallback(60, MINUTE_MS),
        ])
        .unwrap();
        assert_eq!(broad_first.match_path("/api/foo/bar").requests, 10);

        let narrow_first = PolicyTable::new(vec![
            RoutePolicy::new("/api/foo/bar", 2, MINUTE_MS),
            RoutePolicy::new("/api/foo", 10, MINUTE_MS),
            RoutePolicy::fallback(60, MINUTE_MS),
        ])
        .unwrap();
        assert_eq!(narrow_first.match_path("/api/foo/bar").requests, 2);
        assert_eq!(narrow_first.match_path("/api/foo/baz").requests, 10);
    }

    #[test]
    fn test_default_position_does_not_affect_matching() {
        let table = PolicyTable::new(vec![
            RoutePolicy::fallback(60, MINUTE_MS),
            RoutePolicy::new("/api/x", 1, MINUTE_MS),
        ])
        .unwrap();
        assert_eq!(table.match_path("/api/x/1").requests, 1);
        assert!(table.match_path("/api/y").is_default());
    }

    #[test]
    fn test_matching_is_deterministic() {
        let table = PolicyTable::reference();
        let first = table.match_path("/api/auth/login").clone();
        for _ in 0..10 {
            assert_eq!(table.match_path("/api/auth/login"), &first);
        }
    }

    #[test]
    fn test_shadowed_entries_detected() {
        let table = PolicyTable::new(vec![
            RoutePolicy::new("/api/foo", 10, MINUTE_MS),
            RoutePolicy::new("/api/foo/bar", 2, MINUTE_MS),
            RoutePolicy::fallback(60, MINUTE_MS),
        ])
        .unwrap();
        let shadowed = table.shadowed();
        assert_eq!(shadowed.len(), 1);
        assert_eq!(shadowed[0].1.requests, 2);

        assert!(PolicyTable::reference().shadowed().is_empty());
    }

    #[test]
    fn test_missing_default_rejected() {
        let err = PolicyTable::new(vec![RoutePolicy::new("/api/x", 1, 1000)]).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidPolicy(_)));
    }

    #[test]
    fn test_duplicate_default_rejected() {
        let err = PolicyTable::new(vec![
            RoutePolicy::fallback(1, 1000),
            RoutePolicy::fallback(2, 1000),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("more than one default"));
    }

    #[test]
    fn test_zero_limit_and_window_rejected() {
        assert!(PolicyTable::new(vec![RoutePolicy::fallback(0, 1000)]).is_err());
        assert!(PolicyTable::new(vec![RoutePolicy::fallback(1, 0)]).is_err());
        assert!(PolicyTable::new(vec![
            RoutePolicy::new("", 1, 1000),
            RoutePolicy::fallback(1, 1000),
        ])
        .is_err());
    }

    #[test]
    fn test_parse_json_table() {
        let json = r#"[
            { "prefix": "/api/quick-scan", "requests": 5, "window_ms": 60000 },
            { "prefix": "default", "requests": 60, "window_ms": 60000 }
        ]"#;
        let table = PolicyTable::from_json_str(json).unwrap();
        assert_eq!(table.entries().len(), 2);
        assert_eq!(table.match_path("/api/quick-scan").requests, 5);
        assert!(table.default_policy().is_default());
    }

    #[test]
    fn test_load_table_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policies.json");
        std::fs::write(
            &path,
            r#"[{ "prefix": "default", "requests": 7, "window_ms": 1000 }]"#,
        )
        .unwrap();

        let table = PolicyTable::from_file(&path).unwrap();
        assert_eq!(table.default_policy().requests, 7);

        let missing = PolicyTable::from_file(dir.path().join("nope.json"));
        assert!(matches!(missing, Err(GatewayError::Io(_))));
    }

    #[test]
    fn test_policy_serializes_default_sentinel() {
        let json = serde_json::to_value(RoutePolicy::fallback(60, 60_000)).unwrap();
        assert_eq!(json["prefix"], "default");
        assert_eq!(json["requests"], 60);
    }

    #[test]
    fn test_window_secs_display() {
        assert_eq!(RoutePolicy::fallback(1, 60_000).window_secs_display(), "60");
        assert_eq!(RoutePolicy::fallback(1, 1_500).window_secs_display(), "1.5");
        assert_eq!(RoutePolicy::fallback(1, HOUR_MS).window_secs_display(), "3600");
    }

    #[test]
    fn test_bypass_outside_api_namespace() {
        let rules = BypassRules::default();
        assert!(rules.should_bypass("/"));
        assert!(rules.should_bypass("/dashboard"));
        assert!(rules.should_bypass("/apiary"));
        assert!(!rules.should_bypass("/api/timeline"));
    }

    #[test]
    fn test_bypass_exclusions() {
        let rules = BypassRules::default();
        assert!(rules.should_bypass("/api/health"));
        assert!(rules.should_bypass("/api/health/ready"));
        assert!(rules.should_bypass("/api/auth/callback"));
        assert!(!rules.should_bypass("/api/auth/login"));
    }

    #[test]
    fn test_bypass_static_assets() {
        let rules = BypassRules::default();
        assert!(rules.should_bypass("/api/photos/thumb.PNG"));
        assert!(rules.should_bypass("/api/docs/app.js"));
        assert!(!rules.should_bypass("/api/photos/v1.2"));
        assert!(!rules.should_bypass("/api/photos/.hidden"));
    }
}
