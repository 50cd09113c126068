//! Subcommand implementations.
//!
//! Each command renders to a `String` so the binary only prints.

use admitgate_gateway_core::{BypassRules, GatewayConfig, PolicyTable, Result, RoutePolicy};
use std::fmt::Write as _;
use std::path::Path;

/// Resolve the policy table: an explicit file wins, then `ADMITGATE_POLICY_FILE`,
/// then the reference table.
pub fn load_table(file: Option<&Path>, config: &GatewayConfig) -> Result<PolicyTable> {
    match file {
        Some(path) => PolicyTable::from_file(path),
        None => config.load_policies(),
    }
}

fn policy_line(policy: &RoutePolicy) -> String {
    format!(
        "{:<24} {:>6} per {}s",
        policy.path_prefix.to_string(),
        policy.requests,
        policy.window_secs_display()
    )
}

/// Table listing in declaration order, followed by shadowing warnings.
pub fn render_policies(table: &PolicyTable) -> String {
    let mut out = String::new();
    for policy in table.entries() {
        let _ = writeln!(out, "{}", policy_line(policy));
    }

    for (earlier, later) in table.shadowed() {
        let _ = writeln!(
            out,
            "warning: '{}' is unreachable, '{}' matches first",
            later.path_prefix, earlier.path_prefix
        );
    }
    out
}

pub fn render_policies_json(table: &PolicyTable) -> Result<String> {
    Ok(serde_json::to_string_pretty(table.entries())?)
}

/// Explain how the gateway would treat `path`.
pub fn explain_match(table: &PolicyTable, bypass: &BypassRules, path: &str) -> String {
    if bypass.should_bypass(path) {
        return format!("{} -> bypass (not rate limited)", path);
    }

    let policy = table.match_path(path);
    if policy.is_default() {
        format!(
            "{} -> default: {} per {}s (no prefix matched)",
            path,
            policy.requests,
            policy.window_secs_display()
        )
    } else {
        format!(
            "{} -> {}: {} per {}s",
            path,
            policy.path_prefix,
            policy.requests,
            policy.window_secs_display()
        )
    }
}

/// Load and validate a policy file.
pub fn validate_file(path: &Path) -> Result<String> {
    let table = PolicyTable::from_file(path)?;
    let mut out = format!("OK: {} policies", table.entries().len());
    let shadowed = table.shadowed().len();
    if shadowed > 0 {
        let _ = write!(out, " ({} unreachable)", shadowed);
    }
    Ok(out)
}
