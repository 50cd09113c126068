//! Allow/deny decisions and the metadata reported to clients

use crate::policy::{format_window_secs, RoutePolicy};
use crate::store::RateWindowCounter;
use chrono::{DateTime, SecondsFormat, Utc};

/// Share of the limit below which admitted responses carry a warning
const WARNING_RATIO_DIVISOR: u64 = 5;

/// Outcome of one admission check plus everything needed for the headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub limit: u32,
    /// Requests left in this window, never negative
    pub remaining: u64,
    /// Requests counted in this window, this one included
    pub count: u64,
    pub reset_at: DateTime<Utc>,
    /// Seconds until the window ends, rounded up
    pub retry_after_secs: u64,
    pub window_ms: u64,
    /// "Near the edge" advisory for admitted requests
    pub warning: Option<String>,
}

impl AdmissionDecision {
    /// Decide a request from its already incremented counter.
    ///
    /// Denied iff `count > limit`; the `limit`-th request is still admitted.
    pub fn evaluate(counter: &RateWindowCounter, policy: &RoutePolicy, now: DateTime<Utc>) -> Self {
        let limit = u64::from(policy.requests);
        let allowed = counter.count <= limit;
        let remaining = limit.saturating_sub(counter.count);

        let until_reset_ms = (counter.window_reset_at - now).num_milliseconds().max(0) as u64;
        let retry_after_secs = until_reset_ms.div_ceil(1_000);

        let warning = (allowed && remaining <= limit.div_ceil(WARNING_RATIO_DIVISOR)).then(|| {
            format!(
                "Approaching rate limit: {} of {} requests remaining in this window",
                remaining, limit
            )
        });

        Self {
            allowed,
            limit: policy.requests,
            remaining,
            count: counter.count,
            reset_at: counter.window_reset_at,
            retry_after_secs,
            window_ms: policy.window_ms,
            warning,
        }
    }

    /// Reset instant as ISO-8601 with millisecond precision (`...T00:01:00.000Z`).
    pub fn reset_iso(&self) -> String {
        self.reset_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Window length in seconds for display (`60`, `1.5`).
    pub fn window_secs_display(&self) -> String {
        format_window_secs(self.window_ms)
    }

    /// Human-readable reason for a denial.
    pub fn denial_message(&self) -> String {
        format!(
            "Rate limit exceeded. You can make {} requests per {} seconds. Please try again in {} seconds.",
            self.limit,
            self.window_secs_display(),
            self.retry_after_secs
        )
    }
}
