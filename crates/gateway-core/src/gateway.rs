//! The admission gateway service
//!
//! [`Gateway`] owns the policy table, bypass rules, counter store, clock and
//! identity resolver. Construct it once at startup and share it (it is cheap
//! to clone). Tests build a fresh one per case with a [`ManualClock`].
//!
//! [`ManualClock`]: crate::clock::ManualClock

use crate::clock::{Clock, SystemClock};
use crate::config::GatewayConfig;
use crate::decision::AdmissionDecision;
use crate::identity::{CallerIdentity, IdentityResolver, RequestInfo, SessionProvider};
use crate::policy::{BypassRules, PolicyTable, RoutePolicy};
use crate::store::{composite_key, CounterStore, InMemoryCounterStore};
use crate::sweeper::EvictionSweeper;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A counted request: who, under which policy, and the verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub identity: CallerIdentity,
    pub policy: RoutePolicy,
    pub decision: AdmissionDecision,
}

/// What the HTTP layer should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// Not subject to admission control; no counter was touched
    Bypass,
    /// Run the handler and attach the rate limit headers
    Admit(Admission),
    /// Answer 429 without running the handler
    Deny(Admission),
}

impl GatewayOutcome {
    pub fn admission(&self) -> Option<&Admission> {
        match self {
            GatewayOutcome::Bypass => None,
            GatewayOutcome::Admit(admission) | GatewayOutcome::Deny(admission) => Some(admission),
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, GatewayOutcome::Deny(_))
    }
}

/// Admission control for inbound API requests.
#[derive(Clone)]
pub struct Gateway {
    policies: Arc<PolicyTable>,
    bypass: BypassRules,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    resolver: IdentityResolver,
}

impl Gateway {
    pub fn new(
        policies: PolicyTable,
        bypass: BypassRules,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        resolver: IdentityResolver,
    ) -> Self {
        Self {
            policies: Arc::new(policies),
            bypass,
            store,
            clock,
            resolver,
        }
    }

    /// Reference policies, in-memory store, wall clock, no sessions.
    pub fn with_defaults() -> Self {
        Self::new(
            PolicyTable::reference(),
            BypassRules::default(),
            Arc::new(InMemoryCounterStore::new()),
            Arc::new(SystemClock),
            IdentityResolver::default(),
        )
    }

    /// Build from configuration with the given session provider.
    pub fn from_config(config: &GatewayConfig, provider: Arc<dyn SessionProvider>) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            config.load_policies()?,
            config.bypass_rules(),
            Arc::new(InMemoryCounterStore::new()),
            Arc::new(SystemClock),
            IdentityResolver::new(provider),
        ))
    }

    /// Decide what to do with one inbound request.
    ///
    /// Bypassed paths return before identity resolution. Counting happens
    /// after the only suspension point (the session lookup), so the store
    /// update and the decision see the same instant.
    pub async fn evaluate(&self, request: &RequestInfo) -> GatewayOutcome {
        if self.bypass.should_bypass(&request.path) {
            debug!(path = %request.path, "Bypassing admission control");
            return GatewayOutcome::Bypass;
        }

        let identity = self.resolver.resolve(request).await;
        self.admit_identity(identity, &request.path)
    }

    /// Count a request from an already resolved caller and decide it.
    pub fn admit_identity(&self, identity: CallerIdentity, path: &str) -> GatewayOutcome {
        let policy = self.policies.match_path(path).clone();
        let key = composite_key(&identity.key_fragment(), path);

        let now = self.clock.now();
        let counter = self.store.hit(&key, policy.window_ms, now);
        let decision = AdmissionDecision::evaluate(&counter, &policy, now);

        let allowed = decision.allowed;
        let admission = Admission {
            identity,
            policy,
            decision,
        };

        if allowed {
            GatewayOutcome::Admit(admission)
        } else {
            GatewayOutcome::Deny(admission)
        }
    }

    /// Eviction sweeper bound to this gateway's store and clock.
    pub fn sweeper(&self, interval: Duration) -> EvictionSweeper {
        EvictionSweeper::new(Arc::clone(&self.store), Arc::clone(&self.clock), interval)
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn bypass_rules(&self) -> &BypassRules {
        &self.bypass
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("policies", &self.policies)
            .field("bypass", &self.bypass)
            .field("counters", &self.store.len())
            .finish_non_exhaustive()
    }
}
