//! Caller identity resolution
//!
//! Every request is scoped to either an authenticated user (when the session
//! provider recognizes the request's cookies) or a client IP address.
//!
//! # Resolution Chain
//!
//! 1. **Session**: ask the [`SessionProvider`] for a session; a non-empty user
//!    id yields [`CallerIdentity::Authenticated`].
//! 2. **IP**: otherwise take the first entry of `X-Forwarded-For`, then
//!    `X-Real-IP`, then the literal `anonymous`.
//!
//! Session lookup failures fall through to step 2. An auth outage must never
//! stop admission from running.
//!
//! # Security Considerations
//!
//! Forwarded headers are taken at face value. Callers that can reach the
//! gateway directly can pick their own IP bucket.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Header carrying the proxy chain, client first
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Header carrying the client address set by a single proxy
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// IP placeholder when no forwarding header is present
pub const ANONYMOUS_IP: &str = "anonymous";

/// Who a request is counted against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallerIdentity {
    Authenticated { user_id: String },
    Anonymous { ip_address: String },
}

impl CallerIdentity {
    /// Identity half of the counter key (`user-<id>` or `ip-<addr>`).
    pub fn key_fragment(&self) -> String {
        match self {
            CallerIdentity::Authenticated { user_id } => format!("user-{}", user_id),
            CallerIdentity::Anonymous { ip_address } => format!("ip-{}", ip_address),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, CallerIdentity::Authenticated { .. })
    }
}

impl std::fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key_fragment())
    }
}

/// Parsed `Cookie` header(s), in the order they were sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookies {
    pairs: Vec<(String, String)>,
}

impl Cookies {
    /// Parse a `Cookie` header value (`a=1; b=2`).
    ///
    /// Segments without `=` are ignored.
    pub fn parse(header: &str) -> Self {
        let mut cookies = Self::default();
        cookies.extend_from_header(header);
        cookies
    }

    /// Append the pairs from another `Cookie` header value.
    pub fn extend_from_header(&mut self, header: &str) {
        for segment in header.split(';') {
            if let Some((name, value)) = segment.split_once('=') {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let value = value.trim().trim_matches('"');
                self.pairs.push((name.to_string(), value.to_string()));
            }
        }
    }

    /// First value sent for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// The parts of an inbound request the gateway looks at.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub path: String,
    pub forwarded_for: Option<String>,
    pub real_ip: Option<String>,
    pub cookies: Cookies,
}

impl RequestInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_forwarded_for(mut self, value: impl Into<String>) -> Self {
        self.forwarded_for = Some(value.into());
        self
    }

    pub fn with_real_ip(mut self, value: impl Into<String>) -> Self {
        self.real_ip = Some(value.into());
        self
    }

    pub fn with_cookies(mut self, header: &str) -> Self {
        self.cookies = Cookies::parse(header);
        self
    }

    /// Client address derived from forwarding headers.
    pub fn client_ip(&self) -> String {
        let forwarded = self
            .forwarded_for
            .as_deref()
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());

        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        self.real_ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .unwrap_or(ANONYMOUS_IP)
            .to_string()
    }
}

/// An authenticated session as reported by the session provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub email: Option<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
        }
    }
}

/// Session lookup failures. The resolver swallows all of them.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session lookup failed: {0}")]
    Transport(String),

    #[error("Session provider returned unexpected status {0}")]
    Unexpected(u16),

    #[error("Could not decode session: {0}")]
    Decode(String),
}

/// Cookie-based session lookup owned by the auth subsystem.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Return the session for these cookies, `Ok(None)` when there is none.
    async fn get_session(&self, cookies: &Cookies) -> Result<Option<Session>, SessionError>;
}

/// Provider for deployments without authentication; everyone is anonymous.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSessionProvider;

#[async_trait]
impl SessionProvider for NoSessionProvider {
    async fn get_session(&self, _cookies: &Cookies) -> Result<Option<Session>, SessionError> {
        Ok(None)
    }
}

/// In-memory provider mapping a cookie's value to a session.
#[derive(Debug, Clone)]
pub struct StaticSessionProvider {
    cookie_name: String,
    sessions: HashMap<String, Session>,
}

impl StaticSessionProvider {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            sessions: HashMap::new(),
        }
    }

    pub fn with_session(mut self, token: impl Into<String>, session: Session) -> Self {
        self.sessions.insert(token.into(), session);
        self
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn get_session(&self, cookies: &Cookies) -> Result<Option<Session>, SessionError> {
        Ok(cookies
            .get(&self.cookie_name)
            .and_then(|token| self.sessions.get(token))
            .cloned())
    }
}

/// Turns requests into [`CallerIdentity`] values.
#[derive(Clone)]
pub struct IdentityResolver {
    provider: Arc<dyn SessionProvider>,
}

impl IdentityResolver {
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        Self { provider }
    }

    /// Resolve the caller, preferring the session and falling back to IP.
    pub async fn resolve(&self, request: &RequestInfo) -> CallerIdentity {
        match self.provider.get_session(&request.cookies).await {
            Ok(Some(session)) if !session.user_id.is_empty() => {
                return CallerIdentity::Authenticated {
                    user_id: session.user_id,
                };
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, path = %request.path, "Session lookup failed, using client IP");
            }
        }

        CallerIdentity::Anonymous {
            ip_address: request.client_ip(),
        }
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(Arc::new(NoSessionProvider))
    }
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver").finish_non_exhaustive()
    }
}
