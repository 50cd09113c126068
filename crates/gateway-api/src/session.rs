//! Session lookups against the auth service
//!
//! [`RemoteSessionProvider`] reads the access token from a cookie and asks the
//! auth service who it belongs to (`GET {url}` with a bearer token, the shape
//! of a Supabase `/auth/v1/user` call). Only compiled with the
//! `remote-session` feature.
//!
//! | Auth service reply | Result |
//! |--------------------|--------|
//! | 2xx with `{ "id", "email" }` | `Ok(Some(session))` |
//! | 401 / 403 | `Ok(None)` |
//! | other status | `Err(SessionError::Unexpected)` |
//! | network failure / timeout | `Err(SessionError::Transport)` |
//!
//! The gateway treats every `Err` as "anonymous", so an auth outage degrades
//! to IP-based limits rather than failing requests.

use admitgate_gateway_core::{Cookies, Session, SessionConfig, SessionError, SessionProvider};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

/// User record returned by the auth service
#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// [`SessionProvider`] backed by an HTTP auth endpoint.
#[derive(Debug, Clone)]
pub struct RemoteSessionProvider {
    client: reqwest::Client,
    url: String,
    cookie_name: String,
    api_key: Option<String>,
}

impl RemoteSessionProvider {
    /// Build a provider for `url`, using the cookie, API key and timeout from
    /// `config`.
    pub fn new(url: impl Into<String>, config: &SessionConfig) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            cookie_name: config.cookie_name.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Build a provider from configuration, or `None` when no URL is set.
    pub fn from_config(config: &SessionConfig) -> Result<Option<Self>, SessionError> {
        match &config.url {
            Some(url) => Self::new(url.clone(), config).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SessionProvider for RemoteSessionProvider {
    async fn get_session(&self, cookies: &Cookies) -> Result<Option<Session>, SessionError> {
        let Some(token) = cookies.get(&self.cookie_name).filter(|t| !t.is_empty()) else {
            return Ok(None);
        };

        let mut request = self.client.get(&self.url).bearer_auth(token);
        if let Some(api_key) = &self.api_key {
            request = request.header("apikey", api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let user: UserResponse = response
                    .json()
                    .await
                    .map_err(|e| SessionError::Decode(e.to_string()))?;
                Ok(Some(Session {
                    user_id: user.id,
                    email: user.email,
                }))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                debug!("Session token rejected by auth service");
                Ok(None)
            }
            status => Err(SessionError::Unexpected(status.as_u16())),
        }
    }
}
