//! Access-token management for the upload channel.
//!
//! The channel authenticates with a JWT carried in the connection URL.
//! Before connecting, the token's `exp` claim is checked; stale tokens are
//! refreshed through a [`TokenRefresher`]. Concurrent callers share a single
//! in-flight refresh.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use pkgdeploy_protocol::constants::TOKEN_EXPIRY_SKEW;

/// Errors from token handling.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TokenError {
    #[error("access token expired and no refresh is configured")]
    NoRefresher,

    #[error("token refresh failed: {0}")]
    Refresh(String),
}

/// Boxed future returned by [`TokenRefresher::refresh`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = Result<String, TokenError>> + Send + 'a>>;

/// Obtains a fresh access token.
pub trait TokenRefresher: Send + Sync + 'static {
    fn refresh(&self) -> RefreshFuture<'_>;
}

/// Returns the `exp` claim of a JWT, or `None` if it cannot be decoded.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    #[derive(Deserialize)]
    struct Claims {
        exp: Option<i64>,
    }

    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claims.exp?, 0)
}

/// `true` if the token is undecodable or expires within `skew` of `now`.
pub fn is_expired(token: &str, skew: Duration, now: DateTime<Utc>) -> bool {
    let skew = chrono::Duration::from_std(skew).unwrap_or_else(|_| chrono::Duration::zero());
    match jwt_expiry(token) {
        Some(exp) => exp <= now + skew,
        None => true,
    }
}

#[derive(Debug, Default)]
struct RefreshState {
    last: Option<Result<String, TokenError>>,
}

/// Holds the current access token and deduplicates refreshes.
pub struct TokenManager {
    current: RwLock<String>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    refresh: Mutex<RefreshState>,
    generation: AtomicU64,
    skew: Duration,
}

impl TokenManager {
    pub fn new(token: impl Into<String>, refresher: Option<Arc<dyn TokenRefresher>>) -> Self {
        Self {
            current: RwLock::new(token.into()),
            refresher,
            refresh: Mutex::new(RefreshState::default()),
            generation: AtomicU64::new(0),
            skew: TOKEN_EXPIRY_SKEW,
        }
    }

    /// Overrides the expiry skew.
    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    /// Current token, without validity checks.
    pub fn current(&self) -> String {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Returns a token that is not known to be expired, refreshing if needed.
    pub async fn valid_token(&self) -> Result<String, TokenError> {
        let seen = self.generation.load(Ordering::Acquire);
        let token = self.current();
        if !is_expired(&token, self.skew, Utc::now()) {
            return Ok(token);
        }
        debug!("access token expired or undecodable, refreshing");
        self.refresh_from(seen).await
    }

    /// Refreshes regardless of the token's claims, e.g. after the server
    /// rejected it.
    pub async fn force_refresh(&self) -> Result<String, TokenError> {
        let seen = self.generation.load(Ordering::Acquire);
        self.refresh_from(seen).await
    }

    /// Runs a refresh unless one completed since generation `seen`, in
    /// which case its result is shared.
    async fn refresh_from(&self, seen: u64) -> Result<String, TokenError> {
        let mut state = self.refresh.lock().await;

        if self.generation.load(Ordering::Acquire) != seen {
            if let Some(last) = &state.last {
                debug!("joining completed token refresh");
                return last.clone();
            }
        }

        let Some(refresher) = &self.refresher else {
            return Err(TokenError::NoRefresher);
        };

        let result = refresher.refresh().await;
        match &result {
            Ok(token) => {
                info!("access token refreshed");
                *self.current.write().unwrap_or_else(|e| e.into_inner()) = token.clone();
            }
            Err(e) => warn!(error = %e, "token refresh failed"),
        }
        state.last = Some(result.clone());
        self.generation.fetch_add(1, Ordering::AcqRel);
        result
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("has_refresher", &self.refresher.is_some())
            .field("skew", &self.skew)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(alias = "token", alias = "access_token")]
    access_token: String,
}

/// Refreshes tokens against an HTTP endpoint.
///
/// Sends `POST {endpoint}` with `{"refreshToken": ...}` and expects
/// `{"accessToken": ...}` (or `token`) back.
pub struct HttpTokenRefresher {
    http: reqwest::Client,
    endpoint: String,
    refresh_token: String,
}

impl HttpTokenRefresher {
    pub fn new(endpoint: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            refresh_token: refresh_token.into(),
        }
    }

    async fn request(&self) -> Result<String, TokenError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&serde_json::json!({ "refreshToken": self.refresh_token }))
            .send()
            .await
            .map_err(|e| TokenError::Refresh(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TokenError::Refresh(format!("HTTP {}: {body}", status.as_u16())));
        }

        let parsed: RefreshResponse = resp
            .json()
            .await
            .map_err(|e| TokenError::Refresh(e.to_string()))?;
        Ok(parsed.access_token)
    }
}

impl TokenRefresher for HttpTokenRefresher {
    fn refresh(&self) -> RefreshFuture<'_> {
        Box::pin(self.request())
    }
}
