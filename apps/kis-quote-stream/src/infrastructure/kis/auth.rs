//! KIS Credential Lifecycle
//!
//! Two credentials gate every KIS call:
//!
//! - **Access token** (`POST /oauth2/tokenP`): bearer for REST calls. KIS
//!   rate-limits issuance, so the token is shared across processes through
//!   a [`TokenCache`] file and refreshed only when it nears expiry.
//! - **Approval key** (`POST /oauth2/Approval`): WebSocket session key.
//!   Fetched at most once per [`TokenStore`] and never persisted.
//!
//! # Token Expiry
//!
//! The server-declared expiry comes from `access_token_token_expired`
//! (KST wall-clock), falling back to `expires_in`, then to 24 hours. The
//! effective expiry is the earlier of `now + 12h` and `declared - 60s`.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

use super::messages::{ApprovalRequest, ApprovalResponse, TokenRequest, TokenResponse};
use super::token_cache::TokenCache;
use crate::application::ports::Clock;
use crate::infrastructure::config::Credentials;
use crate::infrastructure::metrics;

// =============================================================================
// Constants
// =============================================================================

/// Longest lifetime ever granted to a cached token.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::hours(12);

/// Margin subtracted from the server-declared expiry.
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::seconds(60);

/// Assumed lifetime when the server declares none.
const DEFAULT_DECLARED_LIFETIME: Duration = Duration::hours(24);

const TOKEN_PATH: &str = "/oauth2/tokenP";
const APPROVAL_PATH: &str = "/oauth2/Approval";
const GRANT_TYPE: &str = "client_credentials";
const DECLARED_EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const KST_OFFSET_SECS: i32 = 9 * 3600;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while acquiring credentials.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Request never produced a response.
    #[error("credential request failed: {0}")]
    Transport(String),

    /// Endpoint answered with a non-2xx status.
    #[error("credential request rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Response could not be interpreted.
    #[error("invalid credential response: {0}")]
    InvalidResponse(String),

    /// App key or secret is empty.
    #[error("app key and secret are required")]
    MissingCredentials,
}

// =============================================================================
// Credential Types
// =============================================================================

/// Bearer token with its effective expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Create a token.
    #[must_use]
    pub const fn new(value: String, expires_at: DateTime<Utc>) -> Self {
        Self { value, expires_at }
    }

    /// Token value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Effective expiry.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Check whether the token may still be used at `now`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// WebSocket approval key.
#[derive(Clone, PartialEq, Eq)]
pub struct ApprovalKey(String);

impl ApprovalKey {
    /// Create an approval key.
    #[must_use]
    pub const fn new(value: String) -> Self {
        Self(value)
    }

    /// Key value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApprovalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApprovalKey([REDACTED])")
    }
}

// =============================================================================
// Token Store
// =============================================================================

/// Owner of the access token and approval key.
///
/// Shared as `Arc<TokenStore>` by the REST and streaming clients.
pub struct TokenStore {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    cache: TokenCache,
    clock: Arc<dyn Clock>,
    current: tokio::sync::Mutex<Option<AccessToken>>,
    approval: tokio::sync::OnceCell<ApprovalKey>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .field("cache", &self.cache.path())
            .field("approval_cached", &self.approval.initialized())
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    /// Create a token store.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingCredentials`] if the app key or secret
    /// is empty.
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        credentials: Credentials,
        cache: TokenCache,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthError> {
        if credentials.app_key().is_empty() || credentials.app_secret().is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            cache,
            clock,
            current: tokio::sync::Mutex::new(None),
            approval: tokio::sync::OnceCell::new(),
        })
    }

    /// App credentials, for signing REST requests.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Time source shared with the clients built on this store.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Return a valid access token, refreshing it if needed.
    ///
    /// Checks memory, then the cache file (another process may have
    /// refreshed it), then requests a new token. Concurrent callers wait
    /// on one refresh.
    ///
    /// # Errors
    ///
    /// Returns an error if a new token is needed and the request fails or
    /// the response is unusable. Neither memory nor the cache file is
    /// updated in that case.
    pub async fn get_access_token(&self) -> Result<AccessToken, AuthError> {
        let mut current = self.current.lock().await;
        let now = self.clock.now();

        if let Some(token) = current.as_ref().filter(|t| t.is_valid_at(now)) {
            return Ok(token.clone());
        }

        if let Some(token) = self.cache.load(now) {
            tracing::debug!(expires_at = %token.expires_at(), "Using cached access token");
            *current = Some(token.clone());
            return Ok(token);
        }

        let token = self.fetch_access_token().await?;
        if let Err(e) = self.cache.save(&token) {
            tracing::warn!(
                path = %self.cache.path().display(),
                error = %e,
                "Failed to persist access token"
            );
        }

        tracing::info!(expires_at = %token.expires_at(), "Access token refreshed");
        *current = Some(token.clone());
        Ok(token)
    }

    /// Read the cache file without touching the network.
    #[must_use]
    pub fn load_cached(&self) -> Option<AccessToken> {
        self.cache.load(self.clock.now())
    }

    /// Return the approval key, fetching it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. A later call tries again.
    pub async fn get_approval_key(&self) -> Result<ApprovalKey, AuthError> {
        self.approval
            .get_or_try_init(|| self.fetch_approval_key())
            .await
            .cloned()
    }

    async fn fetch_access_token(&self) -> Result<AccessToken, AuthError> {
        let request = TokenRequest {
            grant_type: GRANT_TYPE,
            appkey: self.credentials.app_key(),
            appsecret: self.credentials.app_secret(),
        };
        let response: TokenResponse = self.post_json(TOKEN_PATH, &request).await?;
        if response.access_token.trim().is_empty() {
            return Err(AuthError::InvalidResponse("empty access_token".to_string()));
        }

        let now = self.clock.now();
        let expires_at = effective_expiry(&response, now)?;
        metrics::record_credential_issued("access_token");
        Ok(AccessToken::new(response.access_token, expires_at))
    }

    async fn fetch_approval_key(&self) -> Result<ApprovalKey, AuthError> {
        let request = ApprovalRequest {
            grant_type: GRANT_TYPE,
            appkey: self.credentials.app_key(),
            secretkey: self.credentials.app_secret(),
        };
        let response: ApprovalResponse = self.post_json(APPROVAL_PATH, &request).await?;
        if response.approval_key.trim().is_empty() {
            return Err(AuthError::InvalidResponse("empty approval_key".to_string()));
        }

        tracing::info!("Approval key issued");
        metrics::record_credential_issued("approval_key");
        Ok(ApprovalKey::new(response.approval_key))
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, AuthError>
    where
        B: serde::Serialize + Sync,
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !status.is_success() {
            tracing::warn!(path, status = status.as_u16(), "Credential request rejected");
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }
}

/// Compute the effective expiry of a freshly issued token.
fn effective_expiry(
    response: &TokenResponse,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, AuthError> {
    let declared_timestamp = response
        .access_token_token_expired
        .as_deref()
        .and_then(|raw| match parse_declared_expiry(raw) {
            Ok(expiry) => Some(expiry),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unparsable token expiry timestamp");
                None
            }
        });

    let declared = match (declared_timestamp, response.expires_in) {
        (Some(expiry), _) => expiry,
        (None, Some(secs)) => Duration::try_seconds(secs)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| AuthError::InvalidResponse(format!("expires_in out of range: {secs}")))?,
        (None, None) => now + DEFAULT_DECLARED_LIFETIME,
    };

    if declared <= now {
        return Err(AuthError::InvalidResponse(format!(
            "token declared expired at {declared}"
        )));
    }

    let effective = (now + MAX_TOKEN_LIFETIME).min(declared - EXPIRY_SAFETY_MARGIN);
    if effective <= now {
        return Err(AuthError::InvalidResponse(format!(
            "token lifetime shorter than safety margin (expires {declared})"
        )));
    }
    Ok(effective)
}

fn parse_declared_expiry(raw: &str) -> Result<DateTime<Utc>, AuthError> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), DECLARED_EXPIRY_FORMAT).map_err(|e| {
        AuthError::InvalidResponse(format!("access_token_token_expired {raw:?}: {e}"))
    })?;
    let kst = FixedOffset::east_opt(KST_OFFSET_SECS)
        .ok_or_else(|| AuthError::InvalidResponse("invalid KST offset".to_string()))?;
    kst.from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| AuthError::InvalidResponse(format!("ambiguous expiry {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(expired: Option<&str>, expires_in: Option<i64>) -> TokenResponse {
        TokenResponse {
            access_token: "abc".to_string(),
            access_token_token_expired: expired.map(ToString::to_string),
            token_type: Some("Bearer".to_string()),
            expires_in,
        }
    }

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn declared_expiry_is_read_as_kst() {
        let parsed = parse_declared_expiry("2024-01-02 09:00:00").unwrap();
        assert_eq!(parsed, at("2024-01-02T00:00:00Z"));
    }

    #[test]
    fn effective_expiry_is_capped_at_twelve_hours() {
        let now = at("2024-01-01T00:00:00Z");
        let expiry = effective_expiry(&response(None, Some(86_400)), now).unwrap();
        assert_eq!(expiry, now + Duration::hours(12));
    }

    #[test]
    fn short_declared_lifetime_keeps_safety_margin() {
        let now = at("2024-01-01T00:00:00Z");
        let expiry = effective_expiry(&response(None, Some(600)), now).unwrap();
        assert_eq!(expiry, now + Duration::seconds(540));
    }

    #[test]
    fn declared_timestamp_takes_precedence_over_expires_in() {
        // 2024-01-01 03:00 KST = 2023-12-31 18:00 UTC
        let now = at("2023-12-31T17:00:00Z");
        let expiry =
            effective_expiry(&response(Some("2024-01-01 03:00:00"), Some(86_400)), now).unwrap();
        assert_eq!(expiry, at("2023-12-31T17:59:00Z"));
    }

    #[test]
    fn unparsable_declared_expiry_falls_back_to_expires_in() {
        let now = at("2024-01-01T20:00:00Z");
        let expiry = effective_expiry(
            &response(Some("2024-01-02T09:00:00+09:00"), Some(3_600)),
            now,
        )
        .unwrap();
        assert_eq!(expiry, now + Duration::seconds(3_600) - EXPIRY_SAFETY_MARGIN);
    }

    #[test]
    fn unparsable_declared_expiry_without_expires_in_assumes_a_day() {
        let now = at("2024-01-01T00:00:00Z");
        let expiry = effective_expiry(&response(Some("soon"), None), now).unwrap();
        assert_eq!(expiry, now + MAX_TOKEN_LIFETIME);
    }

    #[test]
    fn missing_declarations_assume_a_day() {
        let now = at("2024-01-01T00:00:00Z");
        let expiry = effective_expiry(&response(None, None), now).unwrap();
        assert_eq!(expiry, now + MAX_TOKEN_LIFETIME);
    }

    #[test]
    fn past_declared_expiry_is_rejected() {
        let now = at("2024-01-02T00:00:00Z");
        let err =
            effective_expiry(&response(Some("2024-01-01 09:00:00"), None), now).unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));
    }

    #[test]
    fn lifetime_inside_margin_is_rejected() {
        let now = at("2024-01-01T00:00:00Z");
        assert!(effective_expiry(&response(None, Some(30)), now).is_err());
    }

    #[test]
    fn malformed_declared_expiry_is_rejected() {
        assert!(parse_declared_expiry("tomorrow").is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let token = AccessToken::new("secret-token".to_string(), Utc::now());
        assert!(!format!("{token:?}").contains("secret-token"));

        let key = ApprovalKey::new("secret-key".to_string());
        assert!(!format!("{key:?}").contains("secret-key"));
    }

    #[test]
    fn token_validity_is_strict() {
        let expiry = at("2024-01-01T00:00:00Z");
        let token = AccessToken::new("abc".to_string(), expiry);
        assert!(token.is_valid_at(expiry - Duration::seconds(1)));
        assert!(!token.is_valid_at(expiry));
    }

    #[test]
    fn empty_credentials_are_rejected() {
        let result = TokenStore::new(
            reqwest::Client::new(),
            "http://localhost",
            Credentials::new(String::new(), "secret".to_string()),
            TokenCache::new("token.json"),
            Arc::new(crate::application::ports::SystemClock),
        );
        assert!(matches!(result, Err(AuthError::MissingCredentials)));
    }
}
