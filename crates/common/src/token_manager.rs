//! OAuth 2.0 client credentials token manager for Azure Resource Manager.
//!
//! Acquires a bearer token from the Azure AD token endpoint of a tenant and
//! keeps it fresh in a background task, so that long chaos runs (tens of
//! minutes) never submit a cloud request with an expired token.
//!
//! # Features
//!
//! - Automatic refresh before expiration (configurable threshold)
//! - Exponential backoff on refresh failures (1s, 2s, 4s, ..., max 30s)
//! - Lock-free reads via `tokio::sync::watch`
//! - Infinite retry on failures (caller controls startup timeout)
//!
//! # Example
//!
//! ```rust,ignore
//! use common::token_manager::{spawn_token_manager, TokenManagerConfig};
//! use common::secret::SecretString;
//!
//! let config = TokenManagerConfig::azure(
//!     "tenant-id".to_string(),
//!     "client-id".to_string(),
//!     SecretString::from("secret"),
//! );
//!
//! let (task_handle, token_rx) = spawn_token_manager(config).await?;
//! let header = format!("Bearer {}", token_rx.token().expose_secret());
//! ```
//!
//! # Security
//!
//! - Client secret and token are stored as `SecretString` (never logged)
//! - Acquisition/refresh events are logged without values

use crate::secret::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

// =============================================================================
// Constants
// =============================================================================

/// Default Azure AD authority.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Scope granting access to Azure Resource Manager.
pub const ARM_SCOPE: &str = "https://management.azure.com/.default";

/// Default refresh threshold (5 minutes before expiration).
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(300);

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const INITIAL_BACKOFF_MS: u64 = 1000;

const MAX_BACKOFF_MS: u64 = 30_000;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Margin subtracted from the token lifetime to absorb clock drift between
/// this host and the token issuer.
const CLOCK_DRIFT_MARGIN_SECS: i64 = 30;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during token management.
#[derive(Error, Debug, Clone)]
pub enum TokenError {
    /// Token acquisition failed.
    #[error("Token acquisition failed: {0}")]
    AcquisitionFailed(String),

    /// HTTP client error.
    #[error("HTTP client error: {0}")]
    HttpError(String),

    /// Credentials rejected by the token endpoint (400, 401).
    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// Token response parsing failed.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Watch channel closed unexpectedly.
    #[error("Token channel closed")]
    ChannelClosed,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the token manager.
#[derive(Clone)]
pub struct TokenManagerConfig {
    /// Authority base URL (e.g. `https://login.microsoftonline.com`).
    pub authority: String,

    /// Azure AD tenant the service principal lives in.
    pub tenant_id: String,

    /// Service principal (application) ID.
    pub client_id: String,

    /// Service principal secret.
    pub client_secret: SecretString,

    /// Requested scope.
    pub scope: String,

    /// Refresh the token this long before it expires.
    pub refresh_threshold: Duration,

    /// HTTP request timeout.
    pub http_timeout: Duration,
}

impl std::fmt::Debug for TokenManagerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManagerConfig")
            .field("authority", &self.authority)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("refresh_threshold", &self.refresh_threshold)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl TokenManagerConfig {
    /// Configuration for an ARM token issued by the public Azure AD authority.
    #[must_use]
    pub fn azure(tenant_id: String, client_id: String, client_secret: SecretString) -> Self {
        Self {
            authority: DEFAULT_AUTHORITY.to_string(),
            tenant_id,
            client_id,
            client_secret,
            scope: ARM_SCOPE.to_string(),
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Override the authority (sovereign clouds, tests).
    #[must_use]
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    /// Set the refresh threshold.
    #[must_use]
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Full URL of the v2.0 token endpoint for the configured tenant.
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

// =============================================================================
// Token Receiver
// =============================================================================

/// Cheap, cloneable handle to the current token.
///
/// Never holds the watch borrow across calls, so the refresh task is never
/// blocked by readers.
#[derive(Clone)]
pub struct TokenReceiver(watch::Receiver<SecretString>);

impl TokenReceiver {
    /// Wrap an existing watch receiver (tests and static tokens).
    #[must_use]
    pub fn from_watch_receiver(receiver: watch::Receiver<SecretString>) -> Self {
        Self(receiver)
    }

    /// Get the current token.
    #[must_use]
    pub fn token(&self) -> SecretString {
        self.0.borrow().clone()
    }

    /// Wait for the token to change.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::ChannelClosed` if the sender is dropped.
    pub async fn changed(&mut self) -> Result<(), TokenError> {
        self.0
            .changed()
            .await
            .map_err(|_| TokenError::ChannelClosed)
    }
}

impl std::fmt::Debug for TokenReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenReceiver")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// OAuth Response Types
// =============================================================================

#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[allow(dead_code)]
    token_type: String,
    expires_in: u64,
}

impl std::fmt::Debug for OAuthTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

// =============================================================================
// Token Manager Function
// =============================================================================

/// Spawn the token manager background task.
///
/// Returns once the first token has been acquired; from then on the
/// receiver always holds a non-empty token. Stop the task by aborting the
/// returned handle.
///
/// # Errors
///
/// - `TokenError::Configuration` - If the HTTP client cannot be built
/// - `TokenError::ChannelClosed` - If the task exits before the first token
#[instrument(skip_all, fields(client_id = %config.client_id))]
pub async fn spawn_token_manager(
    config: TokenManagerConfig,
) -> Result<(JoinHandle<()>, TokenReceiver), TokenError> {
    let http_client = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .build()
        .map_err(|e| TokenError::Configuration(format!("Failed to build HTTP client: {e}")))?;

    let (sender, mut receiver) = watch::channel(SecretString::from(""));

    let task_handle = tokio::spawn(async move {
        token_refresh_loop(config, http_client, sender).await;
    });

    receiver
        .changed()
        .await
        .map_err(|_| TokenError::ChannelClosed)?;

    if receiver.borrow().expose_secret().is_empty() {
        return Err(TokenError::AcquisitionFailed(
            "Token is empty after acquisition".into(),
        ));
    }

    Ok((task_handle, TokenReceiver(receiver)))
}

#[instrument(skip_all)]
async fn token_refresh_loop(
    config: TokenManagerConfig,
    http_client: reqwest::Client,
    sender: watch::Sender<SecretString>,
) {
    let mut backoff = INITIAL_BACKOFF_MS;
    let mut expires_at: Option<i64> = None;
    let mut initial_acquisition = true;

    loop {
        let needs_refresh = match expires_at {
            Some(exp) => {
                let now = chrono::Utc::now().timestamp();
                #[allow(clippy::cast_possible_wrap)]
                let threshold_secs = config.refresh_threshold.as_secs() as i64;
                exp - now <= threshold_secs + CLOCK_DRIFT_MARGIN_SECS
            }
            None => true,
        };

        if needs_refresh {
            match acquire_token(&config, &http_client).await {
                Ok((token, new_expires_at)) => {
                    expires_at = Some(new_expires_at);

                    if sender.send(token).is_err() {
                        debug!(
                            target: "common.token_manager",
                            client_id = %config.client_id,
                            "All receivers dropped, stopping refresh loop"
                        );
                        break;
                    }

                    if initial_acquisition {
                        info!(
                            target: "common.token_manager",
                            client_id = %config.client_id,
                            tenant_id = %config.tenant_id,
                            "Initial ARM token acquired"
                        );
                        initial_acquisition = false;
                    } else {
                        debug!(
                            target: "common.token_manager",
                            client_id = %config.client_id,
                            "ARM token refreshed"
                        );
                    }

                    backoff = INITIAL_BACKOFF_MS;
                }
                Err(e) => {
                    if sender.is_closed() {
                        debug!(
                            target: "common.token_manager",
                            client_id = %config.client_id,
                            "Caller gave up waiting for a token, stopping refresh loop"
                        );
                        break;
                    }

                    warn!(
                        target: "common.token_manager",
                        client_id = %config.client_id,
                        error = %e,
                        backoff_ms = backoff,
                        "Token acquisition failed, will retry"
                    );

                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_MS);
                    continue;
                }
            }
        }

        let sleep_duration = match expires_at {
            Some(exp) => {
                let now = chrono::Utc::now().timestamp();
                #[allow(clippy::cast_possible_wrap)]
                let threshold_secs = config.refresh_threshold.as_secs() as i64;
                let refresh_at = exp - threshold_secs - CLOCK_DRIFT_MARGIN_SECS;
                let sleep_secs = (refresh_at - now).max(1);
                #[allow(clippy::cast_sign_loss)]
                Duration::from_secs(sleep_secs as u64)
            }
            None => Duration::from_secs(1),
        };

        tokio::time::sleep(sleep_duration).await;
    }
}

/// Acquire a new token; returns it with its expiry as a Unix timestamp.
#[instrument(skip_all)]
async fn acquire_token(
    config: &TokenManagerConfig,
    http_client: &reqwest::Client,
) -> Result<(SecretString, i64), TokenError> {
    let url = config.token_endpoint();

    debug!(
        target: "common.token_manager",
        client_id = %config.client_id,
        url = %url,
        "Requesting token"
    );

    let form_body = [
        ("grant_type", "client_credentials"),
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.expose_secret()),
        ("scope", config.scope.as_str()),
    ];

    let response = http_client
        .post(&url)
        .form(&form_body)
        .send()
        .await
        .map_err(|e| TokenError::HttpError(e.to_string()))?;

    let status = response.status();

    if status.is_success() {
        let token_response: OAuthTokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::InvalidResponse(e.to_string()))?;

        let now = chrono::Utc::now().timestamp();
        #[allow(clippy::cast_possible_wrap)]
        let expires_at = now + token_response.expires_in as i64;

        Ok((SecretString::from(token_response.access_token), expires_at))
    } else if status.as_u16() == 401 || status.as_u16() == 400 {
        let body = response.text().await.unwrap_or_else(|e| {
            trace!(target: "common.token_manager", error = %e, "Failed to read error response body");
            "<failed to read body>".to_string()
        });
        warn!(
            target: "common.token_manager",
            status = %status,
            "Credentials rejected by token endpoint"
        );
        trace!(
            target: "common.token_manager",
            body = %body,
            "Rejection response body"
        );
        Err(TokenError::AuthenticationRejected(format!("Status {status}")))
    } else {
        Err(TokenError::HttpError(format!("Unexpected status: {status}")))
    }
}

// =============================================================================
// Tests
// =============================================================================
