//! Token provider port (driven/secondary port)
//!
//! This module defines how the engine obtains OAuth access tokens. The
//! interactive flow (browser consent, redirect capture) is entirely the
//! adapter's business; the engine only calls `authorize` once per session
//! and `refresh` when a token is about to expire or was rejected.
//!
//! ## Design Notes
//!
//! - Errors are typed (`AuthError`) because every authorization failure is
//!   fatal to the session and maps to its own exit code.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Tokens
// ============================================================================

/// OAuth tokens issued by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Bearer token for API requests
    pub access_token: String,
    /// Token for refreshing the access token without user interaction
    pub refresh_token: Option<String>,
    /// When the access token expires, if the provider said so
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    /// Creates a token with no refresh token and unknown expiry
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Returns true if the access token has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }

    /// Returns true if the access token will expire within the given duration
    pub fn expires_within(&self, duration: chrono::Duration) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() + duration >= at)
    }
}

/// Credentials and scopes for one authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
}

// ============================================================================
// Errors
// ============================================================================

/// Authorization failures; all of them abort the session
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Client id/secret missing or malformed
    #[error("Invalid OAuth configuration: {0}")]
    Configuration(String),

    /// The user or the provider refused consent
    #[error("Authorization denied: {0}")]
    Denied(String),

    /// The redirect or the token endpoint did not answer in time
    #[error("Timed out after {0:?} waiting for authorization")]
    Timeout(Duration),

    /// The session was stopped before a token was obtained
    #[error("Authorization cancelled")]
    Cancelled,

    /// Receiving the redirect failed
    #[error("Authorization callback failed: {0}")]
    Callback(String),

    /// Exchanging the authorization code failed
    #[error("Token exchange failed: {0}")]
    Exchange(String),

    /// Refreshing the access token failed
    #[error("Token refresh failed: {0}")]
    Refresh(String),
}

// ============================================================================
// Trait
// ============================================================================

/// Port for obtaining OAuth access tokens
#[async_trait::async_trait]
pub trait ITokenProvider: Send + Sync {
    /// Obtains a token, running the interactive flow if needed
    async fn authorize(&self, request: &AuthRequest) -> Result<Token, AuthError>;

    /// Exchanges the token's refresh token for a new access token
    async fn refresh(&self, request: &AuthRequest, token: &Token) -> Result<Token, AuthError>;
}
