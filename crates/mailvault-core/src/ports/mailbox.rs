//! Mailbox provider port (driven/secondary port)
//!
//! This module defines the interface for listing and downloading messages
//! from a remote mailbox. Implementations exist for Gmail and Office 365;
//! tests use in-memory fakes.
//!
//! ## Design Notes
//!
//! - Errors are classified (`ProviderError`) so the scheduler can decide
//!   between retrying, refreshing the token and giving up.
//! - The access token is passed per call; token lifetime is owned by the
//!   engine, not the adapter.

use std::time::Duration;

use thiserror::Error;

use crate::domain::filter::FilterSpec;
use crate::domain::message::MessageRef;
use crate::domain::newtypes::PageToken;

/// One page of a remote listing
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    /// Messages on this page, in provider order
    pub messages: Vec<MessageRef>,
    /// Continuation token; `None` when the listing is exhausted
    pub next_page: Option<PageToken>,
}

/// Classified failure of a remote call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Access token rejected (HTTP 401)
    #[error("Unauthorized: access token rejected")]
    Unauthorized,

    /// Message or resource does not exist (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limited (HTTP 429)
    #[error("Rate limited, retry after {retry_after:?}")]
    TooManyRequests { retry_after: Duration },

    /// Server-side failure (HTTP 5xx)
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Request rejected for another reason (other HTTP 4xx)
    #[error("Request failed with {status}: {message}")]
    Request { status: u16, message: String },

    /// Connection-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// The call did not finish within the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Response body could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Returns true if the same call may succeed when retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::TooManyRequests { .. }
                | ProviderError::Server { .. }
                | ProviderError::Network(_)
                | ProviderError::Timeout(_)
        )
    }

    /// Numeric code reported in `MessageError` events
    ///
    /// HTTP failures use their status; transport failures use negative codes.
    pub fn code(&self) -> i32 {
        match self {
            ProviderError::Unauthorized => 401,
            ProviderError::NotFound(_) => 404,
            ProviderError::TooManyRequests { .. } => 429,
            ProviderError::Server { status, .. } | ProviderError::Request { status, .. } => {
                i32::from(*status)
            }
            ProviderError::Network(_) => -1,
            ProviderError::Timeout(_) => -2,
            ProviderError::InvalidResponse(_) => -3,
        }
    }

    /// Server-requested wait before retrying, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::TooManyRequests { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Port for a remote mailbox
#[async_trait::async_trait]
pub trait IMailboxProvider: Send + Sync {
    /// Short provider name used in logs ("gmail", "office365")
    fn name(&self) -> &str;

    /// OAuth scopes needed for read-only mailbox access
    fn default_scopes(&self) -> Vec<String>;

    /// Fetches one page of messages matching `filter`
    ///
    /// `page` is `None` for the first page and the previous page's
    /// `next_page` afterwards.
    async fn list_page(
        &self,
        access_token: &str,
        filter: &FilterSpec,
        page: Option<&PageToken>,
    ) -> Result<MessagePage, ProviderError>;

    /// Downloads the full RFC 822 content of a message
    async fn fetch_message(
        &self,
        access_token: &str,
        message: &MessageRef,
    ) -> Result<Vec<u8>, ProviderError>;
}
