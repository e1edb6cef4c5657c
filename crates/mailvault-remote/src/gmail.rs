//! Gmail API mailbox adapter
//!
//! Lists messages with `users.messages.list` and downloads them with
//! `users.messages.get?format=raw`, which returns the RFC 822 source as
//! base64url.
//!
//! ## Filtering
//!
//! The user query (`in:sent`, `from:alice`) is passed through as `q`. Date
//! bounds are appended as `after:` / `before:` terms; `before:` is exclusive
//! in Gmail, so the inclusive end date is shifted by one day.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use mailvault_core::domain::{FilterSpec, MessageId, MessageMetadata, MessageRef, PageToken};
use mailvault_core::ports::{IMailboxProvider, MessagePage, ProviderError};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::ApiClient;
use crate::provider::ProviderKind;

/// Base URL for the Gmail API v1
const GMAIL_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// Page size for listing (Gmail maximum)
const PAGE_SIZE: u32 = 500;

// ============================================================================
// Gmail API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<ListedMessage>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListedMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    raw: String,
}

// ============================================================================
// GmailProvider
// ============================================================================

/// [`IMailboxProvider`] backed by the Gmail REST API
pub struct GmailProvider {
    api: ApiClient,
}

impl GmailProvider {
    /// Creates a provider talking to the production Gmail API
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Self::with_base_url(GMAIL_BASE_URL, timeout)
    }

    /// Creates a provider with a custom base URL (useful for testing)
    pub fn with_base_url(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            api: ApiClient::new(base_url, timeout)?,
        })
    }
}

/// Builds the Gmail search expression for a filter
pub fn build_query(filter: &FilterSpec) -> Option<String> {
    let mut terms = Vec::new();
    if let Some(query) = filter.query() {
        terms.push(query.to_string());
    }
    if let Some(start) = filter.start_date() {
        terms.push(format!("after:{}", start.format("%Y/%m/%d")));
    }
    if let Some(end) = filter.end_date_exclusive() {
        terms.push(format!("before:{}", end.format("%Y/%m/%d")));
    }
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

/// Decodes Gmail's base64url `raw` field, with or without padding
fn decode_raw(raw: &str) -> Result<Vec<u8>, ProviderError> {
    URL_SAFE_NO_PAD
        .decode(raw.trim_end_matches('='))
        .map_err(|e| ProviderError::InvalidResponse(format!("Invalid base64 in raw message: {e}")))
}

#[async_trait::async_trait]
impl IMailboxProvider for GmailProvider {
    fn name(&self) -> &str {
        ProviderKind::Gmail.as_str()
    }

    fn default_scopes(&self) -> Vec<String> {
        ProviderKind::Gmail.scopes()
    }

    async fn list_page(
        &self,
        access_token: &str,
        filter: &FilterSpec,
        page: Option<&PageToken>,
    ) -> Result<MessagePage, ProviderError> {
        let url = self.api.endpoint(&["users", "me", "messages"])?;
        let mut query = vec![("maxResults", PAGE_SIZE.to_string())];
        if let Some(q) = build_query(filter) {
            query.push(("q", q));
        }
        if let Some(token) = page {
            query.push(("pageToken", token.as_str().to_string()));
        }

        let response: ListResponse = self.api.get_json(url, access_token, &query).await?;

        let mut messages = Vec::with_capacity(response.messages.len());
        for listed in response.messages {
            match MessageId::new(listed.id) {
                Ok(id) => messages.push(MessageRef::with_metadata(id, MessageMetadata::default())),
                Err(e) => warn!(error = %e, "Ignoring listed message with invalid id"),
            }
        }

        let next_page = response
            .next_page_token
            .filter(|t| !t.is_empty())
            .map(PageToken::new)
            .transpose()
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        debug!(
            count = messages.len(),
            has_more = next_page.is_some(),
            "Listed Gmail page"
        );
        Ok(MessagePage {
            messages,
            next_page,
        })
    }

    async fn fetch_message(
        &self,
        access_token: &str,
        message: &MessageRef,
    ) -> Result<Vec<u8>, ProviderError> {
        let url = self
            .api
            .endpoint(&["users", "me", "messages", message.id().as_str()])?;
        let query = [("format", "raw".to_string())];
        let response: RawMessage = self.api.get_json(url, access_token, &query).await?;
        let bytes = decode_raw(&response.raw)?;
        debug!(id = %message.id(), size = bytes.len(), "Fetched Gmail message");
        Ok(bytes)
    }
}
