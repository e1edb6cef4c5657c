//! Office 365 mailbox adapter (Microsoft Graph)
//!
//! Lists messages with `GET /me/messages` and downloads the MIME source
//! with `GET /me/messages/{id}/$value`.
//!
//! ## Pagination
//!
//! Graph returns an absolute `@odata.nextLink` URL that already carries the
//! original query options. It is used verbatim as the page token, the same
//! way delta links are followed for drive items.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use mailvault_core::domain::{FilterSpec, MessageId, MessageMetadata, MessageRef, PageToken};
use mailvault_core::ports::{IMailboxProvider, MessagePage, ProviderError};
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::ApiClient;
use crate::provider::ProviderKind;

/// Base URL for Microsoft Graph API v1.0
const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Page size for listing
const PAGE_SIZE: u32 = 100;

/// Properties requested for each listed message
const SELECT_FIELDS: &str = "id,receivedDateTime,parentFolderId";

// ============================================================================
// Graph API response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    value: Vec<GraphMessage>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    received_date_time: Option<DateTime<Utc>>,
    parent_folder_id: Option<String>,
}

// ============================================================================
// Office365Provider
// ============================================================================

/// [`IMailboxProvider`] backed by Microsoft Graph
pub struct Office365Provider {
    api: ApiClient,
}

impl Office365Provider {
    /// Creates a provider talking to the production Graph API
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Self::with_base_url(GRAPH_BASE_URL, timeout)
    }

    /// Creates a provider with a custom base URL (useful for testing)
    pub fn with_base_url(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            api: ApiClient::new(base_url, timeout)?,
        })
    }
}

fn midnight_utc(date: NaiveDate) -> String {
    format!("{}T00:00:00Z", date.format("%Y-%m-%d"))
}

/// Builds the OData `$filter` expression for a filter
///
/// The user expression is parenthesized when combined with date bounds so
/// an `or` inside it cannot escape the date range.
pub fn build_filter(filter: &FilterSpec) -> Option<String> {
    let mut dates = Vec::new();
    if let Some(start) = filter.start_date() {
        dates.push(format!("receivedDateTime ge {}", midnight_utc(start)));
    }
    if let Some(end) = filter.end_date_exclusive() {
        dates.push(format!("receivedDateTime lt {}", midnight_utc(end)));
    }

    match (filter.query(), dates.is_empty()) {
        (None, true) => None,
        (Some(query), true) => Some(query.to_string()),
        (None, false) => Some(dates.join(" and ")),
        (Some(query), false) => Some(format!("({query}) and {}", dates.join(" and "))),
    }
}

fn to_message_ref(message: GraphMessage) -> Result<MessageRef, ProviderError> {
    let id = MessageId::new(message.id).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
    Ok(MessageRef::with_metadata(
        id,
        MessageMetadata {
            size_bytes: None,
            received_at: message.received_date_time,
            folder: message.parent_folder_id,
        },
    ))
}

#[async_trait::async_trait]
impl IMailboxProvider for Office365Provider {
    fn name(&self) -> &str {
        ProviderKind::Office365.as_str()
    }

    fn default_scopes(&self) -> Vec<String> {
        ProviderKind::Office365.scopes()
    }

    async fn list_page(
        &self,
        access_token: &str,
        filter: &FilterSpec,
        page: Option<&PageToken>,
    ) -> Result<MessagePage, ProviderError> {
        let response: MessagesResponse = match page {
            Some(token) => {
                let url = Url::parse(token.as_str()).map_err(|e| {
                    ProviderError::InvalidResponse(format!("Invalid nextLink: {e}"))
                })?;
                if !self.api.is_same_origin(&url) {
                    return Err(ProviderError::InvalidResponse(format!(
                        "nextLink points outside the API origin: {url}"
                    )));
                }
                self.api.get_json(url, access_token, &[]).await?
            }
            None => {
                let url = self.api.endpoint(&["me", "messages"])?;
                let mut query = vec![
                    ("$select", SELECT_FIELDS.to_string()),
                    ("$top", PAGE_SIZE.to_string()),
                ];
                if let Some(expr) = build_filter(filter) {
                    query.push(("$filter", expr));
                }
                self.api.get_json(url, access_token, &query).await?
            }
        };

        let mut messages = Vec::with_capacity(response.value.len());
        for message in response.value {
            match to_message_ref(message) {
                Ok(msg) => messages.push(msg),
                Err(e) => warn!(error = %e, "Ignoring listed message with invalid id"),
            }
        }

        let next_page = response
            .next_link
            .filter(|link| !link.is_empty())
            .map(PageToken::new)
            .transpose()
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        debug!(
            count = messages.len(),
            has_more = next_page.is_some(),
            "Listed Office 365 page"
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
            .endpoint(&["me", "messages", message.id().as_str(), "$value"])?;
        let bytes = self.api.get_bytes(url, access_token, &[]).await?;
        debug!(id = %message.id(), size = bytes.len(), "Fetched Office 365 message");
        Ok(bytes)
    }
}
