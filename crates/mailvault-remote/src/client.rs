//! Shared HTTP client for mailbox APIs
//!
//! Wraps `reqwest::Client` with a base URL, a per-request timeout, bearer
//! authentication and the mapping from HTTP failures to [`ProviderError`].
//! Retrying is not done here; the download scheduler owns the retry policy.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use mailvault_remote::client::ApiClient;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = ApiClient::new("https://gmail.googleapis.com/gmail/v1", Duration::from_secs(60))?;
//! let url = client.endpoint(&["users", "me", "messages"])?;
//! let bytes = client.get_bytes(url, "access-token", &[]).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use anyhow::Context;
use mailvault_core::ports::ProviderError;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Default retry-after duration when the header is missing or unparsable
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Longest error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// HTTP client shared by the Gmail and Office 365 adapters
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl ApiClient {
    /// Creates a client rooted at `base_url` with the given request timeout
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("Invalid base URL: {base_url}"))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    /// Returns the base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the per-request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Builds an endpoint URL below the base URL
    ///
    /// Each segment is percent-encoded, so message ids containing `/`, `+`
    /// or `=` are safe to pass as-is.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                ProviderError::InvalidResponse(format!("Base URL cannot hold a path: {}", self.base_url))
            })?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    /// Returns true if `url` points at the same scheme, host and port as the base URL
    ///
    /// Continuation links are followed with the bearer token attached, so
    /// they must not leave the API origin.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.scheme() == self.base_url.scheme()
            && url.host_str() == self.base_url.host_str()
            && url.port_or_known_default() == self.base_url.port_or_known_default()
    }

    fn get(&self, url: Url, access_token: &str, query: &[(&str, String)]) -> RequestBuilder {
        let mut request = self.client.get(url).bearer_auth(access_token);
        if !query.is_empty() {
            request = request.query(query);
        }
        request
    }

    /// Sends a request and classifies any failure
    async fn send(&self, request: RequestBuilder) -> Result<Response, ProviderError> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER));
        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();
        debug!(%url, status = status.as_u16(), "Request failed");
        Err(classify_status(status, retry_after, &body))
    }

    /// GETs `url` and decodes a JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        access_token: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let response = self.send(self.get(url, access_token, query)).await?;
        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::InvalidResponse(format!("Malformed JSON body: {e}")))
    }

    /// GETs `url` and returns the raw body
    pub async fn get_bytes(
        &self,
        url: Url,
        access_token: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<u8>, ProviderError> {
        let response = self.send(self.get(url, access_token, query)).await?;
        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        Ok(bytes.to_vec())
    }

    fn transport_error(&self, error: reqwest::Error) -> ProviderError {
        if error.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else if error.is_decode() {
            ProviderError::InvalidResponse(error.to_string())
        } else {
            ProviderError::Network(error.to_string())
        }
    }
}

/// Maps a non-success HTTP status to a [`ProviderError`]
pub fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> ProviderError {
    let message = truncate(body.trim());
    match status {
        StatusCode::UNAUTHORIZED => ProviderError::Unauthorized,
        StatusCode::NOT_FOUND => ProviderError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::TooManyRequests {
            retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
        },
        s if s.is_server_error() => ProviderError::Server {
            status: s.as_u16(),
            message,
        },
        s => ProviderError::Request {
            status: s.as_u16(),
            message,
        },
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Parses a Retry-After header value into a Duration.
///
/// The header can be either:
/// - An integer number of seconds (e.g., "30")
/// - An HTTP-date (e.g., "Fri, 31 Dec 2025 23:59:59 GMT"), taken as the wait from now
///
/// Falls back to the default duration if parsing fails.
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value.trim()) {
        let wait = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
        if let Ok(secs) = u64::try_from(wait.num_seconds()) {
            if secs <= 3600 {
                return Duration::from_secs(secs);
            }
        }
    }

    warn!(value, "Could not parse Retry-After header, using default");
    default
}
