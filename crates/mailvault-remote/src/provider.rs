//! Provider presets
//!
//! One process backs up one mailbox. [`ProviderKind`] selects the OAuth
//! endpoints, scopes and API adapter for it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use mailvault_core::ports::IMailboxProvider;

use crate::gmail::GmailProvider;
use crate::office365::Office365Provider;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URL: &str = "https://accounts.google.com/o/oauth2/token";
const GMAIL_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

const MICROSOFT_AUTH_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
const MICROSOFT_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const OFFICE365_SCOPES: &[&str] = &["offline_access", "mail.read"];

/// Supported mailbox providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Gmail,
    Office365,
}

/// Authorization and token endpoints of an OAuth2 server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub auth_url: String,
    pub token_url: String,
}

impl ProviderKind {
    /// Short, stable name used in config files and keyring entries
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gmail => "gmail",
            ProviderKind::Office365 => "office365",
        }
    }

    /// OAuth2 endpoints of the provider's identity platform
    pub fn endpoints(&self) -> OAuthEndpoints {
        let (auth_url, token_url) = match self {
            ProviderKind::Gmail => (GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL),
            ProviderKind::Office365 => (MICROSOFT_AUTH_URL, MICROSOFT_TOKEN_URL),
        };
        OAuthEndpoints {
            auth_url: auth_url.to_string(),
            token_url: token_url.to_string(),
        }
    }

    /// Read-only mailbox scopes
    pub fn scopes(&self) -> Vec<String> {
        match self {
            ProviderKind::Gmail => vec![GMAIL_SCOPE.to_string()],
            ProviderKind::Office365 => OFFICE365_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Extra authorization URL parameters
    ///
    /// Google only issues a refresh token with `access_type=offline`, and
    /// only re-issues one for an existing grant with `prompt=consent`.
    pub fn extra_auth_params(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            ProviderKind::Gmail => &[("access_type", "offline"), ("prompt", "consent")],
            ProviderKind::Office365 => &[],
        }
    }

    /// Creates the mailbox adapter talking to the provider's production API
    pub fn mailbox(&self, timeout: Duration) -> anyhow::Result<Arc<dyn IMailboxProvider>> {
        let mailbox: Arc<dyn IMailboxProvider> = match self {
            ProviderKind::Gmail => Arc::new(GmailProvider::new(timeout)?),
            ProviderKind::Office365 => Arc::new(Office365Provider::new(timeout)?),
        };
        Ok(mailbox)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" | "google" => Ok(ProviderKind::Gmail),
            "office365" | "o365" | "outlook" => Ok(ProviderKind::Office365),
            other => Err(format!(
                "unknown provider '{other}', expected 'gmail' or 'office365'"
            )),
        }
    }
}
