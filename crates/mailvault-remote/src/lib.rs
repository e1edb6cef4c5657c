//! MailVault Remote - mailbox provider adapters
//!
//! Provides async adapters for:
//! - OAuth2 authorization (Authorization Code with PKCE and client secret)
//! - Gmail API message listing and raw download
//! - Microsoft Graph (Office 365) message listing and MIME download
//!
//! ## Modules
//!
//! - [`auth`] - OAuth2 flow components and the `ITokenProvider` adapter
//! - [`client`] - Shared HTTP client with status classification
//! - [`gmail`] - Gmail `IMailboxProvider`
//! - [`office365`] - Office 365 `IMailboxProvider`
//! - [`provider`] - Provider presets (endpoints, scopes) and factory

pub mod auth;
pub mod client;
pub mod gmail;
pub mod office365;
pub mod provider;

pub use auth::OAuthTokenProvider;
pub use client::ApiClient;
pub use gmail::GmailProvider;
pub use office365::Office365Provider;
pub use provider::{OAuthEndpoints, ProviderKind};
