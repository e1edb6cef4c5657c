//! MailVault Sync - Backup engine
//!
//! Provides:
//! - One-way mailbox backup into a folder of `.eml` files
//! - Bounded-concurrency downloads with retry and cooperative cancellation
//! - Optional deletion of local files whose message is gone remotely
//!
//! ## Modules
//!
//! - [`engine`] - Session orchestration (authorize, list, diff, download, delete)
//! - [`scheduler`] - Worker pool fetching and persisting message bodies
//! - [`store`] - Local folder index with atomic writes
//! - [`diff`] - Remote/local set difference
//! - [`token`] - Access token shared between workers
//! - [`events`] - Event fan-out to sinks and channels

pub mod diff;
pub mod engine;
pub mod events;
pub mod scheduler;
pub mod store;
pub mod token;

pub use engine::BackupEngine;
pub use events::EventBus;

use mailvault_core::domain::{DomainError, FileSystemError};
use mailvault_core::ports::{AuthError, ProviderError};
use thiserror::Error;

/// Errors that abort a backup session
///
/// Per-message failures are never reported here; they surface as
/// `MessageError` events and the message counts as skipped.
#[derive(Debug, Error)]
pub enum BackupError {
    /// The token provider could not authorize or refresh
    #[error("Authorization failed: {0}")]
    Auth(#[from] AuthError),

    /// The data folder could not be created or read
    #[error(transparent)]
    DataFolder(#[from] FileSystemError),

    /// Listing remote messages failed after retries
    #[error("Listing remote messages failed: {0}")]
    Listing(#[from] ProviderError),

    /// The session configuration is unusable
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A domain invariant was violated
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}
