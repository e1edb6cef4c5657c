//! Domain entities and business logic
//!
//! This module contains the core domain types for MailVault:
//! - Newtypes for validated identifiers (message ids, page tokens)
//! - Message references and local backup records
//! - Filter specification with inclusive date bounds
//! - Session configuration and retry policy
//! - The backup session state machine and its counters
//! - Events emitted during a backup run
//! - Domain-specific error types

pub mod errors;
pub mod event;
pub mod filter;
pub mod message;
pub mod newtypes;
pub mod session;
pub mod session_config;

// Re-export commonly used types
pub use errors::{DomainError, FileSystemError};
pub use event::{BackupEvent, LogLevel};
pub use filter::{parse_date, FilterSpec};
pub use message::{LocalRecord, MessageMetadata, MessageRef};
pub use newtypes::*;
pub use session::{BackupSession, BackupSummary, SessionCounters, SessionState};
pub use session_config::{Backoff, RetryPolicy, SessionConfig};
