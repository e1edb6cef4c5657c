//! Events emitted during a backup run
//!
//! Collaborators (console output, JSON logs, tests) observe a session only
//! through this enum. Ordering guarantee: every per-message event of a run
//! is delivered before its single `EndBackup`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::newtypes::MessageId;

/// Severity attached to free-form `Log` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Debug,
}

/// A single observable step of a backup session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BackupEvent {
    /// About to back up a message; `skip` is set when it already exists locally
    BeforeMessageBackup {
        id: MessageId,
        backup_file: PathBuf,
        skip: bool,
    },

    /// A message was fetched and written under its final name
    AfterMessageBackup {
        id: MessageId,
        backup_file: PathBuf,
        size_bytes: u64,
        /// Messages backed up so far in this run, including this one
        completed: u64,
        /// Remote messages matching the filter
        total: u64,
    },

    /// A fetch or write failed; `retryable` is false on the final attempt
    MessageError {
        id: MessageId,
        code: i32,
        message: String,
        retryable: bool,
    },

    /// A local file was removed because the message is gone remotely
    MessageDelete { id: MessageId, backup_file: PathBuf },

    /// Free-form progress information
    Log { level: LogLevel, message: String },

    /// Final event of a completed session
    EndBackup {
        backed_up: u64,
        skipped: u64,
        deleted: u64,
        total: u64,
    },
}

impl BackupEvent {
    /// Shorthand for an info-level `Log` event
    pub fn log(message: impl Into<String>) -> Self {
        BackupEvent::Log {
            level: LogLevel::Info,
            message: message.into(),
        }
    }

    /// Returns the message id this event is about, if any
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            BackupEvent::BeforeMessageBackup { id, .. }
            | BackupEvent::AfterMessageBackup { id, .. }
            | BackupEvent::MessageError { id, .. }
            | BackupEvent::MessageDelete { id, .. } => Some(id),
            BackupEvent::Log { .. } | BackupEvent::EndBackup { .. } => None,
        }
    }

    /// Returns a stable name for the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            BackupEvent::BeforeMessageBackup { .. } => "before_message_backup",
            BackupEvent::AfterMessageBackup { .. } => "after_message_backup",
            BackupEvent::MessageError { .. } => "message_error",
            BackupEvent::MessageDelete { .. } => "message_delete",
            BackupEvent::Log { .. } => "log",
            BackupEvent::EndBackup { .. } => "end_backup",
        }
    }
}
