//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including validation failures, invalid state transitions and
//! failures touching the local backup folder.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid message ID format
    #[error("Invalid message ID: {0}")]
    InvalidMessageId(String),

    /// Invalid pagination token
    #[error("Invalid page token: {0}")]
    InvalidPageToken(String),

    /// Date could not be parsed or bounds are inverted
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Errors raised by the local message store
///
/// Whether one of these is fatal depends on where it happens: on the data
/// folder itself it aborts the session, on a single message it only skips
/// that message.
#[derive(Debug, Error)]
pub enum FileSystemError {
    /// The data folder could not be created or read
    #[error("Data folder {path} is not accessible: {source}")]
    DataFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The data folder path exists but is not a directory
    #[error("Data folder {0} is not a directory")]
    NotADirectory(PathBuf),

    /// Writing a message file failed
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Removing a message file failed
    #[error("Failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FileSystemError {
    /// Returns the path the failed operation was working on
    pub fn path(&self) -> &std::path::Path {
        match self {
            FileSystemError::DataFolder { path, .. }
            | FileSystemError::Write { path, .. }
            | FileSystemError::Remove { path, .. } => path,
            FileSystemError::NotADirectory(path) => path,
        }
    }
}
