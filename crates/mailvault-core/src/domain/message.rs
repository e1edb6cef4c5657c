//! Message references and local backup records
//!
//! A `MessageRef` is what a remote listing yields; a `LocalRecord` is what
//! the local store knows about a message already written to disk. Both are
//! keyed by `MessageId` and treated as values.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::MessageId;

/// Metadata a provider may return alongside a listed message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Size estimate in bytes, if reported
    pub size_bytes: Option<u64>,
    /// When the message was received, if reported
    pub received_at: Option<DateTime<Utc>>,
    /// Provider folder/label identifier, if reported
    pub folder: Option<String>,
}

/// A message as seen in the remote mailbox listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    id: MessageId,
    metadata: MessageMetadata,
}

impl MessageRef {
    /// Creates a reference with no metadata
    pub fn new(id: MessageId) -> Self {
        Self {
            id,
            metadata: MessageMetadata::default(),
        }
    }

    /// Creates a reference with metadata
    pub fn with_metadata(id: MessageId, metadata: MessageMetadata) -> Self {
        Self { id, metadata }
    }

    /// Returns the message id
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Returns the listing metadata
    pub fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }
}

/// A message already persisted under the data folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRecord {
    id: MessageId,
    file_path: PathBuf,
    size_bytes: u64,
    written_at: DateTime<Utc>,
}

impl LocalRecord {
    /// Creates a new LocalRecord
    pub fn new(
        id: MessageId,
        file_path: PathBuf,
        size_bytes: u64,
        written_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            file_path,
            size_bytes,
            written_at,
        }
    }

    /// Returns the message id
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Returns the absolute path of the backup file
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Returns the file size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Returns when the file was written (mtime for scanned files)
    pub fn written_at(&self) -> DateTime<Utc> {
        self.written_at
    }
}
