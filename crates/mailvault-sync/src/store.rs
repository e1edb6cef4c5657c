//! Local message store
//!
//! The data folder holds one file per backed-up message and nothing else is
//! needed to know what is there: the directory listing is the index.
//!
//! ## Design Decisions
//!
//! - **File names**: `<id>.eml` for ids made of `[A-Za-z0-9._=-]` that do not
//!   start with `.`; any other id is stored as `~<base64url(id)>.eml`. Both
//!   forms decode back to the id, and `~` never starts a plain name.
//! - **Atomic writes**: data goes to `<name>.part`, is synced, then renamed,
//!   so a partially written message is never visible under its final name.
//! - **Tolerant scan**: foreign files, directories, empty `.eml` files and
//!   names that do not decode are skipped with a log line.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use mailvault_core::domain::{FileSystemError, LocalRecord, MessageId};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// Extension of backup files
const EXTENSION: &str = ".eml";

/// Suffix of in-progress writes
const PART_SUFFIX: &str = ".part";

/// Marker for base64url-encoded names
const ENCODED_PREFIX: char = '~';

/// Messages present in the data folder, keyed by id
pub type LocalIndex = HashMap<MessageId, LocalRecord>;

/// Returns the file name a message is stored under
pub fn file_name_for(id: &MessageId) -> String {
    let raw = id.as_str();
    if is_plain(raw) {
        format!("{raw}{EXTENSION}")
    } else {
        format!(
            "{ENCODED_PREFIX}{}{EXTENSION}",
            URL_SAFE_NO_PAD.encode(raw.as_bytes())
        )
    }
}

/// Recovers the message id from a backup file name
///
/// Only canonical names are accepted: re-encoding the decoded id must give
/// back the same name.
pub fn id_from_file_name(name: &str) -> Option<MessageId> {
    let stem = name.strip_suffix(EXTENSION)?;
    let raw = match stem.strip_prefix(ENCODED_PREFIX) {
        Some(encoded) => {
            let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
            String::from_utf8(bytes).ok()?
        }
        None => stem.to_string(),
    };
    let id = MessageId::new(raw).ok()?;
    (file_name_for(&id) == name).then_some(id)
}

fn is_plain(raw: &str) -> bool {
    !raw.starts_with('.')
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'=' | b'-'))
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Folder of backed-up messages
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Opens the data folder, creating it if missing
    ///
    /// # Errors
    /// Returns [`FileSystemError::DataFolder`] if the folder cannot be created
    /// or read, and [`FileSystemError::NotADirectory`] if the path is a file.
    pub async fn open(data_folder: impl Into<PathBuf>) -> Result<Self, FileSystemError> {
        let root = data_folder.into();

        match tokio::fs::metadata(&root).await {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Err(FileSystemError::NotADirectory(root)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %root.display(), "Creating data folder");
                tokio::fs::create_dir_all(&root)
                    .await
                    .map_err(|source| FileSystemError::DataFolder {
                        path: root.clone(),
                        source,
                    })?;
            }
            Err(source) => return Err(FileSystemError::DataFolder { path: root, source }),
        }

        Ok(Self { root })
    }

    /// Returns the data folder
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the final path of a message's backup file
    pub fn path_for(&self, id: &MessageId) -> PathBuf {
        self.root.join(file_name_for(id))
    }

    fn folder_error(&self, source: std::io::Error) -> FileSystemError {
        FileSystemError::DataFolder {
            path: self.root.clone(),
            source,
        }
    }

    /// Builds the index of messages already in the folder
    ///
    /// Leftover `.eml.part` files from an interrupted run are removed.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn scan(&self) -> Result<LocalIndex, FileSystemError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| self.folder_error(e))?;
        let mut index = LocalIndex::new();
        let mut ignored = 0usize;

        while let Some(entry) = entries.next_entry().await.map_err(|e| self.folder_error(e))? {
            let path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %path.display(), "Skipping entry with a non UTF-8 name");
                ignored += 1;
                continue;
            };

            if name.ends_with(PART_SUFFIX) {
                if name.trim_end_matches(PART_SUFFIX).ends_with(EXTENSION) {
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => info!(file = %name, "Removed partial download"),
                        Err(e) => warn!(file = %name, error = %e, "Could not remove partial download"),
                    }
                }
                continue;
            }

            if !name.ends_with(EXTENSION) {
                debug!(file = %name, "Skipping non-message file");
                ignored += 1;
                continue;
            }

            let metadata = match tokio::fs::metadata(&path).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(file = %name, error = %e, "Skipping unreadable entry");
                    ignored += 1;
                    continue;
                }
            };

            if !metadata.is_file() {
                debug!(file = %name, "Skipping directory");
                ignored += 1;
                continue;
            }

            if metadata.len() == 0 {
                warn!(file = %name, "Skipping empty backup file");
                ignored += 1;
                continue;
            }

            let Some(id) = id_from_file_name(&name) else {
                warn!(file = %name, "Skipping file whose name does not map to a message id");
                ignored += 1;
                continue;
            };

            let written_at = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            index.insert(
                id.clone(),
                LocalRecord::new(id, path, metadata.len(), written_at),
            );
        }

        info!(messages = index.len(), ignored, "Local store scanned");
        Ok(index)
    }

    /// Returns true if a non-empty backup file for `id` exists right now
    pub async fn contains(&self, id: &MessageId) -> bool {
        tokio::fs::metadata(self.path_for(id))
            .await
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Writes a message under its final name via a `.part` file and rename
    #[instrument(skip(self, data), fields(id = %id, bytes = data.len()))]
    pub async fn write_atomic(
        &self,
        id: &MessageId,
        data: &[u8],
    ) -> Result<LocalRecord, FileSystemError> {
        let target = self.path_for(id);
        let tmp = part_path(&target);

        let written: std::io::Result<()> = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &target).await
        }
        .await;

        if let Err(source) = written {
            if let Err(e) = tokio::fs::remove_file(&tmp).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %tmp.display(), error = %e, "Could not clean up partial file");
                }
            }
            return Err(FileSystemError::Write {
                path: target,
                source,
            });
        }

        debug!(path = %target.display(), "Message written");
        Ok(LocalRecord::new(
            id.clone(),
            target,
            data.len() as u64,
            Utc::now(),
        ))
    }

    /// Deletes a record's backup file
    ///
    /// A file that is already gone counts as removed.
    pub async fn remove(&self, record: &LocalRecord) -> Result<(), FileSystemError> {
        match tokio::fs::remove_file(record.file_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %record.file_path().display(), "Backup file already gone");
                Ok(())
            }
            Err(source) => Err(FileSystemError::Remove {
                path: record.file_path().to_path_buf(),
                source,
            }),
        }
    }
}
