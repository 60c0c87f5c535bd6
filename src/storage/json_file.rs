//! One JSON document per session
//!
//! Documents live at `{dir}/{id}.json`, pretty-printed with two-space
//! indentation. Writes go to a uniquely named hidden temp file in the same
//! directory, are fsynced, then renamed over the target, so a concurrent
//! reader sees either the previous document or the new one.

use super::{validate_session_id, SessionStore, StoreError, StoreResult};
use crate::session::{
    now_millis, sort_by_recent, ChatSession, Message, SaveReceipt, SessionSummary,
};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

const DOCUMENT_EXTENSION: &str = "json";

/// Directory-backed session store
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Create a store rooted at `dir`
    ///
    /// The directory is created lazily on the first save.
    ///
    /// # Examples
    ///
    /// ```
    /// use palaver::storage::JsonFileStore;
    ///
    /// let store = JsonFileStore::new("/tmp/palaver-chats");
    /// assert!(store.dir().ends_with("palaver-chats"));
    /// ```
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, DOCUMENT_EXTENSION))
    }

    /// Read and parse a document; `Ok(None)` when the file does not exist
    async fn read_document(&self, id: &str) -> StoreResult<Option<ChatSession>> {
        let path = self.document_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::io(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn write_atomic(&self, id: &str, bytes: &[u8]) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::io(format!("Failed to create {}: {}", self.dir.display(), e)))?;

        let target = self.document_path(id);
        let tmp = self.dir.join(format!(".{}.{}.tmp", id, Ulid::new()));

        let written: std::io::Result<()> = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &target).await
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                tracing::debug!(path = %tmp.display(), error = %cleanup, "Temp file cleanup failed");
            }
            return Err(StoreError::io(format!(
                "Failed to write {}: {}",
                target.display(),
                e
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn list(&self) -> StoreResult<Vec<SessionSummary>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(e)),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(StoreError::io)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_session_id(id).is_err() {
                continue;
            }

            match self.read_document(id).await {
                Ok(Some(session)) => summaries.push(session.summary()),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Skipping unreadable session");
                }
            }
        }

        sort_by_recent(&mut summaries);
        Ok(summaries)
    }

    async fn get(&self, id: &str) -> StoreResult<ChatSession> {
        validate_session_id(id)?;
        self.read_document(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn save(&self, id: &str, title: &str, messages: &[Message]) -> StoreResult<SaveReceipt> {
        validate_session_id(id)?;

        let created_at = match self.read_document(id).await {
            Ok(Some(existing)) => Some(existing.created_at),
            Ok(None) => None,
            Err(StoreError::Corrupt { reason, .. }) => {
                tracing::warn!(session_id = %id, %reason, "Overwriting corrupted session");
                None
            }
            Err(e) => return Err(e),
        };

        let now = now_millis();
        let receipt = SaveReceipt::new(id, created_at.unwrap_or(now), now);
        let document = ChatSession {
            id: id.to_string(),
            title: title.to_string(),
            created_at: receipt.created_at,
            updated_at: receipt.updated_at,
            messages: messages.to_vec(),
        };

        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| StoreError::io(format!("Failed to serialize session: {}", e)))?;
        self.write_atomic(id, &bytes).await?;

        tracing::debug!(session_id = %id, messages = messages.len(), "Saved session");
        Ok(receipt)
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        validate_session_id(id)?;
        match tokio::fs::remove_file(self.document_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(id.to_string())),
            Err(e) => Err(StoreError::io(e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "json"
    }
}
