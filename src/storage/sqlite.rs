//! SQLite-backed session store
//!
//! All sessions share one database file. Each call opens its own
//! connection on the blocking thread pool; SQLite's own locking plus a
//! busy timeout keeps saves to different ids from failing each other.

use super::{validate_session_id, SessionStore, StoreError, StoreResult};
use crate::session::{now_millis, ChatSession, Message, SaveReceipt, SessionSummary};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Session store backed by a single SQLite database
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`
    ///
    /// The parent directory is created and the schema initialized.
    ///
    /// # Examples
    ///
    /// ```
    /// use palaver::storage::SqliteStore;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = SqliteStore::new_with_path(dir.path().join("sessions.db")).unwrap();
    /// assert!(store.db_path().ends_with("sessions.db"));
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> StoreResult<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::io(format!("Failed to create parent directory for database: {}", e))
            })?;
        }

        let store = Self { db_path };
        store.init()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.db_path)
            .map_err(|e| StoreError::io(format!("Failed to open database: {}", e)))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| StoreError::io(format!("Failed to configure database: {}", e)))?;
        Ok(conn)
    }

    fn init(&self) -> StoreResult<()> {
        self.open()?
            .execute(
                "CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    messages JSON NOT NULL
                )",
                [],
            )
            .map_err(|e| StoreError::io(format!("Failed to create tables: {}", e)))?;
        Ok(())
    }

    fn list_blocking(&self) -> StoreResult<Vec<SessionSummary>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, title, created_at, updated_at
                FROM sessions
                ORDER BY updated_at DESC, id DESC",
            )
            .map_err(|e| StoreError::io(format!("Failed to prepare statement: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(SessionSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })
            .map_err(|e| StoreError::io(format!("Failed to query sessions: {}", e)))?;

        let mut summaries = Vec::new();
        for row in rows {
            match row {
                Ok(summary) => summaries.push(summary),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable session row"),
            }
        }
        Ok(summaries)
    }

    fn get_blocking(&self, id: &str) -> StoreResult<ChatSession> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT title, created_at, updated_at, messages FROM sessions WHERE id = ?",
                params![id],
                |row| {
                    let title: String = row.get(0)?;
                    let created_at: i64 = row.get(1)?;
                    let updated_at: i64 = row.get(2)?;
                    let messages_json: String = row.get(3)?;
                    Ok((title, created_at, updated_at, messages_json))
                },
            )
            .optional()
            .map_err(|e| StoreError::io(format!("Failed to query session: {}", e)))?;

        let (title, created_at, updated_at, messages_json) =
            row.ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let messages: Vec<Message> =
            serde_json::from_str(&messages_json).map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                reason: e.to_string(),
            })?;

        Ok(ChatSession {
            id: id.to_string(),
            title,
            created_at,
            updated_at,
            messages,
        })
    }

    fn save_blocking(&self, id: &str, title: &str, messages: &[Message]) -> StoreResult<SaveReceipt> {
        let mut conn = self.open()?;
        let messages_json = serde_json::to_string(messages)
            .map_err(|e| StoreError::io(format!("Failed to serialize messages: {}", e)))?;

        let tx = conn
            .transaction()
            .map_err(|e| StoreError::io(format!("Failed to start transaction: {}", e)))?;

        let existing_created_at: Option<i64> = tx
            .query_row(
                "SELECT created_at FROM sessions WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::io(format!("Failed to query session: {}", e)))?;

        let now = now_millis();
        let receipt = SaveReceipt::new(id, existing_created_at.unwrap_or(now), now);

        if existing_created_at.is_some() {
            tx.execute(
                "UPDATE sessions SET
                    title = ?,
                    updated_at = ?,
                    messages = ?
                WHERE id = ?",
                params![title, receipt.updated_at, messages_json, id],
            )
            .map_err(|e| StoreError::io(format!("Failed to update session: {}", e)))?;
        } else {
            tx.execute(
                "INSERT INTO sessions (id, title, created_at, updated_at, messages)
                VALUES (?, ?, ?, ?, ?)",
                params![id, title, receipt.created_at, receipt.updated_at, messages_json],
            )
            .map_err(|e| StoreError::io(format!("Failed to insert session: {}", e)))?;
        }

        tx.commit()
            .map_err(|e| StoreError::io(format!("Failed to commit transaction: {}", e)))?;

        Ok(receipt)
    }

    fn delete_blocking(&self, id: &str) -> StoreResult<()> {
        let removed = self
            .open()?
            .execute("DELETE FROM sessions WHERE id = ?", params![id])
            .map_err(|e| StoreError::io(format!("Failed to delete session: {}", e)))?;

        if removed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Run a blocking database call off the async runtime
    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(SqliteStore) -> StoreResult<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .map_err(|e| StoreError::io(format!("Storage task failed: {}", e)))?
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn list(&self) -> StoreResult<Vec<SessionSummary>> {
        self.blocking(|store| store.list_blocking()).await
    }

    async fn get(&self, id: &str) -> StoreResult<ChatSession> {
        validate_session_id(id)?;
        let id = id.to_string();
        self.blocking(move |store| store.get_blocking(&id)).await
    }

    async fn save(&self, id: &str, title: &str, messages: &[Message]) -> StoreResult<SaveReceipt> {
        validate_session_id(id)?;
        let (id, title, messages) = (id.to_string(), title.to_string(), messages.to_vec());
        self.blocking(move |store| store.save_blocking(&id, &title, &messages))
            .await
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        validate_session_id(id)?;
        let id = id.to_string();
        self.blocking(move |store| store.delete_blocking(&id)).await
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
