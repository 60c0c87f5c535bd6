//! In-process session store

use super::{validate_session_id, SessionStore, StoreError, StoreResult};
use crate::session::{
    now_millis, sort_by_recent, ChatSession, Message, SaveReceipt, SessionSummary,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Session store that keeps documents in a `HashMap`
///
/// Nothing survives the process. Useful for tests and for the `memory`
/// storage backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, ChatSession>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, HashMap<String, ChatSession>>> {
        self.sessions
            .lock()
            .map_err(|_| StoreError::io("memory store lock poisoned"))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn list(&self) -> StoreResult<Vec<SessionSummary>> {
        let mut summaries: Vec<_> = self.lock()?.values().map(ChatSession::summary).collect();
        sort_by_recent(&mut summaries);
        Ok(summaries)
    }

    async fn get(&self, id: &str) -> StoreResult<ChatSession> {
        validate_session_id(id)?;
        self.lock()?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn save(&self, id: &str, title: &str, messages: &[Message]) -> StoreResult<SaveReceipt> {
        validate_session_id(id)?;
        let mut sessions = self.lock()?;

        let now = now_millis();
        let created_at = sessions.get(id).map(|s| s.created_at).unwrap_or(now);
        let receipt = SaveReceipt::new(id, created_at, now);

        sessions.insert(
            id.to_string(),
            ChatSession {
                id: id.to_string(),
                title: title.to_string(),
                created_at: receipt.created_at,
                updated_at: receipt.updated_at,
                messages: messages.to_vec(),
            },
        );
        Ok(receipt)
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        validate_session_id(id)?;
        self.lock()?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
