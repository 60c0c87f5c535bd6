//! Conversation data model
//!
//! A [`ChatSession`] is the unit of persistence: one JSON document per
//! session id, holding an ordered list of [`Message`]s. Timestamps are
//! Unix epoch milliseconds throughout.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub mod title;

pub use title::{derive_title, DEFAULT_TITLE};

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the turn that produced a message ended
///
/// User messages are always `Complete`. Documents written before the
/// field existed deserialize as `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Complete,
    /// The user cancelled the turn; content is whatever had streamed
    Stopped,
    /// The turn errored; content ends with the error description
    Failed,
}

impl MessageStatus {
    fn is_complete(&self) -> bool {
        *self == MessageStatus::Complete
    }
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(rename = "model", alias = "modelId", default)]
    pub model_id: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "MessageStatus::is_complete")]
    pub status: MessageStatus,
}

impl Message {
    /// Create a message stamped with the current time and a fresh id
    pub fn new(role: Role, content: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            id: new_message_id(role),
            role,
            content: content.into(),
            model_id: model_id.into(),
            timestamp: now_millis(),
            status: MessageStatus::Complete,
        }
    }

    pub fn user(content: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self::new(Role::User, content, model_id)
    }

    pub fn assistant(content: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, model_id)
    }

    /// Builder-style status override
    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }
}

/// A full conversation document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl ChatSession {
    /// An empty, default-titled session that has not been persisted yet
    pub fn empty(id: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            title: DEFAULT_TITLE.to_string(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn has_user_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::User)
    }

    /// Apply the timestamps returned by a completed save
    pub fn apply_receipt(&mut self, receipt: &SaveReceipt) {
        self.created_at = receipt.created_at;
        self.updated_at = receipt.updated_at;
    }
}

/// Lightweight listing entry, never carries message bodies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Result of a store upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReceipt {
    pub id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SaveReceipt {
    /// Build a receipt, clamping `updated_at` so it never precedes `created_at`
    pub fn new(id: impl Into<String>, created_at: i64, updated_at: i64) -> Self {
        Self {
            id: id.into(),
            created_at,
            updated_at: updated_at.max(created_at),
        }
    }
}

/// Generate a new session id
///
/// ULIDs are lexicographically sortable and only use `[0-9A-Z]`, so they
/// always pass session id validation.
pub fn new_session_id() -> String {
    format!("chat-{}", Ulid::new())
}

/// Generate a globally unique message id of the form `{role}-{ulid}`
pub fn new_message_id(role: Role) -> String {
    format!("{}-{}", role, Ulid::new())
}

/// Current wall-clock time in Unix epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Sort summaries most-recently-updated first, ties broken by id
pub fn sort_by_recent(summaries: &mut [SessionSummary]) {
    summaries.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}
