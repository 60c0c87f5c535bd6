//! Events published by an orchestrator instance

use super::turn::TurnOutcome;

/// Something a front end may want to render
///
/// Subscriptions are per orchestrator via
/// [`super::SessionOrchestrator::subscribe`]. Slow subscribers lag and lose
/// old events rather than blocking turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    /// A turn left `Idle`; `follow` is the scroll-follow value captured for it
    TurnStarted {
        session_id: String,
        message_id: String,
        follow: bool,
    },
    /// Streamed content for the in-flight assistant message
    Delta {
        session_id: String,
        text: String,
        follow: bool,
    },
    /// The turn reached a terminal state and its save was enqueued
    TurnFinished {
        session_id: String,
        outcome: TurnOutcome,
    },
    /// Session list contents or ordering may have changed
    SessionsChanged,
    ActiveSessionChanged {
        session_id: String,
    },
    /// A queued store write failed; the next save for the session retries
    SaveFailed {
        session_id: String,
        reason: String,
    },
}

impl OrchestratorEvent {
    /// Session this event concerns, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            OrchestratorEvent::TurnStarted { session_id, .. }
            | OrchestratorEvent::Delta { session_id, .. }
            | OrchestratorEvent::TurnFinished { session_id, .. }
            | OrchestratorEvent::ActiveSessionChanged { session_id }
            | OrchestratorEvent::SaveFailed { session_id, .. } => Some(session_id),
            OrchestratorEvent::SessionsChanged => None,
        }
    }
}
