//! Per-turn state machine
//!
//! ```text
//! Idle -> Sending -> Streaming -> {Completed | Cancelled | Errored} -> Idle
//! ```
//!
//! [`drive`] consumes one gateway stream until it reaches a terminal state.
//! [`TurnAccumulator`] holds the streamed content and turns it into the
//! assistant message that history keeps for that terminal state.

use crate::gateway::{Frame, FrameStream};
use crate::session::{Message, MessageStatus};
use futures::StreamExt;
use std::fmt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Live phase of a session's turn slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    #[default]
    Idle,
    /// Request sent, no content yet
    Sending,
    /// At least one delta received
    Streaming,
}

impl TurnPhase {
    pub fn is_active(&self) -> bool {
        !matches!(self, TurnPhase::Idle)
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnPhase::Idle => "idle",
            TurnPhase::Sending => "sending",
            TurnPhase::Streaming => "streaming",
        };
        write!(f, "{}", name)
    }
}

/// Terminal state of a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    /// Stopped by the caller; partial content is kept
    Cancelled,
    /// Error frame or transport failure, with the reason
    Errored(String),
}

impl TurnOutcome {
    /// Metric and log label
    pub fn label(&self) -> &'static str {
        match self {
            TurnOutcome::Completed => "completed",
            TurnOutcome::Cancelled => "cancelled",
            TurnOutcome::Errored(_) => "errored",
        }
    }
}

/// Result of asking for a new turn
#[derive(Debug)]
pub enum SendOutcome {
    Started(TurnHandle),
    /// A turn is already in flight for this session; nothing was queued
    Rejected,
}

impl SendOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, SendOutcome::Started(_))
    }

    pub fn into_handle(self) -> Option<TurnHandle> {
        match self {
            SendOutcome::Started(handle) => Some(handle),
            SendOutcome::Rejected => None,
        }
    }
}

/// Completion handle for a started turn
///
/// Dropping it does not affect the turn.
#[derive(Debug)]
pub struct TurnHandle {
    session_id: String,
    message_id: String,
    outcome: oneshot::Receiver<TurnOutcome>,
}

impl TurnHandle {
    pub(crate) fn new(
        session_id: String,
        message_id: String,
        outcome: oneshot::Receiver<TurnOutcome>,
    ) -> Self {
        Self {
            session_id,
            message_id,
            outcome,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Id of the assistant message this turn produces
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Wait for the terminal state
    ///
    /// Resolves after the turn's save has been enqueued.
    pub async fn wait(self) -> TurnOutcome {
        self.outcome
            .await
            .unwrap_or_else(|_| TurnOutcome::Errored("Turn task ended unexpectedly".to_string()))
    }
}

/// Content streamed so far in one turn
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    content: String,
    deltas: usize,
}

impl TurnAccumulator {
    pub fn push(&mut self, text: &str) {
        self.content.push_str(text);
        self.deltas += 1;
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn deltas(&self) -> usize {
        self.deltas
    }

    /// Fill `message` with the content history keeps for `outcome`
    ///
    /// Completed and cancelled turns keep exactly what streamed. Errored
    /// turns keep it too, followed by the error on its own paragraph.
    pub fn finalize(self, mut message: Message, outcome: &TurnOutcome) -> Message {
        let (content, status) = match outcome {
            TurnOutcome::Completed => (self.content, MessageStatus::Complete),
            TurnOutcome::Cancelled => (self.content, MessageStatus::Stopped),
            TurnOutcome::Errored(reason) => {
                let content = if self.content.is_empty() {
                    format!("Error: {}", reason)
                } else {
                    format!("{}\n\nError: {}", self.content, reason)
                };
                (content, MessageStatus::Failed)
            }
        };
        message.content = content;
        message.with_status(status)
    }
}

/// Consume `stream` until a terminal frame, cancellation, or end of stream
///
/// `on_delta` sees each delta after it was accumulated. Cancellation wins
/// over a frame that is ready at the same time. A stream that ends without
/// a terminal frame is `Cancelled` if `token` fired, otherwise `Errored`.
pub async fn drive<F>(
    mut stream: FrameStream,
    token: &CancellationToken,
    accumulator: &mut TurnAccumulator,
    mut on_delta: F,
) -> TurnOutcome
where
    F: FnMut(&str),
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => return TurnOutcome::Cancelled,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Frame::Delta(text)) => {
                accumulator.push(&text);
                on_delta(&text);
            }
            Some(Frame::Done) => return TurnOutcome::Completed,
            Some(Frame::Error(reason)) => return TurnOutcome::Errored(reason),
            None if token.is_cancelled() => return TurnOutcome::Cancelled,
            None => {
                return TurnOutcome::Errored("Stream ended without completion".to_string())
            }
        }
    }
}
