//! Model stream gateway
//!
//! A [`ModelGateway`] turns one [`ChatTurnRequest`] into a cancellable
//! stream of [`Frame`]s. Implementations:
//!
//! - [`OllamaGateway`]: talks NDJSON to an Ollama host
//! - [`crate::transport::RemoteGateway`]: talks SSE to a `palaver serve` backend
//!
//! Every stream ends with exactly one terminal frame (`Done` or `Error`)
//! unless the caller cancels, in which case it simply stops.

use crate::error::{PalaverError, Result};
use crate::session::{Message, Role};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

pub mod lines;
pub mod ollama;

pub use ollama::OllamaGateway;

/// Frames buffered between a producer task and its consumer
const FRAME_BUFFER: usize = 64;

/// One unit of a model's streamed answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Incremental content, in emission order
    Delta(String),
    /// Terminal: the model finished
    Done,
    /// Terminal: the backend or transport failed
    Error(String),
}

impl Frame {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Frame::Delta(_))
    }
}

/// Boxed frame stream returned by gateways
pub type FrameStream = Pin<Box<dyn Stream<Item = Frame> + Send>>;

/// One prior message as sent upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Request for one streamed turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurnRequest {
    #[serde(rename = "modelId", alias = "model")]
    pub model_id: String,
    pub messages: Vec<HistoryEntry>,
}

impl ChatTurnRequest {
    /// Build a request from session history
    pub fn from_history(model_id: impl Into<String>, history: &[Message]) -> Self {
        Self {
            model_id: model_id.into(),
            messages: history.iter().map(HistoryEntry::from).collect(),
        }
    }
}

/// A model advertised by the upstream backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

/// Reachability report for the upstream backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayHealth {
    pub status: HealthStatus,
    pub models_available: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Error,
}

impl GatewayHealth {
    pub fn ok(models_available: usize) -> Self {
        Self {
            status: HealthStatus::Ok,
            models_available,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            models_available: 0,
            error: Some(message.into()),
        }
    }
}

/// Streams model output for one turn
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Start streaming a turn
    ///
    /// Never fails synchronously: connection and upstream failures arrive
    /// as a terminal [`Frame::Error`]. Cancelling `cancel` stops the
    /// stream and tears down the upstream connection without a terminal
    /// frame.
    fn stream(&self, request: ChatTurnRequest, cancel: CancellationToken) -> FrameStream;

    /// Run a turn to completion and return the whole reply
    ///
    /// The default drains [`ModelGateway::stream`]; backends with a native
    /// single-shot call override it.
    async fn complete(&self, request: ChatTurnRequest) -> Result<String> {
        let mut frames = self.stream(request, CancellationToken::new());
        let mut reply = String::new();
        while let Some(frame) = frames.next().await {
            match frame {
                Frame::Delta(text) => reply.push_str(&text),
                Frame::Done => return Ok(reply),
                Frame::Error(reason) => return Err(PalaverError::Upstream(reason).into()),
            }
        }
        Err(PalaverError::Transport("Stream ended without completion".to_string()).into())
    }

    /// Models the backend can serve
    async fn list_models(&self) -> Result<Vec<ModelSummary>>;

    /// Whether the backend is reachable
    async fn health(&self) -> GatewayHealth;
}

/// Producer half of a frame stream, handed to the task that reads upstream
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
}

impl FrameSink {
    /// Deliver a frame; returns `false` once the consumer is gone or the
    /// stream was cancelled, after which the producer should stop.
    pub async fn send(&self, frame: Frame) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(frame) => sent.is_ok(),
        }
    }
}

/// Run `producer` on its own task and expose its frames as a stream
///
/// The task is dropped as soon as `cancel` fires, which drops any
/// in-flight HTTP response with it.
pub fn spawn_frame_producer<F, Fut>(cancel: CancellationToken, producer: F) -> FrameStream
where
    F: FnOnce(FrameSink) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    let sink = FrameSink {
        tx,
        cancel: cancel.clone(),
    };
    let work = producer(sink);

    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Frame producer cancelled");
            }
            _ = work => {}
        }
    });

    Box::pin(ReceiverStream::new(rx))
}
