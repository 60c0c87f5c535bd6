//! Ollama gateway
//!
//! Streams `/api/chat` responses, which Ollama sends as newline-delimited
//! JSON objects:
//!
//! ```text
//! {"model":"llama3.2","message":{"role":"assistant","content":"Hel"},"done":false}
//! {"model":"llama3.2","message":{"role":"assistant","content":"lo"},"done":false}
//! {"model":"llama3.2","message":{"role":"assistant","content":""},"done":true}
//! ```

use super::lines::LineBuffer;
use super::{
    spawn_frame_producer, ChatTurnRequest, Frame, FrameSink, FrameStream, GatewayHealth,
    HistoryEntry, ModelGateway, ModelSummary,
};
use crate::config::OllamaConfig;
use crate::error::{PalaverError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Request body for Ollama's chat endpoint
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<HistoryEntry>,
    stream: bool,
}

/// Body of a non-streaming chat response
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaChunkMessage>,
    #[serde(default)]
    error: Option<String>,
}

/// One NDJSON line of a streamed chat response
#[derive(Debug, Deserialize)]
struct OllamaChatChunk {
    #[serde(default)]
    message: Option<OllamaChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaChunkMessage {
    #[serde(default)]
    content: String,
}

/// Response from Ollama's tags endpoint
#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    #[serde(default)]
    models: Vec<OllamaModelTag>,
}

#[derive(Debug, Deserialize)]
struct OllamaModelTag {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    digest: Option<String>,
    #[serde(default)]
    modified_at: Option<String>,
}

impl From<OllamaModelTag> for ModelSummary {
    fn from(tag: OllamaModelTag) -> Self {
        Self {
            name: tag.name,
            size: tag.size,
            digest: tag.digest,
            modified_at: tag.modified_at,
        }
    }
}

/// Gateway to a local or remote Ollama server
///
/// The client carries no overall deadline, so a long reply that keeps
/// producing chunks is never cut off. Streams fail after `request_timeout`
/// of silence; one-shot calls fail after `request_timeout` in total.
#[derive(Debug, Clone)]
pub struct OllamaGateway {
    client: Client,
    host: String,
    request_timeout: Duration,
}

impl OllamaGateway {
    /// Create a gateway for the configured host
    ///
    /// # Errors
    ///
    /// Returns a transport error if the HTTP client cannot be built.
    ///
    /// # Examples
    ///
    /// ```
    /// use palaver::config::OllamaConfig;
    /// use palaver::gateway::OllamaGateway;
    ///
    /// let gateway = OllamaGateway::new(&OllamaConfig::default()).unwrap();
    /// assert_eq!(gateway.host(), "http://localhost:11434");
    /// ```
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .user_agent(concat!("palaver/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PalaverError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        let host = config.host.trim_end_matches('/').to_string();
        tracing::info!(host = %host, "Initialized Ollama gateway");

        Ok(Self {
            client,
            host,
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }
}

#[async_trait]
impl ModelGateway for OllamaGateway {
    fn stream(&self, request: ChatTurnRequest, cancel: CancellationToken) -> FrameStream {
        let client = self.client.clone();
        let url = self.endpoint("/api/chat");
        let body = OllamaChatRequest {
            model: request.model_id,
            messages: request.messages,
            stream: true,
        };

        let idle = self.request_timeout;
        spawn_frame_producer(cancel, move |sink| stream_chat(client, url, body, idle, sink))
    }

    async fn complete(&self, request: ChatTurnRequest) -> Result<String> {
        let body = OllamaChatRequest {
            model: request.model_id,
            messages: request.messages,
            stream: false,
        };

        let response = self
            .client
            .post(self.endpoint("/api/chat"))
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| PalaverError::Transport(format!("Cannot connect to Ollama: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Ollama returned error {}: {}", status, error_text);
            return Err(PalaverError::Upstream(format!(
                "Ollama returned error {}: {}",
                status, error_text
            ))
            .into());
        }

        let reply: OllamaChatResponse = response.json().await.map_err(|e| {
            PalaverError::Upstream(format!("Failed to parse Ollama response: {}", e))
        })?;
        if let Some(error) = reply.error {
            return Err(PalaverError::Upstream(error).into());
        }
        Ok(reply.message.map(|m| m.content).unwrap_or_default())
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>> {
        let url = self.endpoint("/api/tags");
        tracing::debug!("Fetching models from Ollama: {}", url);

        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Failed to fetch Ollama models: {}", e);
                PalaverError::Transport(format!("Cannot connect to Ollama: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Ollama returned error {}: {}", status, error_text);
            return Err(PalaverError::Upstream(format!(
                "Ollama returned error {}: {}",
                status, error_text
            ))
            .into());
        }

        let tags: OllamaTagsResponse = response.json().await.map_err(|e| {
            tracing::error!("Failed to parse Ollama tags response: {}", e);
            PalaverError::Upstream(format!("Failed to parse Ollama response: {}", e))
        })?;

        Ok(tags.models.into_iter().map(ModelSummary::from).collect())
    }

    async fn health(&self) -> GatewayHealth {
        match self.list_models().await {
            Ok(models) => GatewayHealth::ok(models.len()),
            Err(e) => GatewayHealth::error(e.to_string()),
        }
    }
}

/// Producer task body: POST the chat request and forward frames
async fn stream_chat(
    client: Client,
    url: String,
    body: OllamaChatRequest,
    idle: Duration,
    sink: FrameSink,
) {
    tracing::debug!(model = %body.model, messages = body.messages.len(), "Starting Ollama stream");

    let response = match tokio::time::timeout(idle, client.post(&url).json(&body).send()).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            tracing::warn!("Failed to reach Ollama: {}", e);
            sink.send(Frame::Error(format!("Cannot connect to Ollama: {}", e)))
                .await;
            return;
        }
        Err(_) => {
            tracing::warn!(idle_secs = idle.as_secs(), "Ollama did not answer");
            sink.send(Frame::Error(format!(
                "No response from Ollama within {} seconds",
                idle.as_secs()
            )))
            .await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!("Ollama returned error {}: {}", status, error_text);
        sink.send(Frame::Error(format!(
            "Ollama returned error {}: {}",
            status, error_text
        )))
        .await;
        return;
    }

    let mut bytes = response.bytes_stream();
    let mut lines = LineBuffer::new();

    loop {
        let chunk = match tokio::time::timeout(idle, bytes.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(None) => break,
            Err(_) => {
                tracing::warn!(idle_secs = idle.as_secs(), "Ollama stream went silent");
                sink.send(Frame::Error(format!(
                    "No data from Ollama for {} seconds",
                    idle.as_secs()
                )))
                .await;
                return;
            }
            Ok(Some(Err(e))) => {
                tracing::warn!("Ollama stream failed: {}", e);
                sink.send(Frame::Error(format!("Stream from Ollama failed: {}", e)))
                    .await;
                return;
            }
        };

        for line in lines.push(&chunk) {
            if deliver_line(&sink, &line).await.is_break() {
                return;
            }
        }
    }

    if let Some(line) = lines.finish() {
        if deliver_line(&sink, &line).await.is_break() {
            return;
        }
    }

    sink.send(Frame::Error(
        "Upstream closed stream without completion".to_string(),
    ))
    .await;
}

/// Forward the frames carried by one line; `Break` once the stream is over
async fn deliver_line(sink: &FrameSink, line: &str) -> ControlFlow<()> {
    for frame in frames_from_line(line) {
        let terminal = frame.is_terminal();
        if !sink.send(frame).await || terminal {
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

/// Translate one NDJSON line into zero or more frames
///
/// Blank and unparseable lines yield nothing. A line can carry a final
/// content chunk and `done` together, in which case the delta comes first.
pub(crate) fn frames_from_line(line: &str) -> Vec<Frame> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }

    let chunk: OllamaChatChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(error = %e, "Dropping malformed Ollama line");
            return Vec::new();
        }
    };

    if let Some(error) = chunk.error {
        return vec![Frame::Error(error)];
    }

    let mut frames = Vec::with_capacity(2);
    if let Some(message) = chunk.message {
        if !message.content.is_empty() {
            frames.push(Frame::Delta(message.content));
        }
    }
    if chunk.done {
        frames.push(Frame::Done);
    }
    frames
}
