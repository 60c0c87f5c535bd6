//! HTTP clients for a `palaver serve` backend
//!
//! [`RemoteGateway`] and [`RemoteStore`] implement the same traits as the
//! local Ollama gateway and stores, so an orchestrator can run against a
//! backend on another machine without knowing the difference.

use super::codec::SseDecoder;
use super::server::{
    CompletionResponse, HealthResponse, ModelListResponse, SaveChatResponse, SessionListResponse,
};
use crate::error::{PalaverError, Result};
use crate::gateway::{
    spawn_frame_producer, ChatTurnRequest, Frame, FrameSink, FrameStream, GatewayHealth,
    ModelGateway, ModelSummary,
};
use crate::session::{ChatSession, Message, SaveReceipt, SessionSummary};
use crate::storage::{validate_session_id, SessionStore, StoreError, StoreResult};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared HTTP plumbing for the remote gateway and store
#[derive(Debug, Clone)]
struct BackendClient {
    client: Client,
    base: String,
}

impl BackendClient {
    fn new(base_url: &str) -> Result<Self> {
        url::Url::parse(base_url).map_err(|e| {
            PalaverError::Config(format!("Invalid backend URL {:?}: {}", base_url, e))
        })?;

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("palaver/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PalaverError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

/// Pull the message out of an `{"error": {"message": ...}}` body, falling
/// back to the raw text
async fn error_message(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(text);
    format!("Backend returned {}: {}", status, message)
}

/// Gateway that streams through a remote backend's `/chat/stream`
#[derive(Debug, Clone)]
pub struct RemoteGateway {
    backend: BackendClient,
}

impl RemoteGateway {
    /// # Examples
    ///
    /// ```
    /// use palaver::transport::RemoteGateway;
    ///
    /// assert!(RemoteGateway::new("http://127.0.0.1:8000").is_ok());
    /// assert!(RemoteGateway::new("not a url").is_err());
    /// ```
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            backend: BackendClient::new(base_url)?,
        })
    }
}

#[async_trait]
impl ModelGateway for RemoteGateway {
    fn stream(&self, request: ChatTurnRequest, cancel: CancellationToken) -> FrameStream {
        let client = self.backend.client.clone();
        let url = self.backend.url("/chat/stream");
        spawn_frame_producer(cancel, move |sink| stream_remote(client, url, request, sink))
    }

    async fn complete(&self, request: ChatTurnRequest) -> Result<String> {
        let response = self
            .backend
            .client
            .post(self.backend.url("/chat"))
            .json(&request)
            .send()
            .await
            .map_err(|e| PalaverError::Transport(format!("Cannot reach backend: {}", e)))?;

        if !response.status().is_success() {
            return Err(PalaverError::Upstream(error_message(response).await).into());
        }

        let body: CompletionResponse = response.json().await?;
        Ok(body.response)
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>> {
        let response = self
            .backend
            .client
            .get(self.backend.url("/models"))
            .send()
            .await
            .map_err(|e| PalaverError::Transport(format!("Cannot reach backend: {}", e)))?;

        if !response.status().is_success() {
            return Err(PalaverError::Upstream(error_message(response).await).into());
        }

        let body: ModelListResponse = response.json().await?;
        Ok(body.models)
    }

    async fn health(&self) -> GatewayHealth {
        let response = match self.backend.client.get(self.backend.url("/health")).send().await {
            Ok(response) => response,
            Err(e) => return GatewayHealth::error(format!("Cannot reach backend: {}", e)),
        };
        match response.json::<HealthResponse>().await {
            Ok(body) => body.ollama,
            Err(e) => GatewayHealth::error(format!("Invalid health response: {}", e)),
        }
    }
}

async fn stream_remote(client: Client, url: String, request: ChatTurnRequest, sink: FrameSink) {
    let response = match client.post(&url).json(&request).send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Failed to reach backend: {}", e);
            sink.send(Frame::Error(format!("Cannot reach backend: {}", e)))
                .await;
            return;
        }
    };

    if !response.status().is_success() {
        let message = error_message(response).await;
        tracing::error!("{}", message);
        sink.send(Frame::Error(message)).await;
        return;
    }

    let mut bytes = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    while let Some(chunk) = bytes.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                sink.send(Frame::Error(format!("Stream from backend failed: {}", e)))
                    .await;
                return;
            }
        };

        for frame in decoder.push(&chunk) {
            let terminal = frame.is_terminal();
            if !sink.send(frame).await || terminal {
                return;
            }
        }
    }

    match decoder.finish() {
        Some(frame) if frame.is_terminal() => {
            sink.send(frame).await;
        }
        tail => {
            if let Some(frame) = tail {
                if !sink.send(frame).await {
                    return;
                }
            }
            sink.send(Frame::Error(
                "Backend closed stream without completion".to_string(),
            ))
            .await;
        }
    }
}

/// Session store backed by a remote backend's `/chats/*` endpoints
#[derive(Debug, Clone)]
pub struct RemoteStore {
    backend: BackendClient,
}

impl RemoteStore {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            backend: BackendClient::new(base_url)?,
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> StoreResult<Response> {
        request
            .send()
            .await
            .map_err(|e| StoreError::io(format!("Cannot reach backend: {}", e)))
    }

    async fn check(id: &str, response: Response) -> StoreResult<Response> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(id.to_string())),
            StatusCode::BAD_REQUEST => Err(StoreError::InvalidId(id.to_string())),
            _ => Err(StoreError::io(error_message(response).await)),
        }
    }
}

#[async_trait]
impl SessionStore for RemoteStore {
    async fn list(&self) -> StoreResult<Vec<SessionSummary>> {
        let response = self
            .send(self.backend.client.get(self.backend.url("/chats/list")))
            .await?;
        let response = Self::check("", response).await?;
        let body: SessionListResponse = response.json().await.map_err(StoreError::io)?;
        Ok(body.sessions)
    }

    async fn get(&self, id: &str) -> StoreResult<ChatSession> {
        validate_session_id(id)?;
        let response = self
            .send(self.backend.client.get(self.backend.url(&format!("/chats/{}", id))))
            .await?;
        let response = Self::check(id, response).await?;
        response.json().await.map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    async fn save(&self, id: &str, title: &str, messages: &[Message]) -> StoreResult<SaveReceipt> {
        validate_session_id(id)?;
        let body = json!({ "id": id, "title": title, "messages": messages });
        let response = self
            .send(
                self.backend
                    .client
                    .post(self.backend.url("/chats/save"))
                    .json(&body),
            )
            .await?;
        let response = Self::check(id, response).await?;
        let saved: SaveChatResponse = response.json().await.map_err(StoreError::io)?;
        Ok(SaveReceipt::new(saved.id, saved.created_at, saved.updated_at))
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        validate_session_id(id)?;
        let response = self
            .send(
                self.backend
                    .client
                    .delete(self.backend.url(&format!("/chats/{}", id))),
            )
            .await?;
        Self::check(id, response).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "remote"
    }
}
