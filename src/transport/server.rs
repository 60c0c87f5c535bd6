//! HTTP backend
//!
//! Exposes a [`ModelGateway`] as an SSE streaming endpoint and a
//! [`SessionStore`] as JSON endpoints:
//!
//! | Method | Path           |                                   |
//! |--------|----------------|-----------------------------------|
//! | POST   | `/chat/stream` | stream one turn as SSE frames     |
//! | POST   | `/chat`        | one turn, whole reply at once     |
//! | POST   | `/run-model`   | single prompt, whole reply        |
//! | GET    | `/chats/list`  | session summaries                 |
//! | GET    | `/chats/:id`   | one session document              |
//! | POST   | `/chats/save`  | upsert a session                  |
//! | DELETE | `/chats/:id`   | delete a session                  |
//! | GET    | `/health`      | backend and upstream reachability |
//! | GET    | `/models`      | models offered upstream           |
//!
//! A client that disconnects from `/chat/stream` cancels the upstream
//! request.

use super::codec::frame_to_json;
use crate::config::ServerConfig;
use crate::error::{classify, PalaverError, Result};
use crate::gateway::{
    ChatTurnRequest, FrameStream, GatewayHealth, HistoryEntry, ModelGateway, ModelSummary,
};
use crate::session::{ChatSession, Message, Role, SessionSummary, DEFAULT_TITLE};
use crate::storage::{SessionStore, StoreError};
use crate::telemetry;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// JSON error response: `{"error": {"code": 404, "message": "..."}}`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.status.as_u16(),
                "message": self.message,
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::not_found("Chat not found"),
            StoreError::InvalidId(_) => Self::bad_request(err.to_string()),
            StoreError::Corrupt { .. } | StoreError::Io(_) => {
                tracing::error!(error = %err, "Store failure");
                Self::internal(err.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let status = match classify(&err) {
            Some(PalaverError::Validation(_)) => StatusCode::BAD_REQUEST,
            Some(PalaverError::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(PalaverError::Transport(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Some(PalaverError::Upstream(_)) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(error = %err, status = status.as_u16(), "API error");
        Self::new(status, err.to_string())
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn SessionStore>,
    gateway: Arc<dyn ModelGateway>,
}

impl AppState {
    pub fn new(store: Arc<dyn SessionStore>, gateway: Arc<dyn ModelGateway>) -> Self {
        Self { store, gateway }
    }
}

/// Body of `POST /chats/save`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveChatRequest {
    pub id: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

/// Response of `POST /chats/save`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveChatResponse {
    pub success: bool,
    pub id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Body of `POST /run-model`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunModelRequest {
    #[serde(alias = "modelId")]
    pub model: String,
    pub prompt: String,
}

/// Response of `POST /chat` and `POST /run-model`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub response: String,
    pub model: String,
    pub done: bool,
}

/// Response of `GET /chats/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

/// Response of `GET /models`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelListResponse {
    pub models: Vec<ModelSummary>,
}

/// Response of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub backend: BackendHealth,
    pub ollama: GatewayHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendHealth {
    pub status: String,
    pub storage: String,
}

/// Frame stream that cancels its upstream request when dropped
///
/// Axum drops the response body when the client goes away.
struct CancelOnDrop {
    frames: FrameStream,
    _guard: DropGuard,
}

impl Stream for CancelOnDrop {
    type Item = crate::gateway::Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames.as_mut().poll_next(cx)
    }
}

/// Build the CORS layer for the configured origins
pub fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.allowed_origins.is_empty() || config.allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

/// Build the router with all endpoints
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/chat", post(chat_complete))
        .route("/chat/stream", post(chat_stream))
        .route("/run-model", post(run_model))
        .route("/chats/list", get(list_chats))
        .route("/chats/save", post(save_chat))
        .route("/chats/:id", get(get_chat).delete(delete_chat))
        .route("/health", get(health))
        .route("/models", get(list_models))
        .layer(build_cors_layer(config))
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.await;
            tracing::info!("HTTP server shutting down");
        })
        .await?;

    Ok(())
}

fn validate_turn(request: &ChatTurnRequest) -> std::result::Result<(), ApiError> {
    if request.model_id.trim().is_empty() {
        return Err(ApiError::bad_request("modelId is required"));
    }
    if request.messages.is_empty() {
        return Err(ApiError::bad_request("messages must not be empty"));
    }
    Ok(())
}

async fn chat_complete(
    State(state): State<AppState>,
    Json(request): Json<ChatTurnRequest>,
) -> std::result::Result<Json<CompletionResponse>, ApiError> {
    validate_turn(&request)?;
    tracing::info!(
        model = %request.model_id,
        messages = request.messages.len(),
        "Completion request"
    );

    let model = request.model_id.clone();
    let response = state.gateway.complete(request).await?;
    Ok(Json(CompletionResponse {
        response,
        model,
        done: true,
    }))
}

async fn run_model(
    State(state): State<AppState>,
    Json(request): Json<RunModelRequest>,
) -> std::result::Result<Json<CompletionResponse>, ApiError> {
    if request.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }
    let turn = ChatTurnRequest {
        model_id: request.model,
        messages: vec![HistoryEntry {
            role: Role::User,
            content: request.prompt,
        }],
    };
    chat_complete(State(state), Json(turn)).await
}

async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatTurnRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    validate_turn(&request)?;

    tracing::info!(
        model = %request.model_id,
        messages = request.messages.len(),
        "Streaming chat request"
    );
    telemetry::record_stream_request();

    let cancel = CancellationToken::new();
    let frames = CancelOnDrop {
        frames: state.gateway.stream(request, cancel.clone()),
        _guard: cancel.drop_guard(),
    };
    let events =
        frames.map(|frame| Ok::<_, Infallible>(Event::default().data(frame_to_json(&frame))));

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(events).keep_alive(KeepAlive::default()),
    ))
}

async fn list_chats(
    State(state): State<AppState>,
) -> std::result::Result<Json<SessionListResponse>, ApiError> {
    let sessions = state.store.list().await?;
    Ok(Json(SessionListResponse { sessions }))
}

async fn get_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<ChatSession>, ApiError> {
    Ok(Json(state.store.get(&id).await?))
}

async fn save_chat(
    State(state): State<AppState>,
    Json(request): Json<SaveChatRequest>,
) -> std::result::Result<Json<SaveChatResponse>, ApiError> {
    let receipt = state
        .store
        .save(&request.id, &request.title, &request.messages)
        .await?;
    Ok(Json(SaveChatResponse {
        success: true,
        id: receipt.id,
        created_at: receipt.created_at,
        updated_at: receipt.updated_at,
    }))
}

async fn delete_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    state.store.delete(&id).await?;
    Ok(Json(json!({ "success": true })))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        backend: BackendHealth {
            status: "ok".to_string(),
            storage: state.store.backend_name().to_string(),
        },
        ollama: state.gateway.health().await,
    })
}

async fn list_models(
    State(state): State<AppState>,
) -> std::result::Result<Json<ModelListResponse>, ApiError> {
    let models = state.gateway.list_models().await?;
    Ok(Json(ModelListResponse { models }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{spawn_frame_producer, Frame};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct FixedGateway;

    #[async_trait]
    impl ModelGateway for FixedGateway {
        fn stream(&self, _request: ChatTurnRequest, cancel: CancellationToken) -> FrameStream {
            spawn_frame_producer(cancel, |sink| async move {
                sink.send(Frame::Delta("Hi".into())).await;
                sink.send(Frame::Done).await;
            })
        }

        async fn list_models(&self) -> Result<Vec<ModelSummary>> {
            Err(PalaverError::Transport("Cannot connect to Ollama: refused".into()).into())
        }

        async fn health(&self) -> GatewayHealth {
            GatewayHealth::error("Cannot connect to Ollama: refused")
        }
    }

    fn test_router() -> Router {
        let state = AppState::new(Arc::new(MemoryStore::new()), Arc::new(FixedGateway));
        build_router(state, &ServerConfig::default())
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_chat_is_404() {
        let response = test_router()
            .oneshot(Request::get("/chats/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], 404);
    }

    #[tokio::test]
    async fn test_invalid_id_is_400() {
        let response = test_router()
            .oneshot(json_request(
                "POST",
                "/chats/save",
                json!({"id": "bad id!", "title": "t", "messages": []}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_save_returns_receipt() {
        let response = test_router()
            .oneshot(json_request(
                "POST",
                "/chats/save",
                json!({"id": "chat-1", "title": "Hello", "messages": []}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["id"], "chat-1");
        assert!(body["updatedAt"].as_i64().unwrap() >= body["createdAt"].as_i64().unwrap());
    }

    #[tokio::test]
    async fn test_stream_rejects_missing_model() {
        let response = test_router()
            .oneshot(json_request(
                "POST",
                "/chat/stream",
                json!({"modelId": "", "messages": [{"role": "user", "content": "hi"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stream_emits_sse_frames() {
        let response = test_router()
            .oneshot(json_request(
                "POST",
                "/chat/stream",
                json!({"modelId": "m", "messages": [{"role": "user", "content": "hi"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("data: {\"delta\":\"Hi\"}"));
        assert!(text.contains("data: {\"done\":true}"));
    }

    #[tokio::test]
    async fn test_models_unreachable_upstream_is_503() {
        let response = test_router()
            .oneshot(Request::get("/models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_reports_upstream_error_with_200() {
        let response = test_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["backend"]["status"], "ok");
        assert_eq!(body["backend"]["storage"], "memory");
        assert_eq!(body["ollama"]["status"], "error");
        assert_eq!(body["ollama"]["models_available"], 0);
        assert!(body["ollama"]["error"]
            .as_str()
            .unwrap()
            .contains("Cannot connect"));
    }

    #[tokio::test]
    async fn test_chat_returns_whole_reply() {
        let response = test_router()
            .oneshot(json_request(
                "POST",
                "/chat",
                json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body, json!({"response": "Hi", "model": "m", "done": true}));
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_history() {
        let response = test_router()
            .oneshot(json_request("POST", "/chat", json!({"modelId": "m", "messages": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_run_model_wraps_prompt() {
        let response = test_router()
            .oneshot(json_request(
                "POST",
                "/run-model",
                json!({"model": "llama3.2", "prompt": "Say hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["response"], "Hi");
        assert_eq!(body["model"], "llama3.2");

        let response = test_router()
            .oneshot(json_request(
                "POST",
                "/run-model",
                json!({"model": "llama3.2", "prompt": "  "}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_cors_wildcard() {
        let config = ServerConfig {
            allowed_origins: vec!["*".into()],
            ..ServerConfig::default()
        };
        // Building must not panic for wildcard or explicit lists
        let _ = build_cors_layer(&config);
        let _ = build_cors_layer(&ServerConfig::default());
    }
}
