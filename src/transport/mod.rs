//! Transport channel between a gateway and a remote orchestrator
//!
//! - [`codec`]: frame <-> SSE event encoding
//! - [`server`]: axum backend exposing a gateway and a store over HTTP
//! - [`client`]: [`RemoteGateway`] and [`RemoteStore`] talking to that backend

pub mod client;
pub mod codec;
pub mod server;

pub use client::{RemoteGateway, RemoteStore};
pub use codec::{encode_sse, frame_from_json, frame_to_json, SseDecoder};
pub use server::{build_router, serve, ApiError, AppState};
