//! Ollama gateway against a mock server

use futures::StreamExt;
use palaver::config::OllamaConfig;
use palaver::gateway::{ChatTurnRequest, Frame, ModelGateway, OllamaGateway};
use palaver::session::Message;
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway_for(server: &MockServer) -> OllamaGateway {
    let config = OllamaConfig {
        host: server.uri(),
        ..OllamaConfig::default()
    };
    OllamaGateway::new(&config).expect("failed to build gateway")
}

fn request() -> ChatTurnRequest {
    ChatTurnRequest::from_history("llama3.2", &[Message::user("hi", "llama3.2")])
}

/// One-shot HTTP server that sends `lines` as chunks, `gap` apart
///
/// The first chunk goes out with the headers.
async fn chunked_ollama(lines: Vec<serde_json::Value>, gap: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;

        let head = "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ntransfer-encoding: chunked\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        for (n, line) in lines.iter().enumerate() {
            if n > 0 {
                tokio::time::sleep(gap).await;
            }
            let line = format!("{}\n", line);
            let chunk = format!("{:x}\r\n{}\r\n", line.len(), line);
            if socket.write_all(chunk.as_bytes()).await.is_err() {
                return;
            }
        }
        let _ = socket.write_all(b"0\r\n\r\n").await;
        let _ = socket.flush().await;
    });

    url
}

/// Consume one request so closing the socket does not reset the connection
async fn read_request(socket: &mut tokio::net::TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return;
            }
        }
    }
}

fn slow_gateway(url: String) -> OllamaGateway {
    let config = OllamaConfig {
        host: url,
        request_timeout_seconds: 1,
        ..OllamaConfig::default()
    };
    OllamaGateway::new(&config).unwrap()
}

fn ndjson(lines: &[serde_json::Value]) -> String {
    lines
        .iter()
        .map(|line| format!("{}\n", line))
        .collect::<String>()
}

#[tokio::test]
async fn test_stream_yields_deltas_then_done() {
    let server = MockServer::start().await;
    let body = ndjson(&[
        json!({"model": "llama3.2", "message": {"role": "assistant", "content": "Hel"}, "done": false}),
        json!({"model": "llama3.2", "message": {"role": "assistant", "content": "lo"}, "done": false}),
        json!({"model": "llama3.2", "message": {"role": "assistant", "content": ""}, "done": true}),
    ]);

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"model": "llama3.2", "stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;

    let frames: Vec<Frame> = gateway_for(&server)
        .stream(request(), CancellationToken::new())
        .collect()
        .await;

    assert_eq!(
        frames,
        vec![
            Frame::Delta("Hel".into()),
            Frame::Delta("lo".into()),
            Frame::Done
        ]
    );
}

#[tokio::test]
async fn test_malformed_lines_are_skipped() {
    let server = MockServer::start().await;
    let body = format!(
        "{}\nnot json at all\n\n{}\n",
        json!({"message": {"role": "assistant", "content": "ok"}, "done": false}),
        json!({"message": {"role": "assistant", "content": ""}, "done": true}),
    );

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let frames: Vec<Frame> = gateway_for(&server)
        .stream(request(), CancellationToken::new())
        .collect()
        .await;

    assert_eq!(frames, vec![Frame::Delta("ok".into()), Frame::Done]);
}

#[tokio::test]
async fn test_http_error_becomes_error_frame() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model exploded"))
        .mount(&server)
        .await;

    let frames: Vec<Frame> = gateway_for(&server)
        .stream(request(), CancellationToken::new())
        .collect()
        .await;

    assert_eq!(frames.len(), 1);
    match &frames[0] {
        Frame::Error(reason) => {
            assert!(reason.contains("500"));
            assert!(reason.contains("model exploded"));
        }
        other => panic!("expected error frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_body_without_done_ends_with_error() {
    let server = MockServer::start().await;
    let body = ndjson(&[json!({"message": {"role": "assistant", "content": "cut"}, "done": false})]);
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let frames: Vec<Frame> = gateway_for(&server)
        .stream(request(), CancellationToken::new())
        .collect()
        .await;

    assert_eq!(frames[0], Frame::Delta("cut".into()));
    assert!(matches!(frames.last(), Some(Frame::Error(_))));
}

#[tokio::test]
async fn test_unreachable_host_becomes_error_frame() {
    let config = OllamaConfig {
        host: "http://127.0.0.1:1".into(),
        connect_timeout_seconds: 1,
        ..OllamaConfig::default()
    };
    let gateway = OllamaGateway::new(&config).unwrap();

    let frames: Vec<Frame> = gateway
        .stream(request(), CancellationToken::new())
        .collect()
        .await;

    assert_eq!(frames.len(), 1);
    assert!(matches!(&frames[0], Frame::Error(reason) if reason.contains("Cannot connect")));
}

#[tokio::test]
async fn test_cancelled_stream_ends_without_terminal_frame() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(ndjson(&[json!({"done": true})]))
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let mut stream = gateway_for(&server).stream(request(), cancel.clone());
    cancel.cancel();

    let next = tokio::time::timeout(std::time::Duration::from_secs(2), stream.next())
        .await
        .expect("stream did not stop after cancellation");
    assert_eq!(next, None);
}

#[tokio::test]
async fn test_list_models_and_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                {"name": "llama3.2:latest", "size": 2019393189u64, "digest": "a80c4f17acd5"},
                {"name": "qwen2.5-coder:7b", "size": 4683087332u64}
            ]
        })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    let models = gateway.list_models().await.unwrap();
    assert_eq!(models.len(), 2);
    assert_eq!(models[0].name, "llama3.2:latest");
    assert_eq!(models[0].digest.as_deref(), Some("a80c4f17acd5"));
    assert_eq!(models[1].digest, None);

    let health = gateway.health().await;
    assert_eq!(health.models_available, 2);
    assert!(health.error.is_none());
}

#[tokio::test]
async fn test_health_reports_upstream_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(503).set_body_string("loading"))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server);
    assert!(gateway.list_models().await.is_err());

    let health = gateway.health().await;
    assert_eq!(health.models_available, 0);
    assert!(health.error.unwrap().contains("503"));
}

#[tokio::test]
async fn test_long_stream_outlives_request_timeout() {
    let url = chunked_ollama(
        vec![
            json!({"message": {"role": "assistant", "content": "tok0 "}, "done": false}),
            json!({"message": {"role": "assistant", "content": "tok1 "}, "done": false}),
            json!({"message": {"role": "assistant", "content": "tok2"}, "done": false}),
            json!({"message": {"role": "assistant", "content": ""}, "done": true}),
        ],
        Duration::from_millis(700),
    )
    .await;

    let frames: Vec<Frame> = slow_gateway(url)
        .stream(request(), CancellationToken::new())
        .collect()
        .await;

    assert_eq!(
        frames,
        vec![
            Frame::Delta("tok0 ".into()),
            Frame::Delta("tok1 ".into()),
            Frame::Delta("tok2".into()),
            Frame::Done
        ]
    );
}

#[tokio::test]
async fn test_silent_stream_fails_after_idle_gap() {
    let url = chunked_ollama(
        vec![
            json!({"message": {"role": "assistant", "content": "first"}, "done": false}),
            json!({"message": {"role": "assistant", "content": ""}, "done": true}),
        ],
        Duration::from_millis(2500),
    )
    .await;

    let frames: Vec<Frame> = slow_gateway(url)
        .stream(request(), CancellationToken::new())
        .collect()
        .await;

    assert_eq!(frames[0], Frame::Delta("first".into()));
    assert_eq!(frames.len(), 2);
    assert!(matches!(&frames[1], Frame::Error(reason) if reason.contains("No data from Ollama")));
}

#[tokio::test]
async fn test_complete_returns_whole_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"model": "llama3.2", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3.2",
            "message": {"role": "assistant", "content": "Hello there"},
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = gateway_for(&server).complete(request()).await.unwrap();
    assert_eq!(reply, "Hello there");
}

#[tokio::test]
async fn test_complete_maps_http_error_to_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(404).set_body_string("model 'nope' not found"))
        .mount(&server)
        .await;

    let err = gateway_for(&server).complete(request()).await.unwrap_err();
    assert!(matches!(
        palaver::error::classify(&err),
        Some(palaver::PalaverError::Upstream(message)) if message.contains("nope")
    ));
}
