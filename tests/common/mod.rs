//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{header::CONTENT_TYPE, HeaderMap, Method, Request, StatusCode, Uri},
    response::IntoResponse,
    routing::{any, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

use layer8_tunnel::config::TunnelConfig;
use layer8_tunnel::http::TunnelServer;
use layer8_tunnel::lifecycle::build_dispatcher;
use layer8_tunnel::transcode::{decode_multipart, TypedValue};
use layer8_tunnel::TunnelClient;

/// JSON whose numbers do not fit in an `f64`.
pub const LEDGER_JSON: &str = r#"{"id":123456789012345678901234567890,"pi":3.14159265358979323846264}"#;

/// Echo what the backend received.
async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Value> {
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "content_type": headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        "tunnel": headers.contains_key("x-tunnel"),
        "body": String::from_utf8_lossy(&body),
    }))
}

/// Summarize a multipart upload as `{field: [description, ...]}`.
async fn upload(headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    match decode_multipart(&content_type, body).await {
        Ok(fields) => {
            let summary: serde_json::Map<String, Value> = fields
                .iter()
                .map(|(name, values)| {
                    let described = values
                        .iter()
                        .map(|v| match v {
                            TypedValue::File { name, bytes, .. } => json!({ "file": name, "size": bytes.len() }),
                            other => json!(other.scalar_text()),
                        })
                        .collect();
                    (name.clone(), Value::Array(described))
                })
                .collect();
            (StatusCode::OK, Json(Value::Object(summary))).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

/// Start a mock backend on an ephemeral port.
pub async fn start_mock_backend() -> SocketAddr {
    let app = Router::new()
        .route("/echo", any(echo))
        .route("/upload", post(upload))
        .route("/text", get(|| async { "plain hello" }))
        .route(
            "/ledger",
            get(|| async { ([(CONTENT_TYPE, "application/json")], LEDGER_JSON) }),
        )
        .route("/created", post(|| async { (StatusCode::CREATED, Json(json!({ "id": 7 }))) }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address with nothing listening on it.
pub async fn unused_addr() -> SocketAddr {
    TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap()
}

/// Config pointing the tunnel at `upstream`.
pub fn config_for(upstream: SocketAddr) -> TunnelConfig {
    let mut config = TunnelConfig::default();
    config.upstream.address = upstream.to_string();
    config
}

/// Full server router, as `main` would build it.
pub async fn tunnel_router(config: &TunnelConfig) -> Router {
    let dispatcher = build_dispatcher(config).await.unwrap();
    TunnelServer::build_router(config, dispatcher)
}

pub fn request_with(method: &str, path: &str, headers: Vec<(String, String)>, body: Body) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    builder.body(body).unwrap()
}

/// Run a handshake through `router`, leaving `client` established.
pub async fn establish(router: &Router, client: &mut TunnelClient) {
    let response = router
        .clone()
        .oneshot(request_with("GET", "/", client.handshake_headers(), Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    client
        .complete_handshake(std::str::from_utf8(&body).unwrap())
        .unwrap();
}

/// Send a sealed envelope through `router`.
pub async fn send_sealed(router: &Router, client: &TunnelClient, path: &str, envelope: Vec<u8>) -> (StatusCode, Vec<u8>) {
    let response = router
        .clone()
        .oneshot(request_with("POST", path, client.tunnel_headers(), Body::from(envelope)))
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 16 * 1024 * 1024).await.unwrap();
    (status, body.to_vec())
}
