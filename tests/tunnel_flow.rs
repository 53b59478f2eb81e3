//! End-to-end tests through the full router against a live mock backend.

mod common;

use axum::body::Body;
use axum::http::StatusCode;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;
use layer8_tunnel::transcode::{FormFields, TypedValue};
use layer8_tunnel::TunnelClient;

fn body_json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn test_plain_requests_pass_through() {
    let upstream = start_mock_backend().await;
    let router = tunnel_router(&config_for(upstream)).await;

    let response = router
        .oneshot(request_with("GET", "/echo?x=1", vec![], Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let echoed = body_json(&body);
    assert_eq!(echoed["method"], "GET");
    assert_eq!(echoed["query"], "x=1");
    assert_eq!(echoed["tunnel"], false);
}

#[tokio::test]
async fn test_handshake_returns_server_key_and_token() {
    let upstream = start_mock_backend().await;
    let router = tunnel_router(&config_for(upstream)).await;
    let client = TunnelClient::new("client-1", "jwt-abc");

    let response = router
        .oneshot(request_with("GET", "/", client.handshake_headers(), Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["mp-jwt"], "jwt-abc");
    assert!(!response.headers().contains_key("x-shared-secret"));
}

#[tokio::test]
async fn test_shared_secret_header_when_enabled() {
    let upstream = start_mock_backend().await;
    let mut config = config_for(upstream);
    config.tunnel.expose_shared_secret = true;
    let router = tunnel_router(&config).await;
    let mut client = TunnelClient::new("client-1", "jwt");

    let response = router
        .oneshot(request_with("GET", "/", client.handshake_headers(), Body::empty()))
        .await
        .unwrap();
    let secret = response.headers()["x-shared-secret"].to_str().unwrap().to_string();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    client.complete_handshake(std::str::from_utf8(&body).unwrap()).unwrap();

    assert_eq!(client.session_key().unwrap().to_jwk_b64(), secret);
}

#[tokio::test]
async fn test_json_request_round_trip() {
    let upstream = start_mock_backend().await;
    let router = tunnel_router(&config_for(upstream)).await;
    let mut client = TunnelClient::new("client-1", "jwt");
    establish(&router, &mut client).await;

    let envelope = client.seal_json("PUT", &json!({ "name": "ada", "n": 1 })).unwrap();
    let (status, wire) = send_sealed(&router, &client, "/echo?page=2", envelope).await;
    assert_eq!(status, StatusCode::OK);

    let inner = client.open_response(&wire).unwrap();
    assert_eq!(inner.status, 200);
    assert_eq!(inner.status_text, "OK");
    let echoed = body_json(&inner.body);
    assert_eq!(echoed["method"], "PUT");
    assert_eq!(echoed["path"], "/echo");
    assert_eq!(echoed["query"], "page=2");
    assert_eq!(echoed["content_type"], "application/json");
    assert_eq!(body_json(echoed["body"].as_str().unwrap().as_bytes()), json!({ "name": "ada", "n": 1 }));
}

#[tokio::test]
async fn test_json_response_numbers_keep_precision() {
    let upstream = start_mock_backend().await;
    let router = tunnel_router(&config_for(upstream)).await;
    let mut client = TunnelClient::new("client-1", "jwt");
    establish(&router, &mut client).await;

    let envelope = client.seal_json("GET", &json!({})).unwrap();
    let (status, wire) = send_sealed(&router, &client, "/ledger", envelope).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(client.open_response(&wire).unwrap().body, LEDGER_JSON.as_bytes());
}

#[tokio::test]
async fn test_form_arrives_as_multipart() {
    let upstream = start_mock_backend().await;
    let router = tunnel_router(&config_for(upstream)).await;
    let mut client = TunnelClient::new("client-1", "jwt");
    establish(&router, &mut client).await;

    let mut fields = FormFields::new();
    fields.insert("title".into(), vec![TypedValue::string("report")]);
    fields.insert(
        "docs".into(),
        vec![
            TypedValue::file("a.bin", "application/octet-stream", vec![0, 159, 255]),
            TypedValue::file("b.txt", "text/plain", b"hello".to_vec()),
        ],
    );

    let envelope = client.seal_form("POST", &fields).unwrap();
    let (status, wire) = send_sealed(&router, &client, "/upload", envelope).await;
    assert_eq!(status, StatusCode::OK);

    let inner = client.open_response(&wire).unwrap();
    assert_eq!(
        body_json(&inner.body),
        json!({
            "docs": [{ "file": "a.bin", "size": 3 }, { "file": "b.txt", "size": 5 }],
            "title": ["report"],
        })
    );
}

#[tokio::test]
async fn test_status_and_non_json_bodies_preserved() {
    let upstream = start_mock_backend().await;
    let router = tunnel_router(&config_for(upstream)).await;
    let mut client = TunnelClient::new("client-1", "jwt");
    establish(&router, &mut client).await;

    let envelope = client.seal_json("GET", &json!({})).unwrap();
    let (_, wire) = send_sealed(&router, &client, "/text", envelope).await;
    let inner = client.open_response(&wire).unwrap();
    assert_eq!(inner.body, b"plain hello");
    assert!(inner.headers["content-type"].starts_with("text/plain"));

    let envelope = client.seal_json("POST", &json!({})).unwrap();
    let (status, wire) = send_sealed(&router, &client, "/created", envelope).await;
    assert_eq!(status, StatusCode::CREATED);
    let inner = client.open_response(&wire).unwrap();
    assert_eq!(inner.status, 201);
    assert_eq!(inner.status_text, "Created");
    assert_eq!(body_json(&inner.body), json!({ "id": 7 }));
}

#[tokio::test]
async fn test_unknown_client_must_handshake() {
    let upstream = start_mock_backend().await;
    let router = tunnel_router(&config_for(upstream)).await;
    let client = TunnelClient::new("stranger", "jwt");

    let response = router
        .oneshot(request_with("POST", "/echo", client.tunnel_headers(), Body::from("{}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"missing required headers: x-ecdh-init");
}

#[tokio::test]
async fn test_stale_key_is_rejected() {
    let upstream = start_mock_backend().await;
    let router = tunnel_router(&config_for(upstream)).await;
    let mut client = TunnelClient::new("client-1", "jwt");
    establish(&router, &mut client).await;
    let stale = client.seal_json("GET", &json!({})).unwrap();

    // Latest handshake wins
    client.rekey();
    establish(&router, &mut client).await;

    let (status, body) = send_sealed(&router, &client, "/echo", stale).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, b"Could not decrypt request");

    let fresh = client.seal_json("GET", &json!({})).unwrap();
    let (status, _) = send_sealed(&router, &client, "/echo", fresh).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unreachable_backend_is_enveloped() {
    let router = tunnel_router(&config_for(unused_addr().await)).await;
    let mut client = TunnelClient::new("client-1", "jwt");
    establish(&router, &mut client).await;

    let envelope = client.seal_json("GET", &json!({})).unwrap();
    let (status, wire) = send_sealed(&router, &client, "/echo", envelope).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let inner = client.open_response(&wire).unwrap();
    assert_eq!(inner.status, 502);
    assert_eq!(inner.body, b"Upstream request failed");
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let upstream = start_mock_backend().await;
    let mut config = config_for(upstream);
    config.timeouts.upstream_secs = 1;
    let router = tunnel_router(&config).await;
    let mut client = TunnelClient::new("client-1", "jwt");
    establish(&router, &mut client).await;

    let envelope = client.seal_json("GET", &json!({})).unwrap();
    let (status, wire) = send_sealed(&router, &client, "/slow", envelope).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(client.open_response(&wire).unwrap().status, 504);
}

#[tokio::test]
async fn test_static_assets() {
    let upstream = start_mock_backend().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();

    let mut config = config_for(upstream);
    config.static_files.dir = Some(dir.path().to_string_lossy().into_owned());
    let router = tunnel_router(&config).await;

    let mut client = TunnelClient::new("client-1", "jwt");
    establish(&router, &mut client).await;
    let mut headers = client.tunnel_headers();
    headers.push(("x-static".into(), "1".into()));

    // With a session the asset is enveloped
    let response = router
        .clone()
        .oneshot(request_with("GET", "/", headers.clone(), Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let wire = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let inner = client.open_response(&wire).unwrap();
    assert_eq!(inner.body, b"<h1>hi</h1>");

    // Traversal is refused
    let response = router
        .clone()
        .oneshot(request_with("GET", "/../secret", headers, Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Without a session the placeholder image is served
    let stranger = TunnelClient::new("stranger", "jwt");
    let mut headers = stranger.tunnel_headers();
    headers.push(("x-static".into(), "1".into()));
    let response = router
        .oneshot(request_with("GET", "/index.html", headers, Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");
}

#[tokio::test]
async fn test_served_over_tcp_until_shutdown() {
    use layer8_tunnel::lifecycle::build_dispatcher;
    use layer8_tunnel::{Shutdown, TunnelServer};

    let upstream = start_mock_backend().await;
    let config = config_for(upstream);
    let dispatcher = build_dispatcher(&config).await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let shutdown = Shutdown::new();
    let server = tokio::spawn(TunnelServer::new(&config, dispatcher).run(listener, shutdown.subscribe()));

    let http = reqwest::Client::new();
    let mut client = TunnelClient::new("tcp-client", "jwt");

    let mut handshake = http.get(format!("{base}/"));
    for (name, value) in client.handshake_headers() {
        handshake = handshake.header(name, value);
    }
    let res = handshake.send().await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::OK);
    assert_eq!(res.headers()["mp-jwt"], "jwt");
    client.complete_handshake(&res.text().await.unwrap()).unwrap();

    let mut send = http
        .post(format!("{base}/echo"))
        .body(client.seal_json("DELETE", &json!({ "id": 3 })).unwrap());
    for (name, value) in client.tunnel_headers() {
        send = send.header(name, value);
    }
    let res = send.send().await.unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::OK);
    let inner = client.open_response(&res.bytes().await.unwrap()).unwrap();
    assert_eq!(body_json(&inner.body)["method"], "DELETE");

    shutdown.trigger();
    server.await.unwrap().unwrap();
}
