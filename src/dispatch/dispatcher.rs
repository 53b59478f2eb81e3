//! Request lifecycle for the tunnel.
//!
//! # Responsibilities
//! - Classify each request and drive it to exactly one response
//! - Answer handshakes with the server public key and the session token
//! - Unwrap tunneled requests, rebuild them for the backend, and wrap the
//!   backend's answer back into an envelope
//! - Serve static assets enveloped, or the placeholder image
//!
//! # Design Decisions
//! - The backend response is intercepted as a value, never by patching a
//!   live response object
//! - Error bodies carry `public_message()` only; detail goes to the log

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING},
        HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode,
    },
    response::IntoResponse,
};
use hyper::ext::ReasonPhrase;

use crate::crypto::ServerIdentity;
use crate::dispatch::{
    assets::{sniff_content_type, StaticAssets, PLACEHOLDER_PNG},
    backend::Backend,
    classify, Classification, DispatchSettings,
};
use crate::envelope::{self, InnerRequest, InnerResponse};
use crate::error::{TunnelError, TunnelResult, UpstreamError};
use crate::handshake::{headers_to_json, HandshakeManager, AUTH_TOKEN_RESPONSE_HEADER, SHARED_SECRET_HEADER};
use crate::observability::metrics;
use crate::session::{ClientSession, SessionStore};
use crate::transcode::{normalize_body, transcode_request_body};

const HANDSHAKE_REASON: &[u8] = b"ECDH Successfully Completed!";

/// Drives requests through the tunnel state machine.
#[derive(Clone)]
pub struct Dispatcher {
    handshakes: HandshakeManager,
    store: Arc<dyn SessionStore>,
    backend: Arc<dyn Backend>,
    assets: Option<Arc<dyn StaticAssets>>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        identity: Arc<ServerIdentity>,
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn Backend>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            handshakes: HandshakeManager::new(identity, store.clone()),
            store,
            backend,
            assets: None,
            settings,
        }
    }

    /// Serve static requests from `assets` instead of forwarding them.
    pub fn with_static_assets(mut self, assets: Arc<dyn StaticAssets>) -> Self {
        self.assets = Some(assets);
        self
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Handle one request.
    pub async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let start = Instant::now();

        let classification = match classify(request.headers(), &self.settings, self.store.as_ref()).await {
            Ok(c) => c,
            Err(e) => {
                let response = error_response(&TunnelError::Store(e), None);
                metrics::record_request("unclassified", response.status().as_u16(), start);
                return response;
            }
        };
        let state = classification.state();

        tracing::debug!(
            state = %state,
            method = %request.method(),
            path = %request.uri().path(),
            "Request classified"
        );

        let response = match classification {
            Classification::NotTunneled => self.forward(request).await,
            Classification::Handshake => self.handshake(request.headers()).await,
            Classification::Static { session } => self.serve_static(request, session).await,
            Classification::Tunneled(session) => {
                match self.tunnel(request, &session).await {
                    Ok(response) => response,
                    Err(e) => error_response(&e, Some(&session.client_uuid)),
                }
            }
        };

        metrics::record_request(state.as_str(), response.status().as_u16(), start);
        response
    }

    /// Pass the request to the backend untouched.
    async fn forward(&self, request: Request<Body>) -> Response<Body> {
        match self.backend.call(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "Upstream error");
                metrics::record_error("upstream");
                (e.status(), e.public_message()).into_response()
            }
        }
    }

    async fn handshake(&self, headers: &HeaderMap) -> Response<Body> {
        let outcome = match self.handshakes.initialize(&headers_to_json(headers)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                metrics::record_handshake("failure");
                return error_response(&e, None);
            }
        };
        metrics::record_handshake("success");

        let mut response = Response::new(Body::from(outcome.server_public_b64));
        response
            .extensions_mut()
            .insert(ReasonPhrase::from_static(HANDSHAKE_REASON));
        insert_header(response.headers_mut(), AUTH_TOKEN_RESPONSE_HEADER, &outcome.auth_token);
        if self.settings.expose_shared_secret {
            insert_header(response.headers_mut(), SHARED_SECRET_HEADER, &outcome.shared_secret_b64);
        }
        response
    }

    async fn serve_static(&self, request: Request<Body>, session: Option<ClientSession>) -> Response<Body> {
        let Some(assets) = &self.assets else {
            return self.forward(request).await;
        };

        let url = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let bytes = match assets.load(request.uri().path()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return (StatusCode::NOT_FOUND, format!("Cannot GET {url}")).into_response(),
            Err(e) => {
                tracing::error!(path = %url, error = %e, "Failed to read static asset");
                metrics::record_error("static_io");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
            }
        };

        let Some(session) = session else {
            return ([(CONTENT_TYPE, "image/png")], PLACEHOLDER_PNG).into_response();
        };

        let inner = InnerResponse {
            status: StatusCode::OK.as_u16(),
            status_text: "OK".to_string(),
            headers: BTreeMap::from([(
                "content-type".to_string(),
                sniff_content_type(&bytes).to_string(),
            )]),
            body: bytes,
        };
        match seal(&inner, &session) {
            Ok(response) => response,
            Err(e) => error_response(&e, Some(&session.client_uuid)),
        }
    }

    async fn tunnel(&self, request: Request<Body>, session: &ClientSession) -> TunnelResult<Response<Body>> {
        let (mut parts, body) = request.into_parts();

        // 1. Buffer the envelope
        let wire = axum::body::to_bytes(body, self.settings.max_body_size)
            .await
            .map_err(|e| TunnelError::MalformedEnvelope(format!("body: {e}")))?;

        // 2. Decrypt
        let inner: InnerRequest = envelope::decode(&wire, &session.key)?;

        // 3. Transcode the body
        let transcoded = transcode_request_body(inner.header("content-type"), &inner.body)?;

        // 4. Rebuild the request
        parts.method = Method::from_bytes(inner.method.as_bytes())
            .map_err(|_| TunnelError::MalformedPayload(format!("invalid method '{}'", inner.method)))?;
        for (name, value) in &inner.headers {
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                (Ok(name), Ok(value)) => {
                    parts.headers.insert(name, value);
                }
                _ => tracing::debug!(header = %name, "Dropping invalid inner header"),
            }
        }
        parts.headers.remove(CONTENT_LENGTH);
        parts.headers.remove(TRANSFER_ENCODING);
        let content_type = HeaderValue::from_str(&transcoded.content_type)
            .map_err(|_| TunnelError::MalformedPayload("invalid content type".into()))?;
        parts.headers.insert(CONTENT_TYPE, content_type);

        tracing::debug!(
            client_uuid = %session.client_uuid,
            method = %parts.method,
            path = %parts.uri.path(),
            "Tunneled request decoded"
        );

        // 5. Call the backend
        let backend_request = Request::from_parts(parts, Body::from(transcoded.body));
        let inner_response = match self.backend.call(backend_request).await {
            Ok(response) => self.intercept(response).await,
            Err(e) => upstream_failure(&e),
        };

        // 6. Wrap the response
        seal(&inner_response, session)
    }

    /// Capture the backend's response as an inner response value.
    async fn intercept(&self, response: Response<Body>) -> InnerResponse {
        let (parts, body) = response.into_parts();
        let bytes = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(e) => return upstream_failure(&UpstreamError::Failed(format!("response body: {e}"))),
        };

        let content_type = parts.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let body = normalize_body(content_type, &bytes);

        let mut headers = BTreeMap::new();
        for (name, value) in &parts.headers {
            if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
                continue;
            }
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }

        InnerResponse {
            status: parts.status.as_u16(),
            status_text: reason_phrase(&parts),
            headers,
            body,
        }
    }
}

fn reason_phrase(parts: &axum::http::response::Parts) -> String {
    if let Some(reason) = parts.extensions.get::<ReasonPhrase>() {
        return String::from_utf8_lossy(reason.as_bytes()).into_owned();
    }
    parts.status.canonical_reason().unwrap_or_default().to_string()
}

fn upstream_failure(e: &UpstreamError) -> InnerResponse {
    tracing::error!(error = %e, "Upstream error on tunneled request");
    metrics::record_error("upstream");
    let status = e.status();
    InnerResponse {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        headers: BTreeMap::from([("content-type".to_string(), "text/plain".to_string())]),
        body: e.public_message().as_bytes().to_vec(),
    }
}

/// Envelope an inner response for the wire.
fn seal(inner: &InnerResponse, session: &ClientSession) -> TunnelResult<Response<Body>> {
    let wire = envelope::encode(inner, &session.key)?;

    let mut response = Response::new(Body::from(wire));
    *response.status_mut() = StatusCode::from_u16(inner.status).unwrap_or(StatusCode::OK);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    insert_header(response.headers_mut(), AUTH_TOKEN_RESPONSE_HEADER, &session.auth_token);
    Ok(response)
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => tracing::warn!(header = %name, "Header not representable, omitted"),
    }
}

fn error_response(err: &TunnelError, client_uuid: Option<&str>) -> Response<Body> {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!(client_uuid = client_uuid.unwrap_or("-"), kind = err.kind(), error = %err, "Tunnel request failed");
    } else {
        tracing::warn!(client_uuid = client_uuid.unwrap_or("-"), kind = err.kind(), error = %err, "Tunnel request rejected");
    }
    metrics::record_error(err.kind());
    (status, err.public_message()).into_response()
}
