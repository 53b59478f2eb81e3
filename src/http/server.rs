//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the tunnel dispatcher behind every path
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Bind the server to a listener and stop on the shutdown signal
//! - Forward requests to the upstream application with a deadline

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{
        uri::{Authority, PathAndQuery, Scheme},
        Request, Response, Uri,
    },
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::TunnelConfig;
use crate::dispatch::{Backend, Dispatcher};
use crate::error::UpstreamError;

/// The backend application reached over HTTP/1.1.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client<HttpConnector, Body>,
    authority: Authority,
    timeout: Duration,
}

impl UpstreamClient {
    /// `address` is `host:port`.
    pub fn new(address: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let authority = Authority::from_str(address)
            .map_err(|e| UpstreamError::Failed(format!("invalid upstream address '{address}': {e}")))?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self {
            client,
            authority,
            timeout,
        })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }
}

#[async_trait]
impl Backend for UpstreamClient {
    async fn call(&self, request: Request<Body>) -> Result<Response<Body>, UpstreamError> {
        let (mut parts, body) = request.into_parts();

        // URI rewrite
        let mut uri_parts = parts.uri.into_parts();
        uri_parts.scheme = Some(Scheme::HTTP);
        uri_parts.authority = Some(self.authority.clone());
        if uri_parts.path_and_query.is_none() {
            uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }
        parts.uri = Uri::from_parts(uri_parts).map_err(|e| UpstreamError::Failed(e.to_string()))?;

        let request = Request::from_parts(parts, body);
        match tokio::time::timeout(self.timeout, self.client.request(request)).await {
            Err(_) => Err(UpstreamError::Timeout(self.timeout)),
            Ok(Err(e)) => Err(UpstreamError::Failed(e.to_string())),
            Ok(Ok(response)) => {
                let (parts, body) = response.into_parts();
                Ok(Response::from_parts(parts, Body::new(body)))
            }
        }
    }
}

/// HTTP server fronting the backend with the tunnel.
pub struct TunnelServer {
    router: Router,
}

impl TunnelServer {
    pub fn new(config: &TunnelConfig, dispatcher: Dispatcher) -> Self {
        Self {
            router: Self::build_router(config, dispatcher),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(config: &TunnelConfig, dispatcher: Dispatcher) -> Router {
        Router::new()
            .route("/{*path}", any(tunnel_handler))
            .route("/", any(tunnel_handler))
            .with_state(Arc::new(dispatcher))
            .layer(RequestBodyLimitLayer::new(config.tunnel.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until a shutdown signal arrives.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Tunnel server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("Tunnel server stopped");
        Ok(())
    }
}

async fn tunnel_handler(State(dispatcher): State<Arc<Dispatcher>>, request: Request<Body>) -> Response<Body> {
    dispatcher.handle(request).await
}
