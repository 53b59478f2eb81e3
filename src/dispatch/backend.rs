//! The application behind the tunnel.

use std::convert::Infallible;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use tower::ServiceExt;

use crate::error::UpstreamError;

/// Receives the reconstructed request and produces the plain response.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn call(&self, request: Request<Body>) -> Result<Response<Body>, UpstreamError>;
}

/// An in-process axum application, for running the tunnel as a layer in
/// front of local handlers.
#[async_trait]
impl Backend for Router {
    async fn call(&self, request: Request<Body>) -> Result<Response<Body>, UpstreamError> {
        match self.clone().oneshot(request).await {
            Ok(response) => Ok(response),
            Err(never) => {
                let never: Infallible = never;
                match never {}
            }
        }
    }
}
