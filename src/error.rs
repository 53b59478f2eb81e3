//! Tunnel error taxonomy.
//!
//! Every failure in the handshake, envelope and transcoding pipeline is
//! terminal for the request that produced it. Errors carry internal detail
//! for logs; `public_message()` is what ends up on the wire.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors raised by the session storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No session is registered for the client UUID.
    #[error("no session for client {0}")]
    NotFound(String),

    /// The external cache rejected or failed a command.
    #[error("session backend error: {0}")]
    Backend(#[from] KvError),

    /// A stored key could not be decoded back into key material.
    #[error("stored session key is corrupt")]
    CorruptKey,
}

/// Errors raised by an external key-value client.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("server error: {0}")]
    Server(String),
}

/// Errors that terminate a tunnel request.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("missing required headers: {}", .0.join(", "))]
    MissingHeaders(Vec<String>),

    #[error("invalid headers: {}", .0.join(", "))]
    InvalidHeaderTypes(Vec<String>),

    #[error("failure to decode client public key: {0}")]
    KeyDecode(String),

    #[error("unable to compute ECDH shared secret: {0}")]
    HandshakeCrypto(String),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Wrong key, truncated or tampered ciphertext. Carries no cause.
    #[error("could not decrypt envelope")]
    Decrypt,

    #[error("could not encrypt envelope")]
    Encrypt,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("invalid multipart field descriptor: {0}")]
    Transcode(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Client side: sealing or opening before the handshake completed.
    #[error("tunnel session not established")]
    NotEstablished,
}

/// Errors raised while calling the backend application.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream did not respond within {0:?}")]
    Timeout(std::time::Duration),

    #[error("upstream request failed: {0}")]
    Failed(String),
}

impl UpstreamError {
    pub fn status(&self) -> StatusCode {
        match self {
            UpstreamError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            UpstreamError::Failed(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn public_message(&self) -> &'static str {
        match self {
            UpstreamError::Timeout(_) => "Upstream request timed out",
            UpstreamError::Failed(_) => "Upstream request failed",
        }
    }
}

impl TunnelError {
    /// HTTP status used when this error is reported to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            TunnelError::MissingHeaders(_)
            | TunnelError::InvalidHeaderTypes(_)
            | TunnelError::KeyDecode(_)
            | TunnelError::MalformedEnvelope(_)
            | TunnelError::Decrypt
            | TunnelError::MalformedPayload(_)
            | TunnelError::Transcode(_) => StatusCode::BAD_REQUEST,
            TunnelError::HandshakeCrypto(_)
            | TunnelError::Encrypt
            | TunnelError::Store(_)
            | TunnelError::NotEstablished => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to put on the wire.
    pub fn public_message(&self) -> String {
        match self {
            TunnelError::MissingHeaders(_) | TunnelError::InvalidHeaderTypes(_) => self.to_string(),
            TunnelError::KeyDecode(_) => "Failure to decode client public key".to_string(),
            TunnelError::HandshakeCrypto(_) => "Failure to initialize ECDH".to_string(),
            TunnelError::MalformedEnvelope(_) => "Could not decode request envelope".to_string(),
            TunnelError::Decrypt => "Could not decrypt request".to_string(),
            TunnelError::Encrypt => "Could not encrypt response".to_string(),
            TunnelError::MalformedPayload(_) => "Could not decode request payload".to_string(),
            TunnelError::Transcode(_) => "Could not decode multipart form".to_string(),
            TunnelError::Store(_) | TunnelError::NotEstablished => {
                "Internal Server Error".to_string()
            }
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TunnelError::MissingHeaders(_) => "missing_headers",
            TunnelError::InvalidHeaderTypes(_) => "invalid_header_types",
            TunnelError::KeyDecode(_) => "key_decode",
            TunnelError::HandshakeCrypto(_) => "handshake_crypto",
            TunnelError::MalformedEnvelope(_) => "malformed_envelope",
            TunnelError::Decrypt => "decrypt",
            TunnelError::Encrypt => "encrypt",
            TunnelError::MalformedPayload(_) => "malformed_payload",
            TunnelError::Transcode(_) => "transcode",
            TunnelError::Store(_) => "store",
            TunnelError::NotEstablished => "not_established",
        }
    }
}

/// Result type for tunnel operations.
pub type TunnelResult<T> = Result<T, TunnelError>;
