//! ECDH handshake manager.
//!
//! # Responsibilities
//! - Validate the handshake headers (presence, then type, then key decoding)
//! - Run X25519 agreement against the server identity
//! - Register the resulting session, superseding any previous one
//!
//! # Design Decisions
//! - Headers arrive as a JSON map so that non-string values can be
//!   reported as `InvalidHeaderTypes` rather than silently coerced
//! - Nothing is written to the session store unless every step succeeded

use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::{Map, Value};

use crate::crypto::{decode_public_jwk, ServerIdentity};
use crate::error::{TunnelError, TunnelResult};
use crate::session::SessionStore;

/// Client ECDH public key (base64 JWK).
pub const ECDH_INIT_HEADER: &str = "x-ecdh-init";
/// Session identifier chosen by the client.
pub const CLIENT_UUID_HEADER: &str = "x-client-uuid";
/// Opaque token bound to the session.
pub const AUTH_TOKEN_HEADER: &str = "mp-jwt";
/// Token header on handshake and tunneled responses.
pub const AUTH_TOKEN_RESPONSE_HEADER: &str = "mp-JWT";
/// Exported session key, only sent when explicitly enabled.
pub const SHARED_SECRET_HEADER: &str = "x-shared-secret";

const REQUIRED_HEADERS: [&str; 3] = [ECDH_INIT_HEADER, CLIENT_UUID_HEADER, AUTH_TOKEN_HEADER];

/// Result of a completed handshake.
#[derive(Clone)]
pub struct HandshakeOutcome {
    pub client_uuid: String,
    /// base64 octet JWK of the derived session key.
    pub shared_secret_b64: String,
    /// base64 JWK of the server public key.
    pub server_public_b64: String,
    pub auth_token: String,
}

impl std::fmt::Debug for HandshakeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeOutcome")
            .field("client_uuid", &self.client_uuid)
            .field("shared_secret_b64", &"<redacted>")
            .field("server_public_b64", &self.server_public_b64)
            .finish_non_exhaustive()
    }
}

/// Performs key agreement and registers sessions.
#[derive(Clone)]
pub struct HandshakeManager {
    identity: Arc<ServerIdentity>,
    store: Arc<dyn SessionStore>,
}

impl HandshakeManager {
    pub fn new(identity: Arc<ServerIdentity>, store: Arc<dyn SessionStore>) -> Self {
        Self { identity, store }
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Run a handshake from the request headers.
    pub async fn initialize(&self, headers: &Map<String, Value>) -> TunnelResult<HandshakeOutcome> {
        // 1. Presence
        let missing: Vec<String> = REQUIRED_HEADERS
            .iter()
            .filter(|name| !headers.contains_key(**name))
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(TunnelError::MissingHeaders(missing));
        }

        // 2. Type
        let invalid: Vec<String> = REQUIRED_HEADERS
            .iter()
            .filter(|name| !headers[**name].is_string())
            .map(|name| name.to_string())
            .collect();
        if !invalid.is_empty() {
            return Err(TunnelError::InvalidHeaderTypes(invalid));
        }

        let text = |name: &str| headers[name].as_str().unwrap_or_default();
        let client_uuid = text(CLIENT_UUID_HEADER);
        let auth_token = text(AUTH_TOKEN_HEADER);

        // 3. Decode client key
        let client_public = decode_public_jwk(text(ECDH_INIT_HEADER))?;

        // 4. Agree and persist
        let key = self.identity.agree(&client_public)?;
        let shared_secret_b64 = key.to_jwk_b64();
        self.store.add_session(client_uuid, key, auth_token).await?;

        tracing::info!(client_uuid = %client_uuid, "ECDH handshake completed");

        Ok(HandshakeOutcome {
            client_uuid: client_uuid.to_string(),
            shared_secret_b64,
            server_public_b64: self.identity.public_jwk_b64(),
            auth_token: auth_token.to_string(),
        })
    }
}

/// Flatten HTTP headers into the JSON map the handshake validates.
///
/// Names are lowercase. A repeated header becomes an array and a value that
/// is not valid UTF-8 becomes `null`; both then fail the type check.
pub fn headers_to_json(headers: &HeaderMap) -> Map<String, Value> {
    let mut map = Map::new();
    for name in headers.keys() {
        let values: Vec<Value> = headers
            .get_all(name)
            .iter()
            .map(|v| match v.to_str() {
                Ok(s) => Value::String(s.to_string()),
                Err(_) => Value::Null,
            })
            .collect();
        let value = match <[Value; 1]>::try_from(values) {
            Ok([single]) => single,
            Err(values) => Value::Array(values),
        };
        map.insert(name.as_str().to_string(), value);
    }
    map
}
