//! Client half of the tunnel protocol.
//!
//! Plays the interceptor role: generates an ephemeral keypair, builds the
//! handshake headers, derives the session key from the server's reply, then
//! seals requests and opens responses.

use std::collections::BTreeMap;

use crate::crypto::{decode_public_jwk, KeyPair, SessionKey};
use crate::envelope::{self, InnerRequest, InnerResponse};
use crate::error::{TunnelError, TunnelResult};
use crate::handshake::{AUTH_TOKEN_HEADER, CLIENT_UUID_HEADER, ECDH_INIT_HEADER};
use crate::transcode::{form_to_json, FormFields, MULTIPART_MARKER};

/// Default tunnel engagement header.
pub const DEFAULT_TUNNEL_HEADER: &str = "x-tunnel";

/// A client endpoint of one tunnel session.
#[derive(Debug)]
pub struct TunnelClient {
    client_uuid: String,
    auth_token: String,
    tunnel_header: String,
    keypair: KeyPair,
    key: Option<SessionKey>,
}

impl TunnelClient {
    pub fn new(client_uuid: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            client_uuid: client_uuid.into(),
            auth_token: auth_token.into(),
            tunnel_header: DEFAULT_TUNNEL_HEADER.to_string(),
            keypair: KeyPair::generate(),
            key: None,
        }
    }

    /// Use a non-default tunnel engagement header.
    pub fn with_tunnel_header(mut self, header: impl Into<String>) -> Self {
        self.tunnel_header = header.into();
        self
    }

    pub fn client_uuid(&self) -> &str {
        &self.client_uuid
    }

    pub fn is_established(&self) -> bool {
        self.key.is_some()
    }

    pub fn session_key(&self) -> Option<&SessionKey> {
        self.key.as_ref()
    }

    /// Headers that start (or restart) a handshake.
    pub fn handshake_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.tunnel_headers();
        headers.push((ECDH_INIT_HEADER.to_string(), self.keypair.public_jwk_b64()));
        headers
    }

    /// Headers attached to every tunneled request.
    pub fn tunnel_headers(&self) -> Vec<(String, String)> {
        vec![
            (self.tunnel_header.clone(), "true".to_string()),
            (CLIENT_UUID_HEADER.to_string(), self.client_uuid.clone()),
            (AUTH_TOKEN_HEADER.to_string(), self.auth_token.clone()),
        ]
    }

    /// Derive the session key from the handshake response body.
    pub fn complete_handshake(&mut self, server_public_b64: &str) -> TunnelResult<()> {
        let server_public = decode_public_jwk(server_public_b64)?;
        self.key = Some(self.keypair.agree(&server_public)?);
        Ok(())
    }

    /// Drop the current session and switch to a fresh keypair.
    pub fn rekey(&mut self) {
        self.keypair = KeyPair::generate();
        self.key = None;
    }

    fn key(&self) -> TunnelResult<&SessionKey> {
        self.key.as_ref().ok_or(TunnelError::NotEstablished)
    }

    /// Seal an inner request into envelope bytes.
    pub fn seal_request(&self, request: &InnerRequest) -> TunnelResult<Vec<u8>> {
        envelope::encode(request, self.key()?)
    }

    /// Seal a JSON body.
    pub fn seal_json(&self, method: &str, body: &serde_json::Value) -> TunnelResult<Vec<u8>> {
        let request = InnerRequest {
            method: method.to_string(),
            headers: BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body: serde_json::to_vec(body).map_err(|e| TunnelError::MalformedPayload(e.to_string()))?,
        };
        self.seal_request(&request)
    }

    /// Seal a form using the multipart-as-JSON encoding.
    pub fn seal_form(&self, method: &str, fields: &FormFields) -> TunnelResult<Vec<u8>> {
        let request = InnerRequest {
            method: method.to_string(),
            headers: BTreeMap::from([("Content-Type".to_string(), MULTIPART_MARKER.to_string())]),
            body: form_to_json(fields)?,
        };
        self.seal_request(&request)
    }

    /// Open a tunneled response envelope.
    pub fn open_response(&self, envelope_bytes: &[u8]) -> TunnelResult<InnerResponse> {
        envelope::decode(envelope_bytes, self.key()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ServerIdentity;
    use serde_json::json;

    fn established() -> (TunnelClient, SessionKey) {
        let server = ServerIdentity::generate();
        let mut client = TunnelClient::new("u1", "jwt");
        let server_key = server
            .agree(&decode_public_jwk(&client.keypair.public_jwk_b64()).unwrap())
            .unwrap();
        client.complete_handshake(&server.public_jwk_b64()).unwrap();
        (client, server_key)
    }

    #[test]
    fn test_not_established() {
        let client = TunnelClient::new("u1", "jwt");
        assert!(!client.is_established());
        assert!(matches!(
            client.seal_json("GET", &json!({})),
            Err(TunnelError::NotEstablished)
        ));
    }

    #[test]
    fn test_handshake_headers() {
        let client = TunnelClient::new("u1", "jwt").with_tunnel_header("x-custom");
        let headers = client.handshake_headers();
        let names: Vec<&str> = headers.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["x-custom", "x-client-uuid", "mp-jwt", "x-ecdh-init"]);
        assert!(decode_public_jwk(&headers[3].1).is_ok());
    }

    #[test]
    fn test_keys_agree_with_server() {
        let (client, server_key) = established();
        assert_eq!(client.session_key(), Some(&server_key));

        let wire = client.seal_json("POST", &json!({"a": 1})).unwrap();
        let request: InnerRequest = envelope::decode(&wire, &server_key).unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.media_type().as_deref(), Some("application/json"));
    }

    #[test]
    fn test_rekey_clears_session() {
        let (mut client, _) = established();
        let before = client.keypair.public_jwk_b64();
        client.rekey();
        assert!(!client.is_established());
        assert_ne!(client.keypair.public_jwk_b64(), before);
    }
}
