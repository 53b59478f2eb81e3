//! X25519 identities and public-key JWK transport encoding.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypto::key::SessionKey;
use crate::error::{TunnelError, TunnelResult};

/// Public key in JWK form (RFC 8037, OKP / X25519).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PublicJwk {
    kty: String,
    crv: String,
    x: String,
}

const JWK_KTY: &str = "OKP";
const JWK_CRV: &str = "X25519";

/// Encode a public key as base64(JSON JWK).
pub fn encode_public_jwk(key: &PublicKey) -> String {
    let jwk = PublicJwk {
        kty: JWK_KTY.to_string(),
        crv: JWK_CRV.to_string(),
        x: URL_SAFE_NO_PAD.encode(key.as_bytes()),
    };
    // Serializing three owned strings cannot fail.
    let json = serde_json::to_vec(&jwk).unwrap_or_default();
    STANDARD.encode(json)
}

/// Decode a base64(JSON JWK) string into an X25519 public key.
pub fn decode_public_jwk(encoded: &str) -> TunnelResult<PublicKey> {
    let json = STANDARD
        .decode(encoded.trim())
        .map_err(|e| TunnelError::KeyDecode(format!("base64: {e}")))?;
    let jwk: PublicJwk = serde_json::from_slice(&json)
        .map_err(|e| TunnelError::KeyDecode(format!("jwk: {e}")))?;

    if jwk.kty != JWK_KTY || jwk.crv != JWK_CRV {
        return Err(TunnelError::KeyDecode(format!(
            "unsupported key type {}/{}",
            jwk.kty, jwk.crv
        )));
    }

    let raw = URL_SAFE_NO_PAD
        .decode(jwk.x.as_bytes())
        .map_err(|e| TunnelError::KeyDecode(format!("x coordinate: {e}")))?;
    let bytes: [u8; 32] = raw
        .try_into()
        .map_err(|_| TunnelError::KeyDecode("expected 32-byte public key".into()))?;

    Ok(PublicKey::from(bytes))
}

/// An X25519 keypair.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

/// The server's long-lived handshake identity, generated once per process.
pub type ServerIdentity = KeyPair;

impl KeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Public half as base64(JSON JWK).
    pub fn public_jwk_b64(&self) -> String {
        encode_public_jwk(&self.public)
    }

    /// Run ECDH against a peer public key and derive the session key.
    ///
    /// Rejects low-order peer points, which would force an all-zero secret.
    pub fn agree(&self, peer: &PublicKey) -> TunnelResult<SessionKey> {
        let shared = self.secret.diffie_hellman(peer);
        if !shared.was_contributory() {
            return Err(TunnelError::HandshakeCrypto(
                "peer public key is a low-order point".into(),
            ));
        }
        SessionKey::derive(shared.as_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_jwk_b64())
            .finish_non_exhaustive()
    }
}
