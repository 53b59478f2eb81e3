//! Session keys and authenticated encryption.
//!
//! Cipher: AES-256-GCM, random 96-bit nonce per message.
//!
//! Ciphertext wire format:
//!   [ nonce (12 bytes) | ciphertext + tag (16 bytes) ]

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{TunnelError, TunnelResult};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HKDF_SALT: &[u8] = b"layer8-tunnel-v1";
const HKDF_INFO: &[u8] = b"session-key";

/// Symmetric JWK (`kty = "oct"`).
#[derive(Serialize, Deserialize)]
struct OctJwk {
    kty: String,
    k: String,
}

/// 32-byte symmetric key bound to one client session. Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive the session key from raw ECDH output.
    pub fn derive(shared_secret: &[u8]) -> TunnelResult<Self> {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared_secret);
        let mut okm = [0u8; 32];
        hk.expand(HKDF_INFO, &mut okm)
            .map_err(|e| TunnelError::HandshakeCrypto(e.to_string()))?;
        Ok(Self(okm))
    }

    /// Encrypt `plaintext`, prepending a fresh nonce.
    pub fn seal(&self, plaintext: &[u8]) -> TunnelResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&self.0).map_err(|_| TunnelError::Encrypt)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| TunnelError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt `nonce || ciphertext + tag`. Every failure is `TunnelError::Decrypt`.
    pub fn open(&self, data: &[u8]) -> TunnelResult<Vec<u8>> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(TunnelError::Decrypt);
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(&self.0).map_err(|_| TunnelError::Decrypt)?;
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| TunnelError::Decrypt)
    }

    /// Export as base64(JSON oct JWK).
    pub fn to_jwk_b64(&self) -> String {
        let jwk = OctJwk {
            kty: "oct".to_string(),
            k: URL_SAFE_NO_PAD.encode(self.0),
        };
        let mut json = serde_json::to_vec(&jwk).unwrap_or_default();
        let encoded = STANDARD.encode(&json);
        json.zeroize();
        encoded
    }

    /// Import from base64(JSON oct JWK). Returns `None` on any format problem.
    pub fn from_jwk_b64(encoded: &str) -> Option<Self> {
        let mut json = STANDARD.decode(encoded).ok()?;
        let parsed: Option<OctJwk> = serde_json::from_slice(&json).ok();
        json.zeroize();

        let mut jwk = parsed?;
        if jwk.kty != "oct" {
            return None;
        }
        let mut raw = URL_SAFE_NO_PAD.decode(jwk.k.as_bytes()).ok()?;
        jwk.k.zeroize();

        let key = <[u8; 32]>::try_from(raw.as_slice()).ok().map(Self);
        raw.zeroize();
        key
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}
