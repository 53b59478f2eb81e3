//! Encrypted envelope codec.
//!
//! # Wire Format
//! ```text
//! {"data": base64url(nonce || AES-256-GCM(json(inner message)) || tag)}
//! ```
//!
//! Inner messages carry their body as a base64 string of raw bytes, so JSON
//! bodies, multipart-as-JSON descriptors and opaque assets all travel the
//! same way.

use std::collections::BTreeMap;

use base64::{
    alphabet,
    engine::{general_purpose::GeneralPurpose, GeneralPurposeConfig, DecodePaddingMode},
    Engine,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::crypto::SessionKey;
use crate::error::{TunnelError, TunnelResult};

/// URL-safe alphabet, padded on encode, padding optional on decode.
const ENVELOPE_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Outer transport frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub data: String,
}

/// A request as the client interceptor saw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerRequest {
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, with = "body_bytes")]
    pub body: Vec<u8>,
}

/// A response as it should be reconstructed by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerResponse {
    pub status: u16,
    #[serde(rename = "statusText", default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, with = "body_bytes")]
    pub body: Vec<u8>,
}

impl InnerRequest {
    /// Header lookup ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Declared media type, lowercased and without parameters.
    pub fn media_type(&self) -> Option<String> {
        self.header("content-type").map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }
}

/// Serialize `message`, encrypt it with `key` and wrap it in an envelope.
pub fn encode<T: Serialize>(message: &T, key: &SessionKey) -> TunnelResult<Vec<u8>> {
    let plaintext = serde_json::to_vec(message)
        .map_err(|e| TunnelError::MalformedPayload(e.to_string()))?;
    let sealed = key.seal(&plaintext)?;

    let envelope = Envelope {
        data: ENVELOPE_B64.encode(sealed),
    };
    serde_json::to_vec(&envelope).map_err(|e| TunnelError::MalformedEnvelope(e.to_string()))
}

/// Unwrap an envelope, decrypt it with `key` and parse the inner message.
pub fn decode<T: DeserializeOwned>(envelope: &[u8], key: &SessionKey) -> TunnelResult<T> {
    let envelope: Envelope = serde_json::from_slice(envelope)
        .map_err(|e| TunnelError::MalformedEnvelope(e.to_string()))?;
    let sealed = ENVELOPE_B64
        .decode(envelope.data.as_bytes())
        .map_err(|e| TunnelError::MalformedEnvelope(format!("data: {e}")))?;

    let plaintext = key.open(&sealed)?;

    serde_json::from_slice(&plaintext).map_err(|e| TunnelError::MalformedPayload(e.to_string()))
}

/// Bodies travel as base64 (standard alphabet) strings.
mod body_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        match encoded {
            Some(s) => STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
