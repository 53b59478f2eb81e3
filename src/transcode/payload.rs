//! Normalization of response payloads to bytes.

use serde_json::value::RawValue;
use serde_json::Value;

/// Render a JSON value as the bytes a client should receive.
///
/// Objects and arrays are JSON-encoded, strings pass through verbatim,
/// numbers keep full precision, booleans are `true`/`false`.
pub fn payload_to_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::Object(_) | Value::Array(_) => value.to_string().into_bytes(),
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Number(n) => n.to_string().into_bytes(),
        Value::Bool(b) => b.to_string().into_bytes(),
        Value::Null => b"null".to_vec(),
    }
}

/// Whether a media type denotes JSON (`application/json` or `*+json`).
pub fn is_json_media_type(content_type: &str) -> bool {
    let media = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    media == "application/json" || media.ends_with("+json")
}

/// Normalize a backend body. JSON bodies follow the `payload_to_bytes`
/// rules but keep the backend's own text, so numbers never pass through
/// `f64`; anything else is passed through untouched.
pub fn normalize_body(content_type: Option<&str>, body: &[u8]) -> Vec<u8> {
    match content_type {
        Some(ct) if is_json_media_type(ct) => match serde_json::from_slice::<Box<RawValue>>(body) {
            Ok(raw) => raw_payload_to_bytes(&raw),
            Err(_) => body.to_vec(),
        },
        _ => body.to_vec(),
    }
}

fn raw_payload_to_bytes(raw: &RawValue) -> Vec<u8> {
    let text = raw.get();
    if text.starts_with('"') {
        if let Ok(s) = serde_json::from_str::<String>(text) {
            return s.into_bytes();
        }
    }
    text.as_bytes().to_vec()
}
