//! Content transcoding subsystem.
//!
//! # Data Flow
//! ```text
//! inbound (decrypted request body):
//!     application/layer8.buffer+json
//!         → form.rs (parse typed descriptors)
//!         → multipart.rs (fresh boundary, multipart/form-data body)
//!     anything else
//!         → passed through (application/json when undeclared)
//!
//! outbound (backend response body):
//!     → payload.rs (normalize to bytes)
//! ```

pub mod form;
pub mod multipart;
pub mod payload;

pub use form::{form_to_json, parse_form, FormFields, JsonNumber, TypedValue};
pub use multipart::{decode_multipart, encode_multipart, generate_boundary, MultipartBody, BOUNDARY_PREFIX};
pub use payload::{normalize_body, payload_to_bytes};

use crate::error::TunnelResult;

/// Private media type marking a multipart form encoded as typed JSON.
pub const MULTIPART_MARKER: &str = "application/layer8.buffer+json";

/// A request body ready to hand to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodedBody {
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Turn a decrypted inner body into what the backend should receive.
///
/// `content_type` is the inner request's declared content type. Bodies that
/// are not marked as multipart-as-JSON keep it, defaulting to JSON.
pub fn transcode_request_body(content_type: Option<&str>, body: &[u8]) -> TunnelResult<TranscodedBody> {
    let media_type = content_type.map(|ct| {
        ct.split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    });

    if media_type.as_deref() == Some(MULTIPART_MARKER) {
        let fields = parse_form(body)?;
        let encoded = encode_multipart(&fields);
        return Ok(TranscodedBody {
            content_type: encoded.content_type(),
            body: encoded.body,
        });
    }

    let content_type = match content_type {
        Some(ct) if !ct.trim().is_empty() => ct.to_string(),
        _ => "application/json".to_string(),
    };
    Ok(TranscodedBody {
        content_type,
        body: body.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TunnelError;

    #[test]
    fn test_marker_becomes_multipart() {
        let body = br#"{"note": [{"_type": "String", "value": "v"}]}"#;
        let out = transcode_request_body(Some(MULTIPART_MARKER), body).unwrap();
        assert!(out.content_type.starts_with("multipart/form-data; boundary=\"----Layer8FormBoundary"));
        assert!(String::from_utf8(out.body).unwrap().contains("name=\"note\"\r\n\r\nv\r\n"));
    }

    #[test]
    fn test_marker_numbers_keep_precision() {
        let body = br#"{"amount": [{"_type": "Number", "value": 12345678901234567890123.000000000000000001}]}"#;
        let out = transcode_request_body(Some(MULTIPART_MARKER), body).unwrap();
        let text = String::from_utf8(out.body).unwrap();
        assert!(text.contains("name=\"amount\"\r\n\r\n12345678901234567890123.000000000000000001\r\n"));
    }

    #[test]
    fn test_other_types_pass_through() {
        let out = transcode_request_body(Some("application/json; charset=utf-8"), br#"{"a":1}"#).unwrap();
        assert_eq!(out.content_type, "application/json; charset=utf-8");
        assert_eq!(out.body, br#"{"a":1}"#);

        let out = transcode_request_body(None, b"{}").unwrap();
        assert_eq!(out.content_type, "application/json");

        let out = transcode_request_body(Some(" "), b"{}").unwrap();
        assert_eq!(out.content_type, "application/json");
    }

    #[test]
    fn test_marker_matched_case_insensitively() {
        let body = br#"{"n": [{"_type": "Number", "value": 3}]}"#;
        let out = transcode_request_body(Some("Application/Layer8.Buffer+JSON"), body).unwrap();
        assert!(out.content_type.starts_with("multipart/form-data"));
    }

    #[test]
    fn test_bad_descriptor() {
        let err = transcode_request_body(Some(MULTIPART_MARKER), b"[1,2]").unwrap_err();
        assert!(matches!(err, TunnelError::Transcode(_)));
    }
}
