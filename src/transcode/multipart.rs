//! Conversion between form descriptors and real `multipart/form-data` bodies.

use axum::{
    body::Body,
    extract::{FromRequest, Multipart},
    http::{header::CONTENT_TYPE, Request},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use rand::{rngs::OsRng, RngCore};

use crate::error::{TunnelError, TunnelResult};
use crate::transcode::form::{FormFields, TypedValue};

/// Fixed prefix of every generated boundary.
pub const BOUNDARY_PREFIX: &str = "----Layer8FormBoundary";

/// An encoded multipart body and the boundary it uses.
#[derive(Debug, Clone)]
pub struct MultipartBody {
    pub boundary: String,
    pub body: Vec<u8>,
}

impl MultipartBody {
    /// `Content-Type` header value advertising the boundary.
    ///
    /// The boundary is quoted since base64 output may contain `/`, `+`, `=`.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary=\"{}\"", self.boundary)
    }
}

/// Fresh boundary from 16 bytes of OS randomness.
pub fn generate_boundary() -> String {
    let mut random = [0u8; 16];
    OsRng.fill_bytes(&mut random);
    format!("{}{}", BOUNDARY_PREFIX, STANDARD.encode(random))
}

/// Encode form fields as a multipart body with a fresh boundary.
pub fn encode_multipart(fields: &FormFields) -> MultipartBody {
    encode_with_boundary(fields, generate_boundary())
}

fn encode_with_boundary(fields: &FormFields, boundary: String) -> MultipartBody {
    let mut body = Vec::new();

    for (name, values) in fields {
        for value in values {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            match value {
                TypedValue::File { name: file_name, mime_type, bytes, .. } => {
                    let mime = if mime_type.is_empty() {
                        "application/octet-stream"
                    } else {
                        mime_type.as_str()
                    };
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                            escape_quoted(name),
                            escape_quoted(file_name),
                            mime
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                }
                scalar => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                            escape_quoted(name)
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(scalar.scalar_text().unwrap_or_default().as_bytes());
                }
            }
            body.extend_from_slice(b"\r\n");
        }
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

    MultipartBody { boundary, body }
}

/// Percent-escape the characters that would break a quoted header parameter.
fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Parse a `multipart/form-data` body back into form fields.
///
/// Parts with a filename become `File`; all other parts become `String`.
pub async fn decode_multipart(content_type: &str, body: Bytes) -> TunnelResult<FormFields> {
    let request = Request::builder()
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .map_err(|e| TunnelError::Transcode(e.to_string()))?;

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| TunnelError::Transcode(e.to_string()))?;

    let mut fields = FormFields::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| TunnelError::Transcode(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let mime_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| TunnelError::Transcode(e.to_string()))?;

        let value = match file_name {
            Some(file_name) => TypedValue::file(file_name, mime_type.unwrap_or_default(), data.to_vec()),
            None => TypedValue::string(
                String::from_utf8(data.to_vec())
                    .map_err(|_| TunnelError::Transcode(format!("field '{}' is not UTF-8", name)))?,
            ),
        };
        fields.entry(name).or_default().push(value);
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_form() -> FormFields {
        let mut fields = FormFields::new();
        fields.insert("file".into(), vec![TypedValue::file("a.txt", "text/plain", b"hi".to_vec())]);
        fields.insert("note".into(), vec![TypedValue::string("v")]);
        fields
    }

    #[test]
    fn test_boundary_format() {
        let b1 = generate_boundary();
        let b2 = generate_boundary();
        assert!(b1.starts_with(BOUNDARY_PREFIX));
        assert_eq!(b1.len(), BOUNDARY_PREFIX.len() + 24);
        assert_ne!(b1, b2);
    }

    #[test]
    fn test_encoded_layout() {
        let encoded = encode_with_boundary(&sample_form(), "XYZ".into());
        let text = String::from_utf8(encoded.body).unwrap();
        assert_eq!(
            text,
            "--XYZ\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             hi\r\n\
             --XYZ\r\n\
             Content-Disposition: form-data; name=\"note\"\r\n\r\n\
             v\r\n\
             --XYZ--\r\n"
        );
        assert_eq!(encoded.boundary, "XYZ");
    }

    #[tokio::test]
    async fn test_round_trip() {
        let original = sample_form();
        let encoded = encode_multipart(&original);
        let decoded = decode_multipart(&encoded.content_type(), Bytes::from(encoded.body))
            .await
            .unwrap();
        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn test_round_trip_binary_and_repeated_fields() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let mut fields = FormFields::new();
        fields.insert(
            "files".into(),
            vec![
                TypedValue::file("one.bin", "application/octet-stream", payload.clone()),
                TypedValue::file("two.bin", "", b"\r\n--not-a-boundary\r\n".to_vec()),
            ],
        );
        fields.insert(
            "flags".into(),
            vec![TypedValue::Boolean { value: false }, TypedValue::number(42)],
        );

        let encoded = encode_multipart(&fields);
        let decoded = decode_multipart(&encoded.content_type(), Bytes::from(encoded.body))
            .await
            .unwrap();

        match &decoded["files"][..] {
            [TypedValue::File { bytes: a, name: na, .. }, TypedValue::File { bytes: b, mime_type, .. }] => {
                assert_eq!(a, &payload);
                assert_eq!(na, "one.bin");
                assert_eq!(b, b"\r\n--not-a-boundary\r\n");
                assert_eq!(mime_type, "application/octet-stream");
            }
            other => panic!("unexpected files {:?}", other),
        }
        assert_eq!(decoded["flags"], vec![TypedValue::string("false"), TypedValue::string("42")]);
    }

    #[tokio::test]
    async fn test_decode_rejects_non_multipart() {
        let err = decode_multipart("application/json", Bytes::from_static(b"{}")).await;
        assert!(matches!(err, Err(TunnelError::Transcode(_))));
    }
}
