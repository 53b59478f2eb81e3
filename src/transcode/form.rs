//! Multipart-as-JSON form descriptors.
//!
//! The client interceptor flattens a `FormData` into
//! `{ fieldName: [ {"_type": "File" | "String" | "Number" | "Boolean", ...} ] }`.
//! Each key maps to a list because form fields may repeat.
//!
//! Descriptors are read through a flat intermediate record rather than a
//! tagged enum so numbers reach `TypedValue::Number` as their original text.

use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;

use crate::error::{TunnelError, TunnelResult};

/// One value of a form field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "_type")]
pub enum TypedValue {
    File {
        name: String,
        size: u64,
        #[serde(rename = "type")]
        mime_type: String,
        #[serde(rename = "buff", serialize_with = "serialize_buff")]
        bytes: Vec<u8>,
    },
    String {
        value: String,
    },
    Number {
        value: JsonNumber,
    },
    Boolean {
        value: bool,
    },
}

/// A JSON number kept digit for digit as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonNumber(String);

impl JsonNumber {
    /// `None` unless `text` is a single JSON number.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let numeric = text.starts_with(|c: char| c == '-' || c.is_ascii_digit());
        (numeric && serde_json::from_str::<serde::de::IgnoredAny>(text).is_ok()).then(|| Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<serde_json::Number> for JsonNumber {
    fn from(number: serde_json::Number) -> Self {
        Self(number.to_string())
    }
}

impl fmt::Display for JsonNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for JsonNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = RawValue::from_string(self.0.clone()).map_err(serde::ser::Error::custom)?;
        raw.serialize(serializer)
    }
}

fn serialize_buff<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

/// Wire shape of a descriptor, every variant's fields optional.
#[derive(Deserialize)]
struct Descriptor {
    #[serde(rename = "_type")]
    kind: String,
    name: Option<String>,
    size: Option<u64>,
    #[serde(rename = "type")]
    mime_type: Option<String>,
    buff: Option<String>,
    value: Option<Box<RawValue>>,
}

impl Descriptor {
    fn into_value(self) -> Result<TypedValue, String> {
        let missing = |field: &str| format!("missing field `{field}` for {}", self.kind);
        let value_text = || self.value.as_ref().map(|raw| raw.get()).ok_or_else(|| missing("value"));

        match self.kind.as_str() {
            "File" => {
                let buff = self.buff.as_deref().ok_or_else(|| missing("buff"))?;
                let bytes = STANDARD
                    .decode(buff.as_bytes())
                    .map_err(|e| format!("could not decode file buffer: {e}"))?;
                Ok(TypedValue::File {
                    name: self.name.clone().ok_or_else(|| missing("name"))?,
                    size: self.size.ok_or_else(|| missing("size"))?,
                    mime_type: self.mime_type.clone().ok_or_else(|| missing("type"))?,
                    bytes,
                })
            }
            "String" => {
                let value = serde_json::from_str(value_text()?).map_err(|e| format!("String value: {e}"))?;
                Ok(TypedValue::String { value })
            }
            "Number" => {
                let text = value_text()?;
                let value = JsonNumber::parse(text).ok_or_else(|| format!("Number value is not a number: {text}"))?;
                Ok(TypedValue::Number { value })
            }
            "Boolean" => {
                let value = serde_json::from_str(value_text()?).map_err(|e| format!("Boolean value: {e}"))?;
                Ok(TypedValue::Boolean { value })
            }
            other => Err(format!("unknown form value type `{other}`")),
        }
    }
}

impl<'de> Deserialize<'de> for TypedValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Descriptor::deserialize(deserializer)?
            .into_value()
            .map_err(serde::de::Error::custom)
    }
}

impl TypedValue {
    /// Build a `File` value, filling `size` from the content.
    pub fn file(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        TypedValue::File {
            name: name.into(),
            size: bytes.len() as u64,
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        TypedValue::String {
            value: value.into(),
        }
    }

    pub fn number(value: impl Into<serde_json::Number>) -> Self {
        TypedValue::Number {
            value: JsonNumber::from(value.into()),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, TypedValue::File { .. })
    }

    /// Text form of a scalar, as it would appear in a form part.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            TypedValue::File { .. } => None,
            TypedValue::String { value } => Some(value.clone()),
            TypedValue::Number { value } => Some(value.to_string()),
            TypedValue::Boolean { value } => Some(value.to_string()),
        }
    }
}

/// Field name → ordered values.
pub type FormFields = BTreeMap<String, Vec<TypedValue>>;

/// Parse a decrypted multipart-as-JSON body.
pub fn parse_form(body: &[u8]) -> TunnelResult<FormFields> {
    let fields: FormFields =
        serde_json::from_slice(body).map_err(|e| TunnelError::Transcode(e.to_string()))?;

    for (field, values) in &fields {
        for value in values {
            if let TypedValue::File { name, size, bytes, .. } = value {
                if *size != bytes.len() as u64 {
                    tracing::debug!(
                        field = %field,
                        file = %name,
                        declared = size,
                        actual = bytes.len(),
                        "File size mismatch, using decoded length"
                    );
                }
            }
        }
    }

    Ok(fields)
}

/// Serialize form fields into the multipart-as-JSON encoding.
pub fn form_to_json(fields: &FormFields) -> TunnelResult<Vec<u8>> {
    serde_json::to_vec(fields).map_err(|e| TunnelError::Transcode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_all_variants() {
        let body = json!({
            "file": [{"_type": "File", "name": "a.txt", "size": 2, "type": "text/plain", "buff": "aGk="}],
            "note": [{"_type": "String", "value": "v"}, {"_type": "String", "value": "w"}],
            "count": [{"_type": "Number", "value": 12.5}],
            "ok": [{"_type": "Boolean", "value": true}],
        });
        let fields = parse_form(&serde_json::to_vec(&body).unwrap()).unwrap();

        assert_eq!(fields["file"], vec![TypedValue::file("a.txt", "text/plain", b"hi".to_vec())]);
        assert_eq!(fields["note"].len(), 2);
        assert_eq!(fields["count"][0].scalar_text().as_deref(), Some("12.5"));
        assert_eq!(fields["ok"][0].scalar_text().as_deref(), Some("true"));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let body = br#"{"x": [{"_type": "Blob", "value": "?"}]}"#;
        assert!(matches!(parse_form(body), Err(TunnelError::Transcode(_))));
    }

    #[test]
    fn test_bad_file_buffer_rejected() {
        let body = br#"{"f": [{"_type": "File", "name": "a", "size": 1, "type": "", "buff": "%%%"}]}"#;
        let err = parse_form(body).unwrap_err();
        assert!(err.to_string().contains("could not decode file buffer"));
    }

    #[test]
    fn test_missing_field_rejected() {
        let body = br#"{"f": [{"_type": "File", "name": "a", "type": "", "buff": ""}]}"#;
        assert!(matches!(parse_form(body), Err(TunnelError::Transcode(_))));
        assert!(matches!(parse_form(br#"{"f": {"_type": "String"}}"#), Err(TunnelError::Transcode(_))));
    }

    #[test]
    fn test_size_mismatch_tolerated() {
        let body = br#"{"f": [{"_type": "File", "name": "a", "size": 99, "type": "", "buff": "aGk="}]}"#;
        let fields = parse_form(body).unwrap();
        match &fields["f"][0] {
            TypedValue::File { bytes, size, .. } => {
                assert_eq!(bytes, b"hi");
                assert_eq!(*size, 99);
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn test_json_encoding_shape() {
        let mut fields = FormFields::new();
        fields.insert("f".into(), vec![TypedValue::file("a.bin", "application/octet-stream", vec![0, 255])]);
        let value: serde_json::Value = serde_json::from_slice(&form_to_json(&fields).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"f": [{"_type": "File", "name": "a.bin", "size": 2, "type": "application/octet-stream", "buff": "AP8="}]})
        );
    }

    #[test]
    fn test_number_keeps_every_digit() {
        let body = br#"{"n": [{"_type": "Number", "value": 12345678901234567890123}, {"_type": "Number", "value": -3.14159265358979323846264}]}"#;
        let fields = parse_form(body).unwrap();
        assert_eq!(fields["n"][0].scalar_text().as_deref(), Some("12345678901234567890123"));
        assert_eq!(fields["n"][1].scalar_text().as_deref(), Some("-3.14159265358979323846264"));

        let encoded = String::from_utf8(form_to_json(&fields).unwrap()).unwrap();
        assert!(encoded.contains(r#""value":12345678901234567890123"#));
        assert!(encoded.contains(r#""value":-3.14159265358979323846264"#));
        assert_eq!(parse_form(encoded.as_bytes()).unwrap(), fields);
    }

    #[test]
    fn test_number_must_be_numeric() {
        assert!(matches!(
            parse_form(br#"{"n": [{"_type": "Number", "value": "12"}]}"#),
            Err(TunnelError::Transcode(_))
        ));
        assert!(matches!(
            parse_form(br#"{"b": [{"_type": "Boolean", "value": 1}]}"#),
            Err(TunnelError::Transcode(_))
        ));
        assert_eq!(JsonNumber::parse(" 42 ").unwrap().as_str(), "42");
        assert!(JsonNumber::parse("4 2").is_none());
        assert!(JsonNumber::parse("[1]").is_none());
    }
}
