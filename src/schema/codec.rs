//! Structured fallback codec.
//!
//! Field types without a built-in column type are kept as a JSON tree
//! ([`Value::Structured`](crate::schema::Value::Structured)) and stored as text.
//! The codec turning that tree into text is handed to each service when it is
//! built, so two services can use different encodings side by side.

use crate::error::DecodeError;
use std::fmt;

/// Encodes structured values to text and back.
pub trait StructuredCodec: Send + Sync + fmt::Debug {
    fn encode(&self, value: &serde_json::Value) -> String;

    fn decode(&self, text: &str) -> Result<serde_json::Value, DecodeError>;
}

/// JSON text codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    /// Emit indented JSON instead of the compact form.
    pub pretty: bool,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl StructuredCodec for JsonCodec {
    fn encode(&self, value: &serde_json::Value) -> String {
        if self.pretty {
            format!("{:#}", value)
        } else {
            value.to_string()
        }
    }

    fn decode(&self, text: &str) -> Result<serde_json::Value, DecodeError> {
        serde_json::from_str(text).map_err(|e| DecodeError::Structured(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_codec_round_trip() {
        let codec = JsonCodec::new();
        let value = json!({"tags": ["a", "b"], "depth": {"n": 3}});

        let text = codec.encode(&value);
        assert!(!text.contains('\n'));
        assert_eq!(codec.decode(&text), Ok(value.clone()));

        let pretty = JsonCodec::pretty().encode(&value);
        assert!(pretty.contains('\n'));
        assert_eq!(codec.decode(&pretty), Ok(value));
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode("{not json"),
            Err(DecodeError::Structured(_))
        ));
    }
}
