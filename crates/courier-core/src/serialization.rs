//! Message body serialization.
//!
//! Logical messages travel through the pipeline as `serde_json::Value`
//! trees tagged with their message type. A [`MessageSerializer`] turns those
//! trees into wire bytes and back. JSON is the only built-in format.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A message in its logical (typed but not yet bound) form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalMessage {
    pub message_type: String,
    pub body: serde_json::Value,
}

impl LogicalMessage {
    pub fn new(message_type: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            body,
        }
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct SerializationError(pub String);

impl From<serde_json::Error> for SerializationError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

/// Converts logical message bodies to and from wire bytes.
pub trait MessageSerializer: Send + Sync {
    /// Value written to the content-type header.
    fn content_type(&self) -> &str;

    fn serialize(&self, body: &serde_json::Value) -> Result<Vec<u8>, SerializationError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<serde_json::Value, SerializationError>;
}

/// UTF-8 JSON bodies.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMessageSerializer;

impl MessageSerializer for JsonMessageSerializer {
    fn content_type(&self) -> &str {
        "application/json"
    }

    fn serialize(&self, body: &serde_json::Value) -> Result<Vec<u8>, SerializationError> {
        Ok(serde_json::to_vec(body)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<serde_json::Value, SerializationError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_serializer_reads_what_it_writes() {
        let serializer = JsonMessageSerializer;
        let body = serde_json::json!({ "order_id": 42, "lines": ["a", "b"] });
        let bytes = serializer.serialize(&body).unwrap();
        assert_eq!(serializer.deserialize(&bytes).unwrap(), body);
        assert_eq!(serializer.content_type(), "application/json");
    }

    #[test]
    fn malformed_body_reports_reason() {
        let err = JsonMessageSerializer.deserialize(b"{not json").unwrap_err();
        assert!(err.to_string().contains("key must be a string"));
    }
}
