use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;

use crate::config::SerializationMode;
use crate::error::{Error, Result};
use crate::schema::{value_subject, RecordSchema, SchemaRegistry};
use crate::types::Message;

/// Encodes outbound payloads and decodes inbound ones according to a serialization mode
#[derive(Clone)]
pub struct PayloadCodec {
    mode: SerializationMode,
    registry: Option<Arc<dyn SchemaRegistry>>,
}

impl PayloadCodec {
    pub fn new(mode: SerializationMode) -> Self {
        Self {
            mode,
            registry: None,
        }
    }

    /// Resolve value schemas from a registry (builder pattern)
    pub fn with_registry(mut self, registry: Arc<dyn SchemaRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn mode(&self) -> SerializationMode {
        self.mode
    }

    pub fn registry(&self) -> Option<&Arc<dyn SchemaRegistry>> {
        self.registry.as_ref()
    }

    /// Decode a message payload
    ///
    /// Returns `None` in raw mode. Any failure, including a registry lookup
    /// failure, is a `SerializationError` carrying the message coordinates.
    pub async fn decode(&self, message: &Message) -> Result<Option<Value>> {
        if !self.mode.is_structured() {
            return Ok(None);
        }

        let fail = |reason: String| Error::SerializationError {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            reason,
        };

        let value: Value = serde_json::from_slice(&message.payload)
            .map_err(|e| fail(format!("invalid JSON: {}", e)))?;

        if self.mode == SerializationMode::Schema {
            if let Some(registry) = &self.registry {
                let schema = registry
                    .resolve(&value_subject(&message.topic))
                    .await
                    .map_err(|e| fail(format!("schema lookup failed: {}", e)))?;
                if let Some(schema) = schema {
                    schema.validate(&value).map_err(fail)?;
                }
            }
        }

        Ok(Some(value))
    }

    /// Encode a value, validating it first when a schema applies
    pub fn encode(&self, value: &Value, schema: Option<&RecordSchema>) -> Result<Bytes> {
        if self.mode == SerializationMode::Schema {
            if let Some(schema) = schema {
                schema.validate(value).map_err(|reason| {
                    Error::EncodingError(format!("{}: {}", schema.full_name(), reason))
                })?;
            }
        }

        match (self.mode, value) {
            (SerializationMode::Raw, Value::String(text)) => Ok(Bytes::from(text.clone())),
            _ => Ok(Bytes::from(serde_json::to_vec(value)?)),
        }
    }
}
