use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Message delivered by the broker
///
/// Read-only to the consumer; each message is handed to exactly one handler call.
#[derive(Debug, Clone)]
pub struct Message {
    /// Topic the message was read from
    pub topic: String,

    /// Partition within the topic
    pub partition: i32,

    /// Partition-local position
    pub offset: i64,

    /// Optional message key
    pub key: Option<Bytes>,

    /// Raw payload
    pub payload: Bytes,

    /// Broker timestamp, when available
    pub timestamp: Option<DateTime<Utc>>,

    /// Decoded payload, filled in by the consumption loop for structured serialization
    pub value: Option<Value>,
}

impl Message {
    /// Create a message with an empty key and no timestamp
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload: payload.into(),
            timestamp: None,
            value: None,
        }
    }

    /// Set the key (builder pattern)
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the timestamp (builder pattern)
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Key as UTF-8, if present and valid
    pub fn key_str(&self) -> Option<&str> {
        self.key.as_deref().and_then(|k| std::str::from_utf8(k).ok())
    }

    /// Payload as UTF-8, if valid
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Deserialize the payload as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.value {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(serde_json::from_slice(&self.payload)?),
        }
    }

    /// Where this message sits, for log context
    pub fn coordinates(&self) -> String {
        format!("{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// Record handed to a producer client for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

impl OutboundRecord {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload: payload.into(),
        }
    }

    /// Set the key (builder pattern)
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// Starting position for an assigned partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offset {
    /// Earliest available message
    Beginning,
    /// Log end; only messages produced from now on
    End,
    /// Whatever the broker would pick: committed offset, else its reset policy
    Stored,
    /// Absolute position
    At(i64),
}

/// One partition handed to this consumer during a (re)assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionAssignment {
    pub topic: String,
    pub partition: i32,
    pub offset: Offset,
}

impl PartitionAssignment {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset: Offset::Stored,
        }
    }
}

/// Create-topic request: name, partition count and replication factor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NewTopic {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

impl NewTopic {
    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i32) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::ValidationError(
                "Topic name must not be empty".to_string(),
            ));
        }
        if partitions < 1 || replication_factor < 1 {
            return Err(Error::ValidationError(format!(
                "Topic '{}' needs at least one partition and one replica",
                name
            )));
        }
        Ok(Self {
            name,
            partitions,
            replication_factor,
        })
    }
}
