use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, FlushReport, ProducerClient};
use crate::config::SerializationMode;
use crate::error::{Error, Result};
use crate::producer::provisioner::TopicProvisioner;
use crate::schema::{key_subject, value_subject, PayloadCodec, RecordSchema, SchemaRegistry};
use crate::types::{OutboundRecord, TopicName};

/// Configuration for a publisher
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Topic to publish to
    pub topic: String,

    /// Record schema for keys (Avro JSON notation)
    pub key_schema: Option<String>,

    /// Record schema for values (Avro JSON notation)
    pub value_schema: Option<String>,

    /// Partitions to create the topic with
    pub partitions: i32,

    /// Replication factor to create the topic with
    pub replicas: i32,

    /// Payload encoding
    pub serialization: SerializationMode,

    /// Upper bound on the flush performed by `close`
    pub flush_timeout: Duration,
}

impl PublisherConfig {
    /// Create a configuration for a single-partition, single-replica topic
    ///
    /// # Example
    ///
    /// ```
    /// use topic_relay::producer::PublisherConfig;
    ///
    /// let config = PublisherConfig::new("org.chicago.cta.turnstile")
    ///     .with_layout(3, 1)
    ///     .with_value_schema(r#"{"type": "record", "name": "turnstile", "fields": []}"#);
    /// assert_eq!(config.partitions, 3);
    /// ```
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key_schema: None,
            value_schema: None,
            partitions: 1,
            replicas: 1,
            serialization: SerializationMode::default(),
            flush_timeout: Duration::from_secs(10),
        }
    }

    /// Set the key schema (builder pattern)
    pub fn with_key_schema(mut self, schema: impl Into<String>) -> Self {
        self.key_schema = Some(schema.into());
        self
    }

    /// Set the value schema (builder pattern)
    pub fn with_value_schema(mut self, schema: impl Into<String>) -> Self {
        self.value_schema = Some(schema.into());
        self
    }

    /// Set partition count and replication factor (builder pattern)
    pub fn with_layout(mut self, partitions: i32, replicas: i32) -> Self {
        self.partitions = partitions;
        self.replicas = replicas;
        self
    }

    /// Set the serialization mode (builder pattern)
    pub fn with_serialization(mut self, mode: SerializationMode) -> Self {
        self.serialization = mode;
        self
    }

    /// Set the close flush timeout (builder pattern)
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }
}

/// Publishes to one provisioned topic
///
/// `publish` only buffers; delivery is acknowledged asynchronously by the
/// producer client. `close` must be called before shutdown: it flushes the
/// buffer and fails if anything could not be delivered.
///
/// # Example
///
/// ```
/// use topic_relay::broker::{Broker, InMemoryBroker};
/// use topic_relay::producer::{Publisher, PublisherConfig, TopicProvisioner};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> topic_relay::Result<()> {
/// let broker = InMemoryBroker::new();
/// let provisioner = TopicProvisioner::isolated(broker.admin()?);
///
/// let publisher = Publisher::new(&broker, &provisioner, PublisherConfig::new("stations")).await?;
/// publisher.publish(&json!(40380), &json!({ "station_name": "Clark/Lake" }))?;
///
/// let report = publisher.close().await?;
/// assert_eq!(report.delivered, 1);
/// # Ok(())
/// # }
/// ```
pub struct Publisher {
    topic: TopicName,
    producer: Box<dyn ProducerClient>,
    codec: PayloadCodec,
    key_schema: Option<RecordSchema>,
    value_schema: Option<RecordSchema>,
    flush_timeout: Duration,
    closed: bool,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic)
            .field("key_schema", &self.key_schema)
            .field("value_schema", &self.value_schema)
            .field("flush_timeout", &self.flush_timeout)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Publisher {
    /// Provision the topic, then build the broker-facing producer
    pub async fn new(
        broker: &dyn Broker,
        provisioner: &TopicProvisioner,
        config: PublisherConfig,
    ) -> Result<Self> {
        let topic = TopicName::new(config.topic.as_str())?;
        let key_schema = config
            .key_schema
            .as_deref()
            .map(RecordSchema::parse)
            .transpose()?;
        let value_schema = config
            .value_schema
            .as_deref()
            .map(RecordSchema::parse)
            .transpose()?;

        let outcome = provisioner
            .ensure(topic.as_str(), config.partitions, config.replicas)
            .await?;
        debug!(topic = %topic, ?outcome, "topic ready");

        let producer = broker.producer()?;

        Ok(Self {
            topic,
            producer,
            codec: PayloadCodec::new(config.serialization),
            key_schema,
            value_schema,
            flush_timeout: config.flush_timeout,
            closed: false,
        })
    }

    /// Register this publisher's schemas under `{topic}-key` / `{topic}-value`
    pub async fn register_schemas(&self, registry: &Arc<dyn SchemaRegistry>) -> Result<()> {
        if let Some(schema) = &self.key_schema {
            registry.register(&key_subject(self.topic.as_str()), schema).await?;
        }
        if let Some(schema) = &self.value_schema {
            registry.register(&value_subject(self.topic.as_str()), schema).await?;
        }
        Ok(())
    }

    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    /// Encode and buffer a key/value pair
    pub fn publish(&self, key: &Value, value: &Value) -> Result<()> {
        let key = self.codec.encode(key, self.key_schema.as_ref())?;
        let payload = self.codec.encode(value, self.value_schema.as_ref())?;
        self.publish_raw(Some(key), payload)
    }

    /// Serialize and buffer any serde values
    pub fn publish_json<K: Serialize, V: Serialize>(&self, key: &K, value: &V) -> Result<()> {
        self.publish(&serde_json::to_value(key)?, &serde_json::to_value(value)?)
    }

    /// Buffer already-encoded bytes
    pub fn publish_raw(&self, key: Option<Bytes>, payload: Bytes) -> Result<()> {
        let mut record = OutboundRecord::new(self.topic.as_str(), payload);
        if let Some(key) = key {
            record = record.with_key(key);
        }
        self.producer.send(record)
    }

    /// Records buffered but not yet acknowledged
    pub fn in_flight(&self) -> usize {
        self.producer.in_flight()
    }

    /// Flush the buffer and release the publisher
    ///
    /// # Errors
    ///
    /// * `Error::FlushError` - records remained unacknowledged or were rejected;
    ///   they may be lost
    pub async fn close(mut self) -> Result<FlushReport> {
        self.closed = true;
        let report = self.producer.flush(self.flush_timeout).await?;

        if !report.is_complete() {
            error!(
                topic = %self.topic,
                remaining = report.remaining,
                failed = report.failed,
                "producer flush incomplete"
            );
            return Err(Error::FlushError {
                remaining: report.remaining,
                failed: report.failed,
            });
        }

        info!(topic = %self.topic, delivered = report.delivered, "producer closed");
        Ok(report)
    }

    /// Milliseconds since the Unix epoch, the conventional event key
    pub fn time_millis() -> i64 {
        Utc::now().timestamp_millis()
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if !self.closed {
            let pending = self.producer.in_flight();
            if pending > 0 {
                warn!(topic = %self.topic, pending, "publisher dropped without close");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use serde_json::json;

    const KEY_SCHEMA: &str = r#"{"type": "record", "name": "arrival.key", "fields": [
        {"name": "timestamp", "type": "long"}
    ]}"#;

    #[tokio::test]
    async fn test_publish_and_close() {
        let broker = InMemoryBroker::new();
        let provisioner = TopicProvisioner::isolated(broker.admin().unwrap());
        let publisher = Publisher::new(&broker, &provisioner, PublisherConfig::new("stations"))
            .await
            .unwrap();

        publisher.publish(&json!(1), &json!({ "line": "red" })).unwrap();
        publisher.publish(&json!(2), &json!({ "line": "blue" })).unwrap();
        assert_eq!(publisher.in_flight(), 2);

        let report = publisher.close().await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(broker.records("stations", 0).len(), 2);
    }

    #[tokio::test]
    async fn test_schema_mode_rejects_invalid_key() {
        let broker = InMemoryBroker::new();
        let provisioner = TopicProvisioner::isolated(broker.admin().unwrap());
        let config = PublisherConfig::new("arrivals")
            .with_key_schema(KEY_SCHEMA)
            .with_serialization(SerializationMode::Schema);
        let publisher = Publisher::new(&broker, &provisioner, config).await.unwrap();

        let ok = publisher.publish(&json!({ "timestamp": Publisher::time_millis() }), &json!({}));
        assert!(ok.is_ok());

        let bad = publisher.publish(&json!({ "ts": 1 }), &json!({}));
        assert!(matches!(bad, Err(Error::EncodingError(_))));
        assert_eq!(publisher.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_invalid_schema_fails_construction() {
        let broker = InMemoryBroker::new();
        let provisioner = TopicProvisioner::isolated(broker.admin().unwrap());
        let config = PublisherConfig::new("arrivals").with_value_schema("{");

        assert!(Publisher::new(&broker, &provisioner, config).await.is_err());
        assert_eq!(broker.metadata_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_surfaces_flush_failure() {
        let broker = InMemoryBroker::new();
        let provisioner = TopicProvisioner::isolated(broker.admin().unwrap());
        let config = PublisherConfig::new("stations").with_flush_timeout(Duration::from_millis(50));
        let publisher = Publisher::new(&broker, &provisioner, config).await.unwrap();

        publisher.publish(&json!(1), &json!({})).unwrap();
        broker.set_available(false);

        match publisher.close().await {
            Err(Error::FlushError { remaining, .. }) => assert_eq!(remaining, 1),
            other => panic!("expected flush error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_schemas() {
        let broker = InMemoryBroker::new();
        let provisioner = TopicProvisioner::isolated(broker.admin().unwrap());
        let config = PublisherConfig::new("arrivals").with_key_schema(KEY_SCHEMA);
        let publisher = Publisher::new(&broker, &provisioner, config).await.unwrap();

        let registry: Arc<dyn SchemaRegistry> = Arc::new(crate::schema::StaticSchemaRegistry::new());
        publisher.register_schemas(&registry).await.unwrap();

        assert!(registry.resolve("arrivals-key").await.unwrap().is_some());
        assert!(registry.resolve("arrivals-value").await.unwrap().is_none());
    }
}
