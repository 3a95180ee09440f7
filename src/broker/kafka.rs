//! Kafka backend on top of librdkafka
//!
//! Enabled with the `kafka` cargo feature. Topic patterns are passed through
//! unchanged, so librdkafka's own `^regex` subscription handling applies.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use futures::FutureExt;
use rdkafka::admin::{AdminClient as RdAdminClient, AdminOptions, NewTopic as RdNewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message as RdMessage};
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientContext, Offset as RdOffset, TopicPartitionList};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::broker::{
    AdminClient, AssignmentListener, Broker, ConsumerClient, CreateOutcome, FlushReport,
    ProducerClient, TopicCreation,
};
use crate::config::BrokerConnectionConfig;
use crate::error::{Error, Result};
use crate::types::{Message, NewTopic, Offset, OutboundRecord, PartitionAssignment, TopicPattern};

/// Broker factory for a Kafka cluster
#[derive(Debug, Clone)]
pub struct KafkaBroker {
    config: BrokerConnectionConfig,
}

impl KafkaBroker {
    pub fn new(config: BrokerConnectionConfig) -> Self {
        Self { config }
    }

    fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", self.config.bootstrap_servers_string());
        client_config
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms)
    }
}

impl Broker for KafkaBroker {
    fn admin(&self) -> Result<Arc<dyn AdminClient>> {
        let admin: RdAdminClient<DefaultClientContext> = self.client_config().create()?;
        Ok(Arc::new(KafkaAdmin {
            admin: Arc::new(admin),
            timeout: self.timeout(),
        }))
    }

    fn producer(&self) -> Result<Box<dyn ProducerClient>> {
        let producer: FutureProducer = self.client_config().create()?;
        Ok(Box::new(KafkaProducer {
            producer,
            pending: Mutex::new(Vec::new()),
        }))
    }

    fn consumer(&self, group_id: &str) -> Result<Box<dyn ConsumerClient>> {
        let consumer: StreamConsumer<AssignContext> = self
            .client_config()
            .set("group.id", group_id)
            .set("enable.auto.commit", self.config.enable_auto_commit.to_string())
            .set(
                "auto.commit.interval.ms",
                self.config.auto_commit_interval_ms.to_string(),
            )
            .create_with_context(AssignContext::default())?;

        Ok(Box::new(KafkaConsumer {
            consumer: Some(consumer),
            group_id: group_id.to_string(),
            auto_commit: self.config.enable_auto_commit,
        }))
    }
}

/// Admin client: metadata lookups and topic creation
pub struct KafkaAdmin {
    admin: Arc<RdAdminClient<DefaultClientContext>>,
    timeout: Duration,
}

#[async_trait]
impl AdminClient for KafkaAdmin {
    async fn topic_exists(&self, topic: &str) -> Result<bool> {
        let admin = Arc::clone(&self.admin);
        let topic = topic.to_string();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || -> Result<bool> {
            let metadata = admin.inner().fetch_metadata(None, timeout)?;
            Ok(metadata.topics().iter().any(|t| t.name() == topic))
        })
        .await
        .map_err(|e| Error::TransportError(e.to_string()))?
    }

    async fn create_topics(&self, topics: &[NewTopic]) -> Result<Vec<TopicCreation>> {
        let requests: Vec<RdNewTopic> = topics
            .iter()
            .map(|t| {
                RdNewTopic::new(
                    &t.name,
                    t.partitions,
                    TopicReplication::Fixed(t.replication_factor),
                )
            })
            .collect();
        let options = AdminOptions::new().operation_timeout(Some(self.timeout));

        let results = self.admin.create_topics(&requests, &options).await?;
        Ok(results
            .into_iter()
            .map(|result| match result {
                Ok(topic) => TopicCreation {
                    topic,
                    outcome: CreateOutcome::Created,
                },
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => TopicCreation {
                    topic,
                    outcome: CreateOutcome::AlreadyExists,
                },
                Err((topic, code)) => TopicCreation {
                    topic,
                    outcome: CreateOutcome::Failed(code.to_string()),
                },
            })
            .collect())
    }
}

/// Consumer context routing assignment events to the subscription's listener
#[derive(Default)]
pub struct AssignContext {
    listener: Mutex<Option<Arc<dyn AssignmentListener>>>,
}

impl AssignContext {
    fn set_listener(&self, listener: Arc<dyn AssignmentListener>) {
        *self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(listener);
    }

    fn listener(&self) -> Option<Arc<dyn AssignmentListener>> {
        self.listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ClientContext for AssignContext {}

impl ConsumerContext for AssignContext {
    fn post_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        let Rebalance::Assign(assigned) = rebalance else {
            return;
        };
        let Some(listener) = self.listener() else {
            return;
        };

        let original: Vec<PartitionAssignment> = assigned
            .elements()
            .iter()
            .map(|e| PartitionAssignment {
                topic: e.topic().to_string(),
                partition: e.partition(),
                offset: from_rd_offset(e.offset()),
            })
            .collect();
        let mut partitions = original.clone();
        listener.on_assign(&mut partitions);

        if partitions == original {
            return;
        }

        let mut rewritten = TopicPartitionList::new();
        for p in &partitions {
            if let Err(e) = rewritten.add_partition_offset(&p.topic, p.partition, to_rd_offset(p.offset)) {
                warn!(topic = %p.topic, partition = p.partition, error = %e, "cannot set start offset");
            }
        }
        if let Err(e) = base_consumer.assign(&rewritten) {
            error!(error = %e, "re-assignment with rewritten offsets failed");
        }
    }
}

fn from_rd_offset(offset: RdOffset) -> Offset {
    match offset {
        RdOffset::Beginning => Offset::Beginning,
        RdOffset::End => Offset::End,
        RdOffset::Offset(n) => Offset::At(n),
        _ => Offset::Stored,
    }
}

fn to_rd_offset(offset: Offset) -> RdOffset {
    match offset {
        Offset::Beginning => RdOffset::Beginning,
        Offset::End => RdOffset::End,
        Offset::Stored => RdOffset::Stored,
        Offset::At(n) => RdOffset::Offset(n),
    }
}

fn to_message(m: &BorrowedMessage<'_>) -> Message {
    let mut message = Message::new(
        m.topic(),
        m.partition(),
        m.offset(),
        Bytes::copy_from_slice(m.payload().unwrap_or_default()),
    );
    message.key = m.key().map(Bytes::copy_from_slice);
    message.timestamp = m
        .timestamp()
        .to_millis()
        .and_then(DateTime::from_timestamp_millis);
    message
}

/// Consumer handle; released on close
pub struct KafkaConsumer {
    consumer: Option<StreamConsumer<AssignContext>>,
    group_id: String,
    auto_commit: bool,
}

impl KafkaConsumer {
    fn consumer(&self) -> Result<&StreamConsumer<AssignContext>> {
        self.consumer
            .as_ref()
            .ok_or_else(|| Error::ClosedError(self.group_id.clone()))
    }
}

#[async_trait]
impl ConsumerClient for KafkaConsumer {
    async fn subscribe(
        &mut self,
        pattern: &TopicPattern,
        listener: Arc<dyn AssignmentListener>,
    ) -> Result<()> {
        let consumer = self.consumer()?;
        consumer.context().set_listener(listener);
        consumer.subscribe(&[pattern.as_str()])?;
        info!(group = %self.group_id, pattern = %pattern, "subscribed");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>> {
        let consumer = self.consumer()?;
        match tokio::time::timeout(timeout, consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(message)) => Ok(Some(to_message(&message))),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let Some(consumer) = self.consumer.take() else {
            return Ok(());
        };

        if self.auto_commit {
            if let Err(e) = consumer.commit_consumer_state(CommitMode::Sync) {
                warn!(group = %self.group_id, error = %e, "final commit failed");
            }
        }
        consumer.unsubscribe();
        info!(group = %self.group_id, "consumer closed");
        Ok(())
    }
}

/// Producer with tracked delivery acknowledgements
pub struct KafkaProducer {
    producer: FutureProducer,
    pending: Mutex<Vec<DeliveryFuture>>,
}

#[async_trait]
impl ProducerClient for KafkaProducer {
    fn send(&self, record: OutboundRecord) -> Result<()> {
        let mut future_record = FutureRecord::<[u8], [u8]>::to(&record.topic).payload(&record.payload[..]);
        if let Some(key) = &record.key {
            future_record = future_record.key(&key[..]);
        }

        match self.producer.send_result(future_record) {
            Ok(delivery) => {
                self.pending
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(delivery);
                Ok(())
            }
            Err((e, _)) => Err(Error::DeliveryError(e.to_string())),
        }
    }

    fn in_flight(&self) -> usize {
        self.producer.in_flight_count().max(0) as usize
    }

    async fn flush(&self, timeout: Duration) -> Result<FlushReport> {
        let producer = self.producer.clone();
        let flushed = tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| Error::TransportError(e.to_string()))?;
        if let Err(e) = flushed {
            warn!(error = %e, "flush did not complete");
        }

        let pending = std::mem::take(
            &mut *self
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );

        let mut report = FlushReport::default();
        for delivery in pending {
            match delivery.now_or_never() {
                Some(Ok(Ok(_))) => report.delivered += 1,
                Some(Ok(Err((e, _)))) => {
                    report.failed += 1;
                    report.errors.push(e.to_string());
                }
                Some(Err(_)) => {
                    report.failed += 1;
                    report.errors.push("delivery cancelled".to_string());
                }
                None => report.remaining += 1,
            }
        }
        Ok(report)
    }
}
