//! Broker collaborator interfaces
//!
//! The relay never speaks a wire protocol itself. Everything that touches the
//! broker goes through the traits in this module:
//!
//! - `AdminClient`: topic metadata and topic creation
//! - `ConsumerClient`: subscribe, poll, close
//! - `ProducerClient`: buffered send and flush
//! - `Broker`: factory handing out the three client kinds
//!
//! Two implementations ship with the crate: `memory::InMemoryBroker`, a
//! process-local broker used by tests and the demo binary, and
//! `kafka::KafkaBroker` (cargo feature `kafka`) backed by librdkafka.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::types::{Message, NewTopic, OutboundRecord, PartitionAssignment, TopicPattern};

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

pub use memory::InMemoryBroker;

/// Outcome of one topic in a create-topics request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
    Failed(String),
}

/// Per-topic result of a create-topics request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicCreation {
    pub topic: String,
    pub outcome: CreateOutcome,
}

/// Topic metadata and creation
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Whether the broker's metadata lists the topic
    async fn topic_exists(&self, topic: &str) -> Result<bool>;

    /// Create topics, waiting for the broker to acknowledge each one
    ///
    /// A transport failure fails the whole call; per-topic rejections are
    /// reported in the returned list.
    async fn create_topics(&self, topics: &[NewTopic]) -> Result<Vec<TopicCreation>>;
}

/// Callback fired when partitions are (re)assigned to a consumer
///
/// Invoked synchronously by the consumer client before it fetches from the
/// new partitions. Implementations may rewrite each partition's starting
/// offset; the client applies whatever offsets the slice holds on return.
pub trait AssignmentListener: Send + Sync {
    fn on_assign(&self, partitions: &mut [PartitionAssignment]);
}

/// Consuming side of a broker connection
///
/// Owned by exactly one consumption loop; never shared across tasks.
#[async_trait]
pub trait ConsumerClient: Send {
    /// Subscribe to every topic matching the pattern
    async fn subscribe(
        &mut self,
        pattern: &TopicPattern,
        listener: Arc<dyn AssignmentListener>,
    ) -> Result<()>;

    /// Wait up to `timeout` for a single message
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>>;

    /// Release the connection; later polls fail
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
impl<C: ConsumerClient + ?Sized> ConsumerClient for Box<C> {
    async fn subscribe(
        &mut self,
        pattern: &TopicPattern,
        listener: Arc<dyn AssignmentListener>,
    ) -> Result<()> {
        (**self).subscribe(pattern, listener).await
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>> {
        (**self).poll(timeout).await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

/// Result of draining a producer's buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Records acknowledged by the broker during this flush
    pub delivered: usize,
    /// Records the broker rejected since the last flush
    pub failed: usize,
    /// Records still buffered when the flush gave up
    pub remaining: usize,
    /// Rejection reasons, in delivery order
    pub errors: Vec<String>,
}

impl FlushReport {
    /// Nothing lost: every buffered record was acknowledged
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.remaining == 0
    }
}

/// Producing side of a broker connection
#[async_trait]
pub trait ProducerClient: Send + Sync {
    /// Buffer a record for asynchronous delivery
    fn send(&self, record: OutboundRecord) -> Result<()>;

    /// Records buffered but not yet acknowledged
    fn in_flight(&self) -> usize;

    /// Block until the buffer is drained or `timeout` elapses
    async fn flush(&self, timeout: Duration) -> Result<FlushReport>;
}

/// Factory for the three broker client kinds
pub trait Broker: Send + Sync {
    fn admin(&self) -> Result<Arc<dyn AdminClient>>;

    fn producer(&self) -> Result<Box<dyn ProducerClient>>;

    fn consumer(&self, group_id: &str) -> Result<Box<dyn ConsumerClient>>;
}
