//! Process-local broker
//!
//! Implements every collaborator trait against in-memory partition logs so the
//! relay can run without external infrastructure. Partitions are append-only
//! vectors; consumer groups keep committed offsets; assignments are computed
//! on poll and handed to the subscription's `AssignmentListener`.
//!
//! Every consumer of a group is assigned all matching partitions. There is no
//! group coordination.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::{
    AdminClient, AssignmentListener, Broker, ConsumerClient, CreateOutcome, FlushReport,
    ProducerClient, TopicCreation,
};
use crate::config::BrokerConnectionConfig;
use crate::error::{Error, Result};
use crate::types::{Message, NewTopic, Offset, OutboundRecord, PartitionAssignment, TopicPattern};

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Bytes>,
    payload: Bytes,
    timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct TopicLog {
    partitions: Vec<Vec<StoredRecord>>,
    replication_factor: i32,
}

impl TopicLog {
    fn new(partitions: i32, replication_factor: i32) -> Self {
        Self {
            partitions: (0..partitions.max(1)).map(|_| Vec::new()).collect(),
            replication_factor,
        }
    }

    fn end_offset(&self, partition: i32) -> i64 {
        self.partitions
            .get(partition as usize)
            .map(|log| log.len() as i64)
            .unwrap_or(0)
    }
}

#[derive(Debug)]
struct BrokerState {
    available: bool,
    topics: BTreeMap<String, TopicLog>,
    committed: HashMap<(String, String, i32), i64>,
    rejections: HashMap<String, String>,
    create_topic_calls: usize,
    metadata_calls: usize,
    admin_latency: Duration,
    auto_commit: bool,
    auto_commit_interval: Duration,
}

impl BrokerState {
    fn ensure_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(Error::TransportError("broker unavailable".to_string()))
        }
    }

    fn append(&mut self, record: &OutboundRecord, round_robin: usize) -> std::result::Result<(i32, i64), String> {
        let log = self
            .topics
            .get_mut(&record.topic)
            .ok_or_else(|| format!("unknown topic '{}'", record.topic))?;

        let partitions = log.partitions.len();
        let partition = match &record.key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % partitions as u64) as usize
            }
            None => round_robin % partitions,
        };

        let entries = &mut log.partitions[partition];
        entries.push(StoredRecord {
            key: record.key.clone(),
            payload: record.payload.clone(),
            timestamp: Utc::now(),
        });
        Ok((partition as i32, entries.len() as i64 - 1))
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    data_ready: Notify,
}

fn lock(shared: &Shared) -> MutexGuard<'_, BrokerState> {
    shared.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory broker
///
/// Cloning yields another handle to the same broker.
///
/// # Example
///
/// ```
/// use topic_relay::broker::InMemoryBroker;
/// use topic_relay::types::NewTopic;
///
/// let broker = InMemoryBroker::new();
/// broker.create_topic(NewTopic::new("stations", 1, 1).unwrap());
/// broker.append("stations", None, "hello").unwrap();
/// assert_eq!(broker.records("stations", 0).len(), 1);
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create an empty, reachable broker with a 5 second auto-commit interval
    pub fn new() -> Self {
        Self::with_config(&BrokerConnectionConfig::default())
    }

    /// Create a broker whose consumers follow the config's auto-commit settings
    pub fn with_config(config: &BrokerConnectionConfig) -> Self {
        let state = BrokerState {
            available: true,
            topics: BTreeMap::new(),
            committed: HashMap::new(),
            rejections: HashMap::new(),
            create_topic_calls: 0,
            metadata_calls: 0,
            admin_latency: Duration::ZERO,
            auto_commit: config.enable_auto_commit,
            auto_commit_interval: Duration::from_millis(config.auto_commit_interval_ms),
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                data_ready: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        lock(&self.shared)
    }

    /// Make every broker call succeed or fail with a transport error
    pub fn set_available(&self, available: bool) {
        self.state().available = available;
        self.shared.data_ready.notify_waiters();
    }

    pub fn is_available(&self) -> bool {
        self.state().available
    }

    /// Delay every admin response, widening race windows in tests
    pub fn set_admin_latency(&self, latency: Duration) {
        self.state().admin_latency = latency;
    }

    /// Reject the next create-topic request for `topic`
    pub fn reject_topic_creation(&self, topic: impl Into<String>, reason: impl Into<String>) {
        self.state().rejections.insert(topic.into(), reason.into());
    }

    /// Number of create-topics requests received
    pub fn create_topic_calls(&self) -> usize {
        self.state().create_topic_calls
    }

    /// Number of metadata lookups received
    pub fn metadata_calls(&self) -> usize {
        self.state().metadata_calls
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.state().topics.keys().cloned().collect()
    }

    pub fn partition_count(&self, topic: &str) -> Option<i32> {
        self.state()
            .topics
            .get(topic)
            .map(|log| log.partitions.len() as i32)
    }

    pub fn replication_factor(&self, topic: &str) -> Option<i32> {
        self.state().topics.get(topic).map(|log| log.replication_factor)
    }

    /// Create a topic directly, bypassing the admin counters
    ///
    /// Returns false if the topic already existed.
    pub fn create_topic(&self, topic: NewTopic) -> bool {
        let created = {
            let mut state = self.state();
            if state.topics.contains_key(&topic.name) {
                false
            } else {
                state.topics.insert(
                    topic.name,
                    TopicLog::new(topic.partitions, topic.replication_factor),
                );
                true
            }
        };
        if created {
            self.shared.data_ready.notify_waiters();
        }
        created
    }

    /// Append a record directly, returning its partition and offset
    pub fn append(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: impl Into<Bytes>,
    ) -> Result<(i32, i64)> {
        let mut record = OutboundRecord::new(topic, payload);
        if let Some(key) = key {
            record = record.with_key(Bytes::copy_from_slice(key.as_bytes()));
        }

        let position = {
            let mut state = self.state();
            state.ensure_available()?;
            state
                .append(&record, 0)
                .map_err(Error::DeliveryError)?
        };
        self.shared.data_ready.notify_waiters();
        Ok(position)
    }

    /// Append a record to a specific partition, returning its offset
    pub fn append_to(&self, topic: &str, partition: i32, payload: impl Into<Bytes>) -> Result<i64> {
        let offset = {
            let mut state = self.state();
            state.ensure_available()?;
            let log = state
                .topics
                .get_mut(topic)
                .and_then(|log| log.partitions.get_mut(partition as usize))
                .ok_or_else(|| {
                    Error::DeliveryError(format!("unknown partition {}[{}]", topic, partition))
                })?;
            log.push(StoredRecord {
                key: None,
                payload: payload.into(),
                timestamp: Utc::now(),
            });
            log.len() as i64 - 1
        };
        self.shared.data_ready.notify_waiters();
        Ok(offset)
    }

    /// Messages stored in one partition, in offset order
    pub fn records(&self, topic: &str, partition: i32) -> Vec<Message> {
        let state = self.state();
        state
            .topics
            .get(topic)
            .and_then(|log| log.partitions.get(partition as usize))
            .map(|entries| {
                entries
                    .iter()
                    .enumerate()
                    .map(|(offset, record)| to_message(topic, partition, offset as i64, record))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Offset committed by a consumer group, if any
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state()
            .committed
            .get(&(group_id.to_string(), topic.to_string(), partition))
            .copied()
    }

    async fn admin_delay(&self) {
        let latency = self.state().admin_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

fn to_message(topic: &str, partition: i32, offset: i64, record: &StoredRecord) -> Message {
    let mut message = Message::new(topic, partition, offset, record.payload.clone())
        .with_timestamp(record.timestamp);
    message.key = record.key.clone();
    message
}

#[async_trait]
impl AdminClient for InMemoryBroker {
    async fn topic_exists(&self, topic: &str) -> Result<bool> {
        self.admin_delay().await;

        let mut state = self.state();
        state.metadata_calls += 1;
        state.ensure_available()?;
        Ok(state.topics.contains_key(topic))
    }

    async fn create_topics(&self, topics: &[NewTopic]) -> Result<Vec<TopicCreation>> {
        self.admin_delay().await;

        let results = {
            let mut state = self.state();
            state.create_topic_calls += 1;
            state.ensure_available()?;

            let mut results = Vec::with_capacity(topics.len());
            for topic in topics {
                let outcome = if let Some(reason) = state.rejections.remove(&topic.name) {
                    CreateOutcome::Failed(reason)
                } else if state.topics.contains_key(&topic.name) {
                    CreateOutcome::AlreadyExists
                } else {
                    state.topics.insert(
                        topic.name.clone(),
                        TopicLog::new(topic.partitions, topic.replication_factor),
                    );
                    CreateOutcome::Created
                };
                results.push(TopicCreation {
                    topic: topic.name.clone(),
                    outcome,
                });
            }
            results
        };

        self.shared.data_ready.notify_waiters();
        Ok(results)
    }
}

impl Broker for InMemoryBroker {
    fn admin(&self) -> Result<Arc<dyn AdminClient>> {
        Ok(Arc::new(self.clone()))
    }

    fn producer(&self) -> Result<Box<dyn ProducerClient>> {
        Ok(Box::new(MemoryProducer::new(self.clone())))
    }

    fn consumer(&self, group_id: &str) -> Result<Box<dyn ConsumerClient>> {
        Ok(Box::new(MemoryConsumer::new(self.clone(), group_id)))
    }
}

/// Consumer handle on an `InMemoryBroker`
pub struct MemoryConsumer {
    broker: InMemoryBroker,
    group_id: String,
    member_id: String,
    subscription: Option<(TopicPattern, Arc<dyn AssignmentListener>)>,
    assigned: Vec<(String, i32)>,
    positions: HashMap<(String, i32), i64>,
    cursor: usize,
    auto_commit: bool,
    auto_commit_interval: Duration,
    last_commit: Instant,
    closed: bool,
}

impl MemoryConsumer {
    pub fn new(broker: InMemoryBroker, group_id: impl Into<String>) -> Self {
        let (auto_commit, auto_commit_interval) = {
            let state = broker.state();
            (state.auto_commit, state.auto_commit_interval)
        };

        Self {
            broker,
            group_id: group_id.into(),
            member_id: format!("consumer-{}", Uuid::new_v4()),
            subscription: None,
            assigned: Vec::new(),
            positions: HashMap::new(),
            cursor: 0,
            auto_commit,
            auto_commit_interval,
            last_commit: Instant::now(),
            closed: false,
        }
    }

    /// Override the broker's auto-commit settings (builder pattern)
    pub fn with_auto_commit(mut self, enabled: bool, interval: Duration) -> Self {
        self.auto_commit = enabled;
        self.auto_commit_interval = interval;
        self
    }

    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    /// Current fetch position per assigned partition
    pub fn position(&self, topic: &str, partition: i32) -> Option<i64> {
        self.positions.get(&(topic.to_string(), partition)).copied()
    }

    /// Commit current positions for the group
    pub fn commit(&mut self) -> Result<()> {
        let mut state = self.broker.state();
        state.ensure_available()?;
        for ((topic, partition), position) in &self.positions {
            state
                .committed
                .insert((self.group_id.clone(), topic.clone(), *partition), *position);
        }
        self.last_commit = Instant::now();
        Ok(())
    }

    fn maybe_auto_commit(&mut self) {
        if self.auto_commit && self.last_commit.elapsed() >= self.auto_commit_interval {
            if let Err(e) = self.commit() {
                debug!(group = %self.group_id, error = %e, "auto-commit skipped");
            }
        }
    }

    /// Hand newly matching partitions to the listener and resolve their offsets
    fn refresh_assignment(&mut self) -> Result<()> {
        let Some((pattern, listener)) = self.subscription.clone() else {
            return Ok(());
        };

        let mut newly: Vec<PartitionAssignment> = {
            let state = self.broker.state();
            state.ensure_available()?;
            state
                .topics
                .iter()
                .filter(|(name, _)| pattern.matches(name))
                .flat_map(|(name, log)| {
                    (0..log.partitions.len() as i32).map(move |p| (name.clone(), p))
                })
                .filter(|tp| !self.positions.contains_key(tp))
                .map(|(topic, partition)| PartitionAssignment::new(topic, partition))
                .collect()
        };

        if newly.is_empty() {
            return Ok(());
        }

        // Listener runs without the broker lock held
        listener.on_assign(&mut newly);

        let state = self.broker.state();
        for assignment in newly {
            let end = state
                .topics
                .get(&assignment.topic)
                .map(|log| log.end_offset(assignment.partition))
                .unwrap_or(0);
            let committed = state.committed.get(&(
                self.group_id.clone(),
                assignment.topic.clone(),
                assignment.partition,
            ));
            let position = match assignment.offset {
                Offset::Beginning => 0,
                Offset::End => end,
                Offset::Stored => committed.copied().unwrap_or(end),
                Offset::At(offset) => offset.clamp(0, end),
            };

            debug!(
                topic = %assignment.topic,
                partition = assignment.partition,
                position,
                "partition assigned"
            );
            let key = (assignment.topic, assignment.partition);
            self.assigned.push(key.clone());
            self.positions.insert(key, position);
        }

        Ok(())
    }

    fn try_fetch(&mut self) -> Result<Option<Message>> {
        self.refresh_assignment()?;

        let state = self.broker.state();
        state.ensure_available()?;

        let count = self.assigned.len();
        for step in 0..count {
            let index = (self.cursor + step) % count;
            let (topic, partition) = &self.assigned[index];
            let key = (topic.clone(), *partition);
            let position = self.positions.get(&key).copied().unwrap_or(0);

            let record = state
                .topics
                .get(topic)
                .and_then(|log| log.partitions.get(*partition as usize))
                .and_then(|entries| entries.get(position as usize));

            if let Some(record) = record {
                let message = to_message(topic, *partition, position, record);
                self.positions.insert(key, position + 1);
                self.cursor = (index + 1) % count;
                return Ok(Some(message));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl ConsumerClient for MemoryConsumer {
    async fn subscribe(
        &mut self,
        pattern: &TopicPattern,
        listener: Arc<dyn AssignmentListener>,
    ) -> Result<()> {
        if self.closed {
            return Err(Error::ClosedError(self.member_id.clone()));
        }
        self.broker.state().ensure_available()?;

        info!(
            group = %self.group_id,
            member = %self.member_id,
            pattern = %pattern,
            "subscribed"
        );
        self.subscription = Some((pattern.clone(), listener));
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<Message>> {
        if self.closed {
            return Err(Error::ClosedError(self.member_id.clone()));
        }

        let shared = Arc::clone(&self.broker.shared);
        let deadline = Instant::now() + timeout;

        loop {
            let notified = shared.data_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let fetched = self.try_fetch()?;
            self.maybe_auto_commit();
            if fetched.is_some() {
                return Ok(fetched);
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.auto_commit {
            if let Err(e) = self.commit() {
                warn!(group = %self.group_id, error = %e, "final commit failed");
            }
        }
        info!(group = %self.group_id, member = %self.member_id, "consumer closed");
        Ok(())
    }
}

/// Producer handle on an `InMemoryBroker`
///
/// Records are buffered and delivered once `batch_size` accumulate or on flush.
pub struct MemoryProducer {
    broker: InMemoryBroker,
    buffer: Mutex<VecDeque<OutboundRecord>>,
    failures: Mutex<Vec<String>>,
    delivered: AtomicUsize,
    next_partition: AtomicUsize,
    batch_size: usize,
}

impl MemoryProducer {
    pub fn new(broker: InMemoryBroker) -> Self {
        Self {
            broker,
            buffer: Mutex::new(VecDeque::new()),
            failures: Mutex::new(Vec::new()),
            delivered: AtomicUsize::new(0),
            next_partition: AtomicUsize::new(0),
            batch_size: 100,
        }
    }

    /// Deliver automatically once this many records are buffered (builder pattern)
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn buffer(&self) -> MutexGuard<'_, VecDeque<OutboundRecord>> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn failures(&self) -> MutexGuard<'_, Vec<String>> {
        self.failures.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move buffered records into the broker; returns how many were acknowledged
    ///
    /// Leaves the buffer untouched while the broker is unreachable.
    fn deliver_buffered(&self) -> usize {
        let mut buffer = self.buffer();
        if buffer.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        {
            let mut state = self.broker.state();
            if !state.available {
                return 0;
            }

            while let Some(record) = buffer.pop_front() {
                let round_robin = self.next_partition.fetch_add(1, Ordering::Relaxed);
                match state.append(&record, round_robin) {
                    Ok(_) => delivered += 1,
                    Err(reason) => {
                        warn!(topic = %record.topic, %reason, "delivery failed");
                        self.failures().push(reason);
                    }
                }
            }
        }

        self.delivered.fetch_add(delivered, Ordering::Relaxed);
        if delivered > 0 {
            self.broker.shared.data_ready.notify_waiters();
        }
        delivered
    }
}

#[async_trait]
impl ProducerClient for MemoryProducer {
    fn send(&self, record: OutboundRecord) -> Result<()> {
        let buffered = {
            let mut buffer = self.buffer();
            buffer.push_back(record);
            buffer.len()
        };

        if buffered >= self.batch_size {
            self.deliver_buffered();
        }
        Ok(())
    }

    fn in_flight(&self) -> usize {
        self.buffer().len()
    }

    async fn flush(&self, timeout: Duration) -> Result<FlushReport> {
        let deadline = Instant::now() + timeout;
        let mut delivered = 0;

        loop {
            delivered += self.deliver_buffered();
            if self.in_flight() == 0 || Instant::now() >= deadline {
                break;
            }
            let wait = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(wait.min(Duration::from_millis(10))).await;
        }

        let errors: Vec<String> = self.failures().drain(..).collect();
        Ok(FlushReport {
            delivered,
            failed: errors.len(),
            remaining: self.in_flight(),
            errors,
        })
    }
}
