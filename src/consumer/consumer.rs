use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, ConsumerClient};
use crate::config::{BrokerConnectionConfig, SerializationMode};
use crate::consumer::subscription::{OffsetPolicy, SubscriptionManager};
use crate::error::{Error, HandlerResult, Result};
use crate::schema::{HttpSchemaRegistry, PayloadCodec};
use crate::types::{Message, TopicPattern};

/// Type alias for message handler functions
///
/// Handlers are async functions that take a message and return a `HandlerResult`.
/// A failing or panicking handler never stops the loop.
pub type MessageHandler =
    Arc<dyn Fn(Message) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync>;

/// Wrap an async closure as a `MessageHandler`
///
/// # Example
///
/// ```
/// use topic_relay::consumer::handler;
///
/// let h = handler(|msg| async move {
///     println!("{} -> {:?}", msg.coordinates(), msg.payload_str());
///     Ok::<(), topic_relay::HandlerError>(())
/// });
/// ```
pub fn handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// Configuration for a consumption loop
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Topic name or `^regex` pattern to subscribe to
    pub topic_pattern: String,

    /// Consumer group identifier
    pub group_id: String,

    /// Starting offset for newly assigned partitions
    pub offset_policy: OffsetPolicy,

    /// Idle time after a drain round that yielded nothing (milliseconds)
    pub sleep_interval_ms: u64,

    /// Upper bound for a single poll (milliseconds)
    pub poll_timeout_ms: u64,

    /// Payload decoding before dispatch
    pub serialization: SerializationMode,

    /// Registry that inbound values are validated against in `SerializationMode::Schema`
    pub schema_registry_url: Option<String>,
}

impl ConsumerConfig {
    /// Create a configuration with the group id `{pattern}-CONSUMER`
    ///
    /// # Example
    ///
    /// ```
    /// use topic_relay::consumer::{ConsumerConfig, OffsetPolicy};
    ///
    /// let config = ConsumerConfig::new("^org.chicago.cta.station.arrivals.")
    ///     .with_offset_policy(OffsetPolicy::Earliest)
    ///     .with_sleep_interval_ms(500);
    /// assert_eq!(config.group_id, "^org.chicago.cta.station.arrivals.-CONSUMER");
    /// ```
    pub fn new(topic_pattern: impl Into<String>) -> Self {
        let topic_pattern = topic_pattern.into();
        Self {
            group_id: format!("{}-CONSUMER", topic_pattern),
            topic_pattern,
            offset_policy: OffsetPolicy::default(),
            sleep_interval_ms: 1000,
            poll_timeout_ms: 1000,
            serialization: SerializationMode::default(),
            schema_registry_url: None,
        }
    }

    /// Take group id, serialization mode and schema registry from a connection config
    pub fn from_connection(topic_pattern: impl Into<String>, connection: &BrokerConnectionConfig) -> Self {
        let mut config = Self::new(topic_pattern).with_serialization(connection.serialization);
        config.schema_registry_url = connection.schema_registry_url.clone();
        if let Some(group_id) = &connection.group_id {
            config.group_id = group_id.clone();
        }
        config
    }

    /// Set the consumer group (builder pattern)
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    /// Set the offset policy (builder pattern)
    pub fn with_offset_policy(mut self, policy: OffsetPolicy) -> Self {
        self.offset_policy = policy;
        self
    }

    /// Set the idle sleep interval in milliseconds (builder pattern)
    pub fn with_sleep_interval_ms(mut self, interval_ms: u64) -> Self {
        self.sleep_interval_ms = interval_ms;
        self
    }

    /// Set the poll timeout in milliseconds (builder pattern)
    pub fn with_poll_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.poll_timeout_ms = timeout_ms;
        self
    }

    /// Set the serialization mode (builder pattern)
    pub fn with_serialization(mut self, mode: SerializationMode) -> Self {
        self.serialization = mode;
        self
    }

    /// Set the schema registry endpoint (builder pattern)
    pub fn with_schema_registry(mut self, url: impl Into<String>) -> Self {
        self.schema_registry_url = Some(url.into());
        self
    }

    /// Codec matching the serialization mode
    ///
    /// # Errors
    ///
    /// `Error::ValidationError` when schema serialization is asked for without
    /// a registry to validate against.
    pub fn payload_codec(&self) -> Result<PayloadCodec> {
        let codec = PayloadCodec::new(self.serialization);
        if self.serialization != SerializationMode::Schema {
            return Ok(codec);
        }

        let url = self.schema_registry_url.as_deref().ok_or_else(|| {
            Error::ValidationError(format!(
                "schema serialization for '{}' needs a schema registry url",
                self.topic_pattern
            ))
        })?;
        Ok(codec.with_registry(Arc::new(HttpSchemaRegistry::new(url))))
    }

    pub fn sleep_interval(&self) -> Duration {
        Duration::from_millis(self.sleep_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Where the loop is in its poll/drain/sleep cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Subscribed, nothing polled yet
    Idle,
    /// Polling and dispatching until a poll comes back empty
    Draining,
    /// Waiting out the idle interval
    Sleeping,
    /// Client released; terminal
    Closed,
}

/// What happened to one polled message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    Failed,
    Skipped,
}

/// Counts for one drain round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Handler returned `Ok`
    pub handled: usize,
    /// Handler returned an error or panicked
    pub failed: usize,
    /// Payload could not be decoded; handler not called
    pub skipped: usize,
}

impl DrainReport {
    /// Messages that count as processed for loop progress
    pub fn processed(&self) -> usize {
        self.handled + self.failed + self.skipped
    }

    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Handled => self.handled += 1,
            DispatchOutcome::Failed => self.failed += 1,
            DispatchOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Requests that a consumption loop close, from any task
#[derive(Debug, Clone)]
pub struct CloseHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    /// Ask the loop to close; it notices between polls or during its idle sleep
    pub fn close(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_close_requested(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Cooperative poll/drain/sleep loop over one subscription
///
/// Implements the consumer pattern:
/// 1. Poll for at most one message, bounded by the poll timeout
/// 2. Decode it when structured serialization is on
/// 3. Dispatch it to the handler; failures are logged and counted, never retried
/// 4. Keep polling while messages arrive, then sleep for the idle interval
/// 5. Repeat until closed
///
/// Offsets are committed by the broker client's auto-commit schedule, whatever
/// the handler returned.
///
/// # Example
///
/// ```
/// use topic_relay::broker::{InMemoryBroker};
/// use topic_relay::consumer::{handler, ConsumerConfig, ConsumptionLoop, OffsetPolicy};
/// use topic_relay::types::NewTopic;
///
/// # #[tokio::main]
/// # async fn main() -> topic_relay::Result<()> {
/// let broker = InMemoryBroker::new();
/// broker.create_topic(NewTopic::new("turnstile", 1, 1)?);
/// broker.append("turnstile", None, r#"{"station_id": 40380}"#)?;
///
/// let config = ConsumerConfig::new("turnstile")
///     .with_offset_policy(OffsetPolicy::Earliest)
///     .with_poll_timeout_ms(10);
/// let mut consumer = ConsumptionLoop::connect(&broker, config, handler(|_msg| async { Ok::<(), topic_relay::HandlerError>(()) })).await?;
///
/// let report = consumer.drain_round().await?;
/// assert_eq!(report.handled, 1);
/// consumer.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConsumptionLoop<C: ConsumerClient = Box<dyn ConsumerClient>> {
    client: C,
    config: ConsumerConfig,
    handler: MessageHandler,
    codec: PayloadCodec,
    subscription: Arc<SubscriptionManager>,
    state: LoopState,
    close_sender: Arc<watch::Sender<bool>>,
    close_receiver: watch::Receiver<bool>,
    processed: u64,
}

impl ConsumptionLoop<Box<dyn ConsumerClient>> {
    /// Open a consumer for `config.group_id` on the broker and subscribe
    pub async fn connect(
        broker: &dyn Broker,
        config: ConsumerConfig,
        handler: MessageHandler,
    ) -> Result<Self> {
        let client = broker.consumer(&config.group_id)?;
        Self::new(client, config, handler).await
    }
}

impl<C: ConsumerClient> ConsumptionLoop<C> {
    /// Subscribe `client` to the configured pattern
    ///
    /// The subscription carries a `SubscriptionManager` so the offset policy
    /// is applied on every partition assignment.
    ///
    /// # Errors
    ///
    /// `Error::ValidationError` for a malformed pattern, or for schema
    /// serialization without a schema registry url. Nothing is subscribed then.
    pub async fn new(mut client: C, config: ConsumerConfig, handler: MessageHandler) -> Result<Self> {
        let pattern = TopicPattern::parse(&config.topic_pattern)?;
        let codec = config.payload_codec()?;
        let subscription = Arc::new(SubscriptionManager::new(
            config.topic_pattern.clone(),
            config.offset_policy,
        ));

        client.subscribe(&pattern, subscription.clone()).await?;
        info!(
            pattern = %pattern,
            group = %config.group_id,
            policy = ?config.offset_policy,
            "consumer subscribed"
        );

        let (close_sender, close_receiver) = watch::channel(false);

        Ok(Self {
            client,
            codec,
            config,
            handler,
            subscription,
            state: LoopState::Idle,
            close_sender: Arc::new(close_sender),
            close_receiver,
            processed: 0,
        })
    }

    /// Replace the payload codec, e.g. to validate against another registry (builder pattern)
    pub fn with_codec(mut self, codec: PayloadCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Messages processed over the loop's lifetime
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn subscription(&self) -> &Arc<SubscriptionManager> {
        &self.subscription
    }

    /// Handle for requesting close from another task
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            sender: Arc::clone(&self.close_sender),
        }
    }

    fn close_requested(&self) -> bool {
        *self.close_receiver.borrow()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == LoopState::Closed {
            return Err(Error::ClosedError(self.config.topic_pattern.clone()));
        }
        Ok(())
    }

    /// Poll and dispatch until a poll comes back empty
    ///
    /// A poll failure closes the loop and is returned.
    pub async fn drain_round(&mut self) -> Result<DrainReport> {
        self.ensure_open()?;
        self.state = LoopState::Draining;

        let mut report = DrainReport::default();
        while !self.close_requested() {
            match self.poll_once().await? {
                Some(outcome) => report.record(outcome),
                None => break,
            }
        }

        if report.processed() > 0 {
            debug!(
                pattern = %self.config.topic_pattern,
                handled = report.handled,
                failed = report.failed,
                skipped = report.skipped,
                "drain round finished"
            );
        }
        Ok(report)
    }

    /// Poll once and dispatch what arrived
    ///
    /// Returns `None` when the poll timed out without a message.
    pub async fn poll_once(&mut self) -> Result<Option<DispatchOutcome>> {
        self.ensure_open()?;

        let polled = self.client.poll(self.config.poll_timeout()).await;
        let message = match polled {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(None),
            Err(e) => {
                error!(
                    pattern = %self.config.topic_pattern,
                    error = %e,
                    "poll failed, stopping consumer"
                );
                self.release().await;
                return Err(e);
            }
        };

        let outcome = self.dispatch(message).await;
        self.processed += 1;
        Ok(Some(outcome))
    }

    async fn dispatch(&self, mut message: Message) -> DispatchOutcome {
        match self.codec.decode(&message).await {
            Ok(value) => message.value = value,
            Err(e) => {
                warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "skipping undecodable message"
                );
                return DispatchOutcome::Skipped;
            }
        }

        let topic = message.topic.clone();
        let partition = message.partition;
        let offset = message.offset;

        let result = AssertUnwindSafe((self.handler)(message)).catch_unwind().await;
        match result {
            Ok(Ok(())) => DispatchOutcome::Handled,
            Ok(Err(e)) => {
                error!(%topic, partition, offset, error = %e, "message handler failed");
                DispatchOutcome::Failed
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(%topic, partition, offset, %reason, "message handler panicked");
                DispatchOutcome::Failed
            }
        }
    }

    /// Wait out the idle interval, waking early on a close request
    async fn sleep(&mut self) {
        self.state = LoopState::Sleeping;

        let mut receiver = self.close_receiver.clone();
        let close_requested = async move {
            loop {
                let closed = *receiver.borrow_and_update();
                if closed || receiver.changed().await.is_err() {
                    break;
                }
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(self.config.sleep_interval()) => {}
            _ = close_requested => {}
        }
    }

    /// One full cycle: drain, then sleep
    pub async fn run_once(&mut self) -> Result<DrainReport> {
        let report = self.drain_round().await?;
        if self.close_requested() {
            self.close().await?;
        } else {
            self.sleep().await;
        }
        Ok(report)
    }

    /// Drain and sleep until a close is requested or a poll fails
    pub async fn run(&mut self) -> Result<()> {
        while self.state != LoopState::Closed {
            if self.close_requested() {
                return self.close().await;
            }
            self.run_once().await?;
        }
        Ok(())
    }

    /// Close the loop and release the broker client
    ///
    /// Idempotent. An in-flight handler always completes first since the loop
    /// is single-threaded.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == LoopState::Closed {
            return Ok(());
        }
        self.close_sender.send_replace(true);
        self.state = LoopState::Closed;

        self.client.close().await?;
        info!(
            pattern = %self.config.topic_pattern,
            processed = self.processed,
            "consumer closed"
        );
        Ok(())
    }

    async fn release(&mut self) {
        self.close_sender.send_replace(true);
        self.state = LoopState::Closed;
        if let Err(e) = self.client.close().await {
            warn!(pattern = %self.config.topic_pattern, error = %e, "consumer close failed");
        }
    }
}
