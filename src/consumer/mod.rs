/// Consumer module: the consumption loop and its subscription
///
/// This module provides:
/// - `ConsumptionLoop`: poll/drain/sleep state machine dispatching to one handler
/// - `ConsumerConfig`: configuration for a loop
/// - `SubscriptionManager`: applies the `OffsetPolicy` on partition assignment
/// - `CloseHandle`: requests close from another task
///
/// # States
///
/// ```text
/// Idle -> Draining -> Sleeping -> Draining -> ... -> Closed
/// ```
///
/// A drain round keeps polling while messages arrive. The first empty poll
/// ends it and the loop sleeps for the configured interval. Handler failures
/// are logged and counted as processed; they neither stop the loop nor cause
/// redelivery. A poll failure closes the loop.
///
/// # Example
///
/// ```no_run
/// use topic_relay::broker::InMemoryBroker;
/// use topic_relay::consumer::{handler, ConsumerConfig, ConsumptionLoop, OffsetPolicy};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let broker = InMemoryBroker::new();
///
///     let config = ConsumerConfig::new("^org.chicago.cta.station.arrivals.")
///         .with_offset_policy(OffsetPolicy::Earliest);
///
///     let mut consumer = ConsumptionLoop::connect(&broker, config, handler(|msg| async move {
///         println!("arrival at {}", msg.coordinates());
///         Ok::<(), topic_relay::HandlerError>(())
///     })).await?;
///
///     // Stop from elsewhere with consumer.close_handle().close()
///     consumer.run().await?;
///     Ok(())
/// }
/// ```

pub mod consumer;
pub mod subscription;

pub use consumer::{
    handler, CloseHandle, ConsumerConfig, ConsumptionLoop, DispatchOutcome, DrainReport, LoopState,
    MessageHandler,
};
pub use subscription::{OffsetPolicy, SubscriptionManager};
