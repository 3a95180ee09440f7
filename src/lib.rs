//! Topic Relay: client-side layer between application code and a pub/sub broker
//!
//! Consumes messages from dynamically named topics and dispatches them to
//! handlers with per-message failure isolation; provisions topics and
//! publishes to them without repeating broker-side setup across publishers.
//!
//! # Quick Start
//!
//! ```no_run
//! use topic_relay::broker::{Broker, InMemoryBroker};
//! use topic_relay::consumer::{handler, ConsumerConfig, ConsumptionLoop, OffsetPolicy};
//! use topic_relay::producer::{Publisher, PublisherConfig, TopicProvisioner};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = InMemoryBroker::new();
//!     let provisioner = TopicProvisioner::new(broker.admin()?);
//!
//!     let publisher = Publisher::new(&broker, &provisioner, PublisherConfig::new("stations")).await?;
//!     publisher.publish(&json!(40380), &json!({ "station_name": "Clark/Lake" }))?;
//!     publisher.close().await?;
//!
//!     let config = ConsumerConfig::new("stations").with_offset_policy(OffsetPolicy::Earliest);
//!     let mut consumer = ConsumptionLoop::connect(&broker, config, handler(|msg| async move {
//!         println!("{:?}", msg.value);
//!         Ok::<(), topic_relay::HandlerError>(())
//!     })).await?;
//!     consumer.run_once().await?;
//!     consumer.close().await?;
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod producer;
pub mod schema;
pub mod types;

// Re-export main types for convenience
pub use broker::{AdminClient, Broker, ConsumerClient, InMemoryBroker, ProducerClient};
pub use config::{BrokerConnectionConfig, SerializationMode};
pub use consumer::{ConsumerConfig, ConsumptionLoop, LoopState, OffsetPolicy};
pub use error::{Error, HandlerError, HandlerResult, Result};
pub use producer::{Publisher, PublisherConfig, TopicProvisioner};
pub use types::{Message, TopicName, TopicPattern};
