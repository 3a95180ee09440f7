use std::sync::Arc;
use tracing::{debug, error, info};

use crate::broker::{AdminClient, CreateOutcome};
use crate::error::{Error, Result};
use crate::producer::registry::{ProvisionRegistry, ProvisioningRecord};
use crate::types::NewTopic;

/// What `ensure` had to do for a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Already in the registry; no broker call was made
    AlreadyProvisioned,
    /// Broker metadata already listed the topic
    Existing,
    /// The topic was created by this call
    Created,
}

/// Idempotently makes sure topics exist before anything is published to them
///
/// # Example
///
/// ```
/// use topic_relay::broker::{Broker, InMemoryBroker};
/// use topic_relay::producer::{ProvisionOutcome, TopicProvisioner};
///
/// # #[tokio::main]
/// # async fn main() -> topic_relay::Result<()> {
/// let broker = InMemoryBroker::new();
/// let provisioner = TopicProvisioner::isolated(broker.admin()?);
///
/// assert_eq!(provisioner.ensure("stations", 1, 1).await?, ProvisionOutcome::Created);
/// assert_eq!(provisioner.ensure("stations", 1, 1).await?, ProvisionOutcome::AlreadyProvisioned);
/// assert_eq!(broker.create_topic_calls(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TopicProvisioner {
    admin: Arc<dyn AdminClient>,
    registry: Arc<ProvisionRegistry>,
}

impl TopicProvisioner {
    /// Provisioner backed by the process-wide registry
    pub fn new(admin: Arc<dyn AdminClient>) -> Self {
        Self::with_registry(admin, ProvisionRegistry::global())
    }

    /// Provisioner backed by a fresh registry of its own
    pub fn isolated(admin: Arc<dyn AdminClient>) -> Self {
        Self::with_registry(admin, Arc::new(ProvisionRegistry::new()))
    }

    pub fn with_registry(admin: Arc<dyn AdminClient>, registry: Arc<ProvisionRegistry>) -> Self {
        Self { admin, registry }
    }

    pub fn registry(&self) -> &Arc<ProvisionRegistry> {
        &self.registry
    }

    /// Make sure `topic` exists with the given layout
    ///
    /// Returns immediately when the registry already has the topic.
    /// Otherwise checks broker metadata and creates the topic if it is absent.
    /// Concurrent calls for the same topic share a single attempt.
    ///
    /// # Errors
    ///
    /// * `Error::TransportError` - broker unreachable; nothing is recorded
    /// * `Error::TopicCreationError` - broker rejected the creation; logged, nothing
    ///   recorded, safe to call again
    pub async fn ensure(&self, topic: &str, partitions: i32, replicas: i32) -> Result<ProvisionOutcome> {
        let request = NewTopic::new(topic, partitions, replicas)?;

        let slot = self.registry.slot(topic);
        if slot.initialized() {
            debug!(topic, "topic already provisioned");
            return Ok(ProvisionOutcome::AlreadyProvisioned);
        }

        // Stays AlreadyProvisioned when another caller finished the attempt we waited on
        let mut outcome = ProvisionOutcome::AlreadyProvisioned;
        let outcome_ref = &mut outcome;
        let request_ref = &request;
        let attempt = slot
            .get_or_try_init(|| async move {
                let (record, result) = self.provision(request_ref).await?;
                *outcome_ref = result;
                Ok::<_, Error>(record)
            })
            .await;
        if let Err(e) = attempt {
            self.registry.release(topic, &slot);
            return Err(e);
        }

        Ok(outcome)
    }

    async fn provision(&self, request: &NewTopic) -> Result<(ProvisioningRecord, ProvisionOutcome)> {
        let record = ProvisioningRecord {
            topic: request.name.clone(),
            partitions: request.partitions,
            replication_factor: request.replication_factor,
        };

        let exists = self.admin.topic_exists(&request.name).await.map_err(|e| {
            error!(topic = %request.name, error = %e, "topic metadata lookup failed");
            e
        })?;
        if exists {
            info!(topic = %request.name, "topic already exists");
            return Ok((record, ProvisionOutcome::Existing));
        }

        let results = self
            .admin
            .create_topics(std::slice::from_ref(request))
            .await
            .map_err(|e| {
                error!(topic = %request.name, error = %e, "create-topics request failed");
                e
            })?;

        let creation = results
            .into_iter()
            .find(|c| c.topic == request.name)
            .ok_or_else(|| Error::TopicCreationError {
                topic: request.name.clone(),
                reason: "broker did not acknowledge the request".to_string(),
            })?;

        match creation.outcome {
            CreateOutcome::Created => {
                info!(
                    topic = %request.name,
                    partitions = request.partitions,
                    replicas = request.replication_factor,
                    "topic created"
                );
                Ok((record, ProvisionOutcome::Created))
            }
            CreateOutcome::AlreadyExists => {
                info!(topic = %request.name, "topic created concurrently elsewhere");
                Ok((record, ProvisionOutcome::Existing))
            }
            CreateOutcome::Failed(reason) => {
                error!(topic = %request.name, %reason, "failed to create topic");
                Err(Error::TopicCreationError {
                    topic: request.name.clone(),
                    reason,
                })
            }
        }
    }
}
