/// Producer side: topic provisioning and publishing
///
/// This module provides:
/// - `TopicProvisioner`: idempotent "ensure topic exists" shared by publishers
/// - `ProvisionRegistry`: process-wide set of topics already confirmed present
/// - `Publisher`: buffered publishing with a flush-on-close contract
///
/// # Provisioning
///
/// Every `Publisher::new` goes through `TopicProvisioner::ensure`. The first
/// call for a topic looks up broker metadata and creates the topic when it is
/// missing; later calls anywhere in the process return without touching the
/// broker.

pub mod provisioner;
pub mod publisher;
pub mod registry;

pub use provisioner::{ProvisionOutcome, TopicProvisioner};
pub use publisher::{Publisher, PublisherConfig};
pub use registry::{ProvisionRegistry, ProvisioningRecord};
