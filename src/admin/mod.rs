//! Check-then-create glue for the connector-management and query-engine services
//!
//! Both collaborators are black boxes reached over HTTP. The only semantics
//! here are status-code interpretation: a resource that answers its status
//! probe is left alone, an absent one gets its configuration posted.

pub mod resources;
pub mod rest;

pub use resources::{ConnectorConfig, QueryStatement};
pub use rest::{ResourceStatus, RestProvisioner, StatusCheck};
