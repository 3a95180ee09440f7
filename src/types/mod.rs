pub mod message;
pub mod topic;

pub use message::{Message, NewTopic, Offset, OutboundRecord, PartitionAssignment};
pub use topic::{TopicName, TopicPattern};
