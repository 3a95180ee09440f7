use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Mutex;
use tracing::info;

use crate::broker::AssignmentListener;
use crate::types::{Offset, PartitionAssignment};

/// Where a newly assigned partition starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetPolicy {
    /// Rewind every newly assigned partition to the earliest available offset
    Earliest,
    /// Leave the broker's committed/latest offset untouched
    #[default]
    BrokerDefault,
}

/// Applies a subscription's offset policy whenever partitions are assigned
///
/// Runs synchronously inside the consumer client's assignment event, before
/// the assignment is acknowledged. The policy is fixed at construction and
/// only ever applied here, never mid-stream.
#[derive(Debug)]
pub struct SubscriptionManager {
    pattern: String,
    policy: OffsetPolicy,
    assigned: Mutex<BTreeSet<(String, i32)>>,
}

impl SubscriptionManager {
    pub fn new(pattern: impl Into<String>, policy: OffsetPolicy) -> Self {
        Self {
            pattern: pattern.into(),
            policy,
            assigned: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn policy(&self) -> OffsetPolicy {
        self.policy
    }

    /// Every distinct partition assigned so far, sorted by topic then partition
    pub fn assigned_partitions(&self) -> Vec<(String, i32)> {
        self.assigned
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl AssignmentListener for SubscriptionManager {
    fn on_assign(&self, partitions: &mut [PartitionAssignment]) {
        if self.policy == OffsetPolicy::Earliest {
            for partition in partitions.iter_mut() {
                partition.offset = Offset::Beginning;
            }
        }

        self.assigned
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(partitions.iter().map(|p| (p.topic.clone(), p.partition)));

        info!(
            pattern = %self.pattern,
            policy = ?self.policy,
            count = partitions.len(),
            "partitions assigned"
        );
    }
}
