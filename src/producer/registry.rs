use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::OnceCell;

/// Topic confirmed present on the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningRecord {
    pub topic: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

/// Set of topics already confirmed present, shared by every publisher
///
/// Each topic gets its own once-cell: the first caller provisions while
/// concurrent callers for the same topic wait on it, so at most one
/// create-topic request is in flight per topic. A failed attempt leaves the
/// cell empty and the next caller tries again.
///
/// Lives for the process only; nothing is persisted.
#[derive(Debug, Default)]
pub struct ProvisionRegistry {
    topics: Mutex<HashMap<String, Arc<OnceCell<ProvisioningRecord>>>>,
}

impl ProvisionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> Arc<ProvisionRegistry> {
        static GLOBAL: OnceLock<Arc<ProvisionRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ProvisionRegistry::new())))
    }

    /// Cell for a topic, inserted if absent
    pub(crate) fn slot(&self, topic: &str) -> Arc<OnceCell<ProvisioningRecord>> {
        let mut topics = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(topics.entry(topic.to_string()).or_default())
    }

    /// Forget a cell left empty by a failed attempt
    ///
    /// Kept while any other caller still holds the same cell, since that
    /// caller retries through it.
    pub(crate) fn release(&self, topic: &str, slot: &Arc<OnceCell<ProvisioningRecord>>) {
        let mut topics = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let idle = topics.get(topic).is_some_and(|cell| {
            Arc::ptr_eq(cell, slot) && !cell.initialized() && Arc::strong_count(cell) == 2
        });
        if idle {
            topics.remove(topic);
        }
    }

    /// Number of topics with a cell, provisioned or not
    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn get(&self, topic: &str) -> Option<ProvisioningRecord> {
        let topics = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        topics.get(topic).and_then(|cell| cell.get().cloned())
    }

    pub fn is_provisioned(&self, topic: &str) -> bool {
        self.get(topic).is_some()
    }

    /// Names of every provisioned topic, sorted
    pub fn provisioned_topics(&self) -> Vec<String> {
        let topics = self
            .topics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names: Vec<String> = topics
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}
