//! Fast status cache.

use dashmap::DashMap;

use super::record::ExecutionRecord;

/// Volatile record cache consulted before the durable store.
pub trait StatusCache: Send + Sync {
    fn get(&self, id: &str) -> Option<ExecutionRecord>;

    fn put(&self, record: ExecutionRecord);

    /// Insert only when no entry exists for the id. An entry written in the
    /// meantime (for example a newer checkpoint) is kept.
    fn put_if_absent(&self, record: ExecutionRecord);

    /// Remove an entry. Returns whether one existed.
    fn remove(&self, id: &str) -> bool;
}

/// Process-local cache.
#[derive(Debug, Default)]
pub struct InMemoryStatusCache {
    entries: DashMap<String, ExecutionRecord>,
}

impl InMemoryStatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StatusCache for InMemoryStatusCache {
    fn get(&self, id: &str) -> Option<ExecutionRecord> {
        self.entries.get(id).map(|r| r.value().clone())
    }

    fn put(&self, record: ExecutionRecord) {
        self.entries.insert(record.id.clone(), record);
    }

    fn put_if_absent(&self, record: ExecutionRecord) {
        self.entries.entry(record.id.clone()).or_insert(record);
    }

    fn remove(&self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }
}
