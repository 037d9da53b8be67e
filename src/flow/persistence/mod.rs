//! Flow state persistence.
//!
//! The executor saves the state after every completed step. The SQLite
//! implementation lives with the execution store
//! ([`SqliteStore`](crate::execution::SqliteStore)), which owns the
//! `flow_states` table; this module holds the trait and an in-memory backend.

use parking_lot::Mutex;
use serde_json::Value;

use crate::utilities::errors::StoreError;

/// Backend that records flow state snapshots.
pub trait FlowPersistence: Send + Sync + std::fmt::Debug {
    /// Persist the state after `method_name` completed.
    fn save_state(
        &self,
        flow_uuid: &str,
        method_name: &str,
        state_data: &Value,
    ) -> Result<(), StoreError>;

    /// Most recent state saved for `flow_uuid`.
    fn load_state(&self, flow_uuid: &str) -> Result<Option<Value>, StoreError>;
}

/// Save a snapshot, logging rather than failing the step on error.
pub fn persist_state(
    persistence: &dyn FlowPersistence,
    flow_uuid: &str,
    method_name: &str,
    state_data: &Value,
) {
    if let Err(e) = persistence.save_state(flow_uuid, method_name, state_data) {
        log::error!(
            "Failed to persist flow state for method {}: {}",
            method_name,
            e
        );
    }
}

/// Snapshot kept by [`InMemoryFlowPersistence`].
#[derive(Debug, Clone, PartialEq)]
pub struct SavedState {
    pub flow_uuid: String,
    pub method_name: String,
    pub state: Value,
}

/// Keeps every snapshot in memory, in save order.
#[derive(Debug, Default)]
pub struct InMemoryFlowPersistence {
    saved: Mutex<Vec<SavedState>>,
}

impl InMemoryFlowPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<SavedState> {
        self.saved.lock().clone()
    }

    /// Method names saved for `flow_uuid`, in order.
    pub fn methods(&self, flow_uuid: &str) -> Vec<String> {
        self.saved
            .lock()
            .iter()
            .filter(|s| s.flow_uuid == flow_uuid)
            .map(|s| s.method_name.clone())
            .collect()
    }
}

impl FlowPersistence for InMemoryFlowPersistence {
    fn save_state(
        &self,
        flow_uuid: &str,
        method_name: &str,
        state_data: &Value,
    ) -> Result<(), StoreError> {
        self.saved.lock().push(SavedState {
            flow_uuid: flow_uuid.to_string(),
            method_name: method_name.to_string(),
            state: state_data.clone(),
        });
        Ok(())
    }

    fn load_state(&self, flow_uuid: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .saved
            .lock()
            .iter()
            .rev()
            .find(|s| s.flow_uuid == flow_uuid)
            .map(|s| s.state.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_in_memory_returns_latest() {
        let persistence = InMemoryFlowPersistence::new();
        persistence.save_state("f1", "begin", &json!({"n": 1})).unwrap();
        persistence.save_state("f2", "begin", &json!({"n": 9})).unwrap();
        persistence.save_state("f1", "next", &json!({"n": 2})).unwrap();

        assert_eq!(persistence.load_state("f1").unwrap(), Some(json!({"n": 2})));
        assert_eq!(persistence.methods("f1"), vec!["begin", "next"]);
        assert!(persistence.load_state("nope").unwrap().is_none());
    }
}
