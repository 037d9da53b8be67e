//! Background execution and status tracking.
//!
//! `submit` records a PENDING run and hands it to a spawned task that owns
//! its own store connection. That task writes exactly two checkpoints:
//! RUNNING at start and one terminal status at the end. Each checkpoint goes
//! to the durable store first and then to the cache. Readers try the cache
//! and fall back to the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::time::Instant;
use uuid::Uuid;

use super::cache::{InMemoryStatusCache, StatusCache};
use super::record::{ExecutionRecord, ExecutionStatus, ExecutionSummary, StatusReport};
use super::store::{StoreConnector, StoreHandle};
use crate::compiler::WorkflowCompiler;
use crate::flow::FlowPersistence;
use crate::spec::peek_name;
use crate::utilities::errors::StoreError;
use crate::utilities::string_utils::USER_INPUT_KEY;

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 200;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A run request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Submission {
    /// Workflow document text (YAML or JSON).
    pub spec: String,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub orchestration_type: Option<String>,
}

impl Submission {
    pub fn new(spec: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Explicit id, else `parameters.workflow_id`.
    pub fn effective_workflow_id(&self) -> Option<String> {
        self.workflow_id.clone().or_else(|| {
            self.parameters.get("workflow_id").and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
        })
    }

    /// Placeholder values for the run: the input under `user_input`, then
    /// every parameter as text.
    pub fn inputs(&self) -> HashMap<String, String> {
        let mut inputs: HashMap<String, String> = self
            .parameters
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect();
        if let Some(input) = &self.input {
            inputs.insert(USER_INPUT_KEY.to_string(), input.clone());
        }
        inputs
    }
}

/// Issues execution ids, runs submissions in the background and answers
/// status queries.
#[derive(Clone)]
pub struct ExecutionTracker {
    compiler: WorkflowCompiler,
    cache: Arc<dyn StatusCache>,
    store: StoreHandle,
    connector: Arc<dyn StoreConnector>,
}

impl std::fmt::Debug for ExecutionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionTracker")
            .field("compiler", &self.compiler)
            .finish_non_exhaustive()
    }
}

impl ExecutionTracker {
    /// Open the request-path store connection and start with an empty cache.
    pub fn new(
        compiler: WorkflowCompiler,
        connector: Arc<dyn StoreConnector>,
    ) -> Result<Self, StoreError> {
        let store = connector.connect()?;
        Ok(Self {
            compiler,
            cache: Arc::new(InMemoryStatusCache::new()),
            store,
            connector,
        })
    }

    pub fn with_cache(mut self, cache: Arc<dyn StatusCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn compiler(&self) -> &WorkflowCompiler {
        &self.compiler
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Record a PENDING run and start it in the background.
    ///
    /// Fails only when the PENDING record cannot be written.
    pub fn submit(&self, submission: Submission) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let name = peek_name(&submission.spec).unwrap_or_else(|| "workflow".to_string());
        let record = ExecutionRecord::pending(&id, name, submission.effective_workflow_id());

        self.store.insert(&record)?;
        self.cache.put(record.clone());
        log::info!("Execution {} ({}) submitted as PENDING", id, record.name);

        let tracker = self.clone();
        tokio::spawn(async move {
            tracker.run(record, submission).await;
        });
        Ok(id)
    }

    async fn run(&self, mut record: ExecutionRecord, submission: Submission) {
        let connector = self.connector.clone();
        let connected = match tokio::task::spawn_blocking(move || connector.connect()).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let store = match connected {
            Ok(store) => store,
            Err(reason) => {
                log::error!("Execution {} could not open a store connection: {}", record.id, reason);
                record.transition(
                    ExecutionStatus::Failed,
                    Some(Value::String(format!("store error: {}", reason))),
                );
                self.write_checkpoint(&self.store, &record).await;
                return;
            }
        };

        record.transition(ExecutionStatus::Running, None);
        self.write_checkpoint(&store, &record).await;

        let persistence: Arc<dyn FlowPersistence> = store.clone();
        let outcome = self
            .compiler
            .compile_and_run(
                &submission.spec,
                submission.orchestration_type.as_deref(),
                &submission.inputs(),
                record.workflow_id.clone(),
                Some(persistence),
            )
            .await;

        match outcome {
            Ok(result) => record.transition(ExecutionStatus::Completed, Some(result)),
            Err(e) => {
                log::error!("Execution {} failed: {}", record.id, e);
                record.transition(
                    ExecutionStatus::Failed,
                    Some(Value::String(format!("{} error: {}", e.kind(), e))),
                );
            }
        }
        self.write_checkpoint(&store, &record).await;
    }

    /// Store first, then cache. The SQLite write runs on the blocking pool.
    async fn write_checkpoint(&self, store: &StoreHandle, record: &ExecutionRecord) {
        let handle = store.clone();
        let snapshot = record.clone();
        match tokio::task::spawn_blocking(move || handle.update(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!(
                "Failed to persist status {} for execution {}: {}",
                record.status,
                record.id,
                e
            ),
            Err(e) => log::error!(
                "Checkpoint {} for execution {} did not complete: {}",
                record.status,
                record.id,
                e
            ),
        }
        self.cache.put(record.clone());
        log::info!("Execution {} is now {}", record.id, record.status);
    }

    /// Current status. Unknown ids yield `NOT_FOUND`, never an error.
    pub fn get_status(&self, id: &str) -> StatusReport {
        if let Some(record) = self.cache.get(id) {
            return record.report();
        }
        match self.store.get(id) {
            Ok(Some(record)) => {
                let report = record.report();
                // A checkpoint may have landed in the cache since the miss.
                self.cache.put_if_absent(record);
                report
            }
            Ok(None) => StatusReport::not_found(),
            Err(e) => {
                log::warn!("Status lookup for {} failed in the store: {}", id, e);
                StatusReport::not_found()
            }
        }
    }

    /// Drop the cached entry. Idempotent; the durable record is untouched.
    pub fn delete_cache_entry(&self, id: &str) {
        if self.cache.remove(id) {
            log::debug!("Removed cache entry for execution {}", id);
        }
    }

    /// Newest runs of a workflow. `limit` is clamped to `1..=MAX_LIST_LIMIT`.
    pub fn list_by_workflow(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionSummary>, StoreError> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        Ok(self
            .store
            .list_by_workflow(workflow_id, limit)?
            .iter()
            .map(ExecutionRecord::summary)
            .collect())
    }

    /// Poll until the run is terminal or `timeout` passes, returning the
    /// last status seen.
    pub async fn wait_for_terminal(&self, id: &str, timeout: Duration) -> StatusReport {
        let deadline = Instant::now() + timeout;
        loop {
            let report = self.get_status(id);
            if report.status.is_terminal() || Instant::now() >= deadline {
                return report;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
