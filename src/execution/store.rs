//! Durable execution store with a SQLite backend.
//!
//! Every background run opens its own connection through a
//! [`StoreConnector`]; connections are never shared between runs.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use super::record::{ExecutionRecord, ExecutionStatus};
use crate::flow::persistence::FlowPersistence;
use crate::utilities::errors::StoreError;

/// Durable record storage. Also stores flow state snapshots.
pub trait ExecutionStore: FlowPersistence {
    fn insert(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    /// Overwrite status, result and timestamps of an existing record.
    fn update(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Newest first.
    fn list_by_workflow(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;
}

pub type StoreHandle = Arc<dyn ExecutionStore>;

/// Opens store connections.
pub trait StoreConnector: Send + Sync {
    fn connect(&self) -> Result<StoreHandle, StoreError>;
}

/// SQLite-backed store over a single connection.
#[derive(Debug)]
pub struct SqliteStore {
    pub db_path: PathBuf,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and its tables.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Invalid(format!("cannot create {}: {}", parent.display(), e)))?;
            }
        }
        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self {
            db_path: path,
            conn: Mutex::new(conn),
        };
        store.init_db()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|e| StoreError::Lock(e.to_string()))
    }

    fn init_db(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                result TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                finished_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_executions_workflow
                ON executions(workflow_id, created_at);
            CREATE TABLE IF NOT EXISTS flow_states (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                flow_uuid TEXT NOT NULL,
                method_name TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                state_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_flow_states_uuid
                ON flow_states(flow_uuid);",
        )?;
        Ok(())
    }
}

fn encode_result(result: &Option<Value>) -> Result<Option<String>, StoreError> {
    result
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(StoreError::from)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Invalid(format!("bad timestamp '{}': {}", raw, e)))
}

struct RawRecord {
    id: String,
    workflow_id: Option<String>,
    name: String,
    status: String,
    result: Option<String>,
    created_at: String,
    updated_at: String,
    finished_at: Option<String>,
}

impl RawRecord {
    const COLUMNS: &'static str =
        "id, workflow_id, name, status, result, created_at, updated_at, finished_at";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            workflow_id: row.get(1)?,
            name: row.get(2)?,
            status: row.get(3)?,
            result: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            finished_at: row.get(7)?,
        })
    }

    fn decode(self) -> Result<ExecutionRecord, StoreError> {
        Ok(ExecutionRecord {
            status: self.status.parse::<ExecutionStatus>().map_err(StoreError::Invalid)?,
            result: self.result.as_deref().map(serde_json::from_str).transpose()?,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            finished_at: self.finished_at.as_deref().map(parse_time).transpose()?,
            id: self.id,
            workflow_id: self.workflow_id,
            name: self.name,
        })
    }
}

impl ExecutionStore for SqliteStore {
    fn insert(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO executions
             (id, workflow_id, name, status, result, created_at, updated_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.workflow_id,
                record.name,
                record.status.as_str(),
                encode_result(&record.result)?,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.finished_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn update(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE executions
             SET status = ?2, result = ?3, updated_at = ?4, finished_at = ?5
             WHERE id = ?1",
            params![
                record.id,
                record.status.as_str(),
                encode_result(&record.result)?,
                record.updated_at.to_rfc3339(),
                record.finished_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::Invalid(format!("no execution '{}'", record.id)));
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM executions WHERE id = ?1", RawRecord::COLUMNS),
                params![id],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::decode).transpose()
    }

    fn list_by_workflow(
        &self,
        workflow_id: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM executions WHERE workflow_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            RawRecord::COLUMNS
        ))?;
        let rows = stmt.query_map(params![workflow_id, limit as i64], RawRecord::from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.decode()?);
        }
        Ok(out)
    }
}

impl FlowPersistence for SqliteStore {
    fn save_state(
        &self,
        flow_uuid: &str,
        method_name: &str,
        state_data: &Value,
    ) -> Result<(), StoreError> {
        let state_json = serde_json::to_string(state_data)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO flow_states (flow_uuid, method_name, timestamp, state_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![flow_uuid, method_name, Utc::now().to_rfc3339(), state_json],
        )?;
        log::debug!("Saved flow state: flow_uuid={}, method={}", flow_uuid, method_name);
        Ok(())
    }

    fn load_state(&self, flow_uuid: &str) -> Result<Option<Value>, StoreError> {
        let conn = self.lock()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT state_json FROM flow_states
                 WHERE flow_uuid = ?1
                 ORDER BY id DESC
                 LIMIT 1",
                params![flow_uuid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }
}

/// Opens a fresh [`SqliteStore`] connection per call.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreConnector for SqliteConnector {
    fn connect(&self) -> Result<StoreHandle, StoreError> {
        Ok(Arc::new(SqliteStore::open(&self.path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("runs.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_insert_update_get() {
        let (_dir, store) = store();
        let mut record = ExecutionRecord::pending("e1", "pipeline", Some("wf".into()));
        store.insert(&record).unwrap();
        assert_eq!(store.get("e1").unwrap().unwrap().status, ExecutionStatus::Pending);

        record.transition(ExecutionStatus::Completed, Some(json!({"main": "ok"})));
        store.update(&record).unwrap();
        let loaded = store.get("e1").unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert_eq!(loaded.result, Some(json!({"main": "ok"})));
        assert!(loaded.finished_at.is_some());

        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_of_unknown_record_fails() {
        let (_dir, store) = store();
        let record = ExecutionRecord::pending("ghost", "x", None);
        assert!(matches!(store.update(&record), Err(StoreError::Invalid(_))));
    }

    #[test]
    fn test_list_by_workflow_is_newest_first_and_limited() {
        let (_dir, store) = store();
        for i in 0..3 {
            let mut record = ExecutionRecord::pending(format!("e{}", i), "p", Some("wf".into()));
            record.created_at = record.created_at + chrono::Duration::seconds(i);
            store.insert(&record).unwrap();
        }
        store.insert(&ExecutionRecord::pending("other", "p", Some("wf2".into()))).unwrap();

        let listed = store.list_by_workflow("wf", 2).unwrap();
        let ids: Vec<&str> = listed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["e2", "e1"]);
    }

    #[test]
    fn test_connector_opens_independent_connections() {
        let dir = tempfile::tempdir().unwrap();
        let connector = SqliteConnector::new(dir.path().join("shared.db"));
        let a = connector.connect().unwrap();
        let b = connector.connect().unwrap();
        a.insert(&ExecutionRecord::pending("x", "p", None)).unwrap();
        assert!(b.get("x").unwrap().is_some());
    }

    #[test]
    fn test_flow_state_round_trip() {
        let (_dir, store) = store();
        store.save_state("f", "begin", &json!({"n": 1})).unwrap();
        store.save_state("f", "finalize", &json!({"n": 2})).unwrap();
        assert_eq!(store.load_state("f").unwrap(), Some(json!({"n": 2})));
        assert!(store.load_state("none").unwrap().is_none());
    }
}
