//! Execution records and status reports.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a run. `NotFound` is only ever reported, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    NotFound,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::NotFound => "NOT_FOUND",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ExecutionStatus::Pending),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "COMPLETED" => Ok(ExecutionStatus::Completed),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "NOT_FOUND" => Ok(ExecutionStatus::NotFound),
            other => Err(format!("unknown execution status '{}'", other)),
        }
    }
}

/// One submitted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow_id: Option<String>,
    pub name: String,
    pub status: ExecutionStatus,
    /// Present once the run is terminal.
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// A fresh PENDING record.
    pub fn pending(id: impl Into<String>, name: impl Into<String>, workflow_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            workflow_id,
            name: name.into(),
            status: ExecutionStatus::Pending,
            result: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Move to `status`, stamping times. Results are kept only for
    /// terminal states.
    pub fn transition(&mut self, status: ExecutionStatus, result: Option<Value>) {
        let now = Utc::now();
        self.status = status;
        self.updated_at = now;
        if status.is_terminal() {
            self.result = result;
            self.finished_at = Some(now);
        }
    }

    pub fn report(&self) -> StatusReport {
        StatusReport {
            status: self.status,
            result: self.result.clone(),
        }
    }

    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            execution_id: self.id.clone(),
            status: self.status,
            name: self.name.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: ExecutionStatus,
    pub result: Option<Value>,
}

impl StatusReport {
    pub fn not_found() -> Self {
        Self {
            status: ExecutionStatus::NotFound,
            result: None,
        }
    }
}

/// Row of a per-workflow listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_value(ExecutionStatus::NotFound).unwrap(), json!("NOT_FOUND"));
        assert_eq!("RUNNING".parse::<ExecutionStatus>().unwrap(), ExecutionStatus::Running);
        assert!("running".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_result_only_kept_when_terminal() {
        let mut record = ExecutionRecord::pending("e1", "wf", None);
        record.transition(ExecutionStatus::Running, Some(json!("ignored")));
        assert!(record.result.is_none());
        assert!(record.finished_at.is_none());

        record.transition(ExecutionStatus::Completed, Some(json!({"main": "done"})));
        assert_eq!(record.report().result, Some(json!({"main": "done"})));
        assert!(record.finished_at.is_some());
    }
}
