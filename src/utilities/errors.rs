//! Error types for building and running workflows.
//!
//! A build attempt ends in exactly one of three error kinds: a
//! [`ConfigError`] (the document itself is wrong, detected locally), a
//! [`ConnectivityError`] (one or more tools could not be resolved or
//! validated, always aggregated), or an [`ExecutionError`] (a task, crew or
//! flow step failed while running).

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

/// Result alias used by the compile pipeline.
pub type BuildResult<T> = Result<T, BuildError>;

/// The outcome of a failed build or run.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Malformed or structurally invalid workflow document.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// One or more tools could not be reached or failed validation.
    #[error("connectivity error: {0}")]
    Connectivity(#[from] ConnectivityError),

    /// A task, crew or flow step failed while running.
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl BuildError {
    /// Short machine-readable kind, used as the prefix of FAILED results.
    pub fn kind(&self) -> &'static str {
        match self {
            BuildError::Config(_) => "config",
            BuildError::Connectivity(_) => "connectivity",
            BuildError::Execution(_) => "execution",
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors detected entirely locally by the parser and validator.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The text could not be parsed in the format it appears to be written in.
    #[error("{format} parse error: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    /// Neither the caller nor the document named an orchestration kind.
    #[error("orchestration type is not specified (expected \"crew\" or \"flow\")")]
    MissingOrchestrationType,

    /// The orchestration kind is not one of the known kinds.
    #[error("unknown orchestration type '{0}' (expected \"crew\" or \"flow\")")]
    UnknownOrchestrationType(String),

    /// One or more sections failed structural validation.
    #[error("{}", format_issues(.0))]
    Schema(Vec<SchemaIssue>),

    /// A flow task references an agent role that does not exist.
    #[error("task '{task}' references unknown agent '{role}'; flows require every task to have a declared owner")]
    UnknownAgent { task: String, role: String },
}

impl ConfigError {
    /// Build a schema error with a single issue.
    pub fn schema(section: &str, path: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Schema(vec![SchemaIssue::new(section, path, reason)])
    }

    /// Sections that failed validation, in first-seen order.
    pub fn failed_sections(&self) -> Vec<String> {
        match self {
            ConfigError::Schema(issues) => {
                let mut seen = Vec::new();
                for issue in issues {
                    if !seen.contains(&issue.section) {
                        seen.push(issue.section.clone());
                    }
                }
                seen
            }
            _ => Vec::new(),
        }
    }
}

/// A single structural validation failure.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SchemaIssue {
    /// Top-level section that failed (`agents`, `tasks`, `crews`, ...).
    pub section: String,
    /// Location inside the section, e.g. `agents[1].role`.
    pub path: String,
    /// What is wrong.
    pub reason: String,
}

impl SchemaIssue {
    pub fn new(section: &str, path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            section: section.to_string(),
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.section, self.path, self.reason)
    }
}

/// Remediation hint for a failing top-level section.
pub fn section_hint(section: &str) -> &'static str {
    match section {
        "agents" => "each agent needs non-empty 'role', 'goal' and 'backstory' strings, and roles must be unique",
        "tasks" => "each task needs non-empty 'name', 'description' and 'expected_output' strings, and names must be unique",
        "crews" => "declare 'crews' as a list (or a single 'crew' mapping) with a unique 'name'; 'process' is 'sequential' or 'hierarchical'",
        "tools" => "a tool is a bare name string or a mapping with 'type' one of native, custom, hosted, server and that variant's fields",
        "flow_methods" => "each method needs a unique 'name' and 'type' (start, listen, router); listen and router need 'listen_to' naming declared methods",
        "state" => "state fields are mappings with 'type' one of text, integer, decimal, boolean, list, map and an optional matching 'default'",
        _ => "check the document structure against the workflow format",
    }
}

fn format_issues(issues: &[SchemaIssue]) -> String {
    let mut lines: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
    let sections: BTreeSet<&str> = issues.iter().map(|i| i.section.as_str()).collect();
    for section in sections {
        lines.push(format!("hint ({}): {}", section, section_hint(section)));
    }
    lines.join("; ")
}

// ---------------------------------------------------------------------------
// Connectivity errors
// ---------------------------------------------------------------------------

/// A single tool that failed resolution or validation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ToolFailure {
    /// The agent role or task name that declared the tool.
    pub owner: String,
    /// Tool (or tool server) identifier.
    pub tool: String,
    /// Why it failed.
    pub reason: String,
    /// The declaration names something this process does not provide (an
    /// unregistered native or custom tool). No remote call was involved.
    pub local: bool,
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: {}", self.owner, self.tool, self.reason)?;
        if self.local {
            write!(f, " (local declaration)")?;
        }
        Ok(())
    }
}

/// Aggregate of every tool failure observed during a build.
#[derive(Debug, Clone, Default, Error)]
pub struct ConnectivityError {
    pub failures: Vec<ToolFailure>,
}

impl ConnectivityError {
    pub fn new(failures: Vec<ToolFailure>) -> Self {
        Self { failures }
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures caused by local declarations rather than unreachable tools.
    pub fn local_failures(&self) -> impl Iterator<Item = &ToolFailure> {
        self.failures.iter().filter(|f| f.local)
    }

    /// `Ok(())` when nothing failed, otherwise the aggregate as an error.
    pub fn into_result(self) -> Result<(), ConnectivityError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tool(s) failed", self.failures.len())?;
        let local = self.local_failures().count();
        if local > 0 {
            write!(f, " ({} local)", local)?;
        }
        write!(f, ": ")?;
        let parts: Vec<String> = self.failures.iter().map(|t| t.to_string()).collect();
        write!(f, "{}", parts.join("; "))
    }
}

// ---------------------------------------------------------------------------
// Execution errors
// ---------------------------------------------------------------------------

/// Failure while actually running a unit of work.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("task '{task}' failed: {message}")]
    Task { task: String, message: String },

    #[error("crew '{crew}' failed: {message}")]
    Crew { crew: String, message: String },

    #[error("flow step '{step}' failed: {message}")]
    FlowStep { step: String, message: String },

    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Failure of a durable store or flow persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to acquire database lock: {0}")]
    Lock(String),

    #[error("stored record is invalid: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_lists_hint_once_per_section() {
        let err = ConfigError::Schema(vec![
            SchemaIssue::new("agents", "agents[0].role", "missing"),
            SchemaIssue::new("agents", "agents[1].goal", "missing"),
            SchemaIssue::new("tasks", "tasks[0].name", "missing"),
        ]);
        let text = err.to_string();
        assert_eq!(text.matches("hint (agents)").count(), 1);
        assert_eq!(text.matches("hint (tasks)").count(), 1);
        assert_eq!(err.failed_sections(), vec!["agents", "tasks"]);
    }

    #[test]
    fn test_connectivity_error_reports_every_failure() {
        let err = ConnectivityError::new(vec![
            ToolFailure {
                owner: "Researcher".into(),
                tool: "search".into(),
                reason: "unreachable".into(),
                local: false,
            },
            ToolFailure {
                owner: "Writer".into(),
                tool: "docs".into(),
                reason: "unknown server".into(),
                local: false,
            },
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 tool(s) failed: "));
        assert!(text.contains("Researcher -> search"));
        assert!(text.contains("Writer -> docs"));
    }

    #[test]
    fn test_local_failures_are_named_in_the_aggregate() {
        let err = ConnectivityError::new(vec![
            ToolFailure {
                owner: "agent 'Researcher'".into(),
                tool: "serch".into(),
                reason: "unknown native tool 'serch'".into(),
                local: true,
            },
            ToolFailure {
                owner: "agent 'Writer'".into(),
                tool: "docs/*".into(),
                reason: "connection refused".into(),
                local: false,
            },
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 tool(s) failed (1 local): "));
        assert!(text.contains("unknown native tool 'serch' (local declaration)"));
        assert!(!text.contains("connection refused (local"));
        assert_eq!(err.local_failures().count(), 1);
    }

    #[test]
    fn test_empty_connectivity_error_is_ok() {
        assert!(ConnectivityError::default().into_result().is_ok());
    }

    #[test]
    fn test_build_error_kind() {
        let err: BuildError = ConfigError::MissingOrchestrationType.into();
        assert_eq!(err.kind(), "config");
        let err: BuildError = ExecutionError::Other("boom".into()).into();
        assert_eq!(err.kind(), "execution");
    }
}
