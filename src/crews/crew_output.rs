//! Result of a crew run.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tasks::task_output::TaskOutput;

/// Output of a crew: the final task's raw text plus every task output in
/// crew order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrewOutput {
    pub crew: String,
    /// Raw output of the last task.
    pub raw: String,
    pub tasks_output: Vec<TaskOutput>,
}

impl CrewOutput {
    pub fn new(crew: impl Into<String>, tasks_output: Vec<TaskOutput>) -> Self {
        let raw = tasks_output
            .last()
            .map(|t| t.raw.clone())
            .unwrap_or_default();
        Self {
            crew: crew.into(),
            raw,
            tasks_output,
        }
    }

    /// Output of the named task.
    pub fn task(&self, name: &str) -> Option<&TaskOutput> {
        self.tasks_output.iter().find(|t| t.name == name)
    }
}

impl fmt::Display for CrewOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}
