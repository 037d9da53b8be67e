//! Result of one task.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utilities::string_utils::summarize;

/// Output of a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Name of the task.
    pub name: String,
    /// Description of the task, after interpolation.
    pub description: String,
    pub expected_output: String,
    /// First words of the description.
    pub summary: String,
    /// Raw output of the task.
    pub raw: String,
    /// Role of the agent that executed the task.
    pub agent: String,
}

impl TaskOutput {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        expected_output: impl Into<String>,
        agent: impl Into<String>,
        raw: impl Into<String>,
    ) -> Self {
        let description = description.into();
        Self {
            name: name.into(),
            summary: summarize(&description, 10),
            description,
            expected_output: expected_output.into(),
            raw: raw.into(),
            agent: agent.into(),
        }
    }
}

impl fmt::Display for TaskOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_is_generated() {
        let out = TaskOutput::new(
            "research",
            "one two three four five six seven eight nine ten eleven",
            "facts",
            "Researcher",
            "done",
        );
        assert_eq!(out.summary, "one two three four five six seven eight nine ten...");
        assert_eq!(out.to_string(), "done");
    }
}
