//! Runtime task node.

use std::collections::HashMap;
use std::fmt;

use md5::{Digest, Md5};
use uuid::Uuid;

use crate::tasks::task_output::TaskOutput;
use crate::tools::CapabilityRef;
use crate::utilities::string_utils::interpolate;

/// Separator between context outputs in a prompt.
const CONTEXT_SEPARATOR: &str = "\n\n----------\n\n";

/// A built task.
///
/// `context` holds the names of the tasks whose output this task consumes.
/// Every name in it refers to a task that exists in the same build.
#[derive(Clone)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub expected_output: String,
    /// Owning agent role. `None` when unassigned.
    pub agent: Option<String>,
    pub tools: Vec<CapabilityRef>,
    pub context: Vec<String>,
    pub execution_number: Option<i64>,
    pub async_execution: bool,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("agent", &self.agent)
            .field("context", &self.context)
            .field("execution_number", &self.execution_number)
            .field("async_execution", &self.async_execution)
            .finish()
    }
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            expected_output: expected_output.into(),
            agent: None,
            tools: Vec::new(),
            context: Vec::new(),
            execution_number: None,
            async_execution: false,
        }
    }

    /// MD5 of `description|expected_output`.
    pub fn key(&self) -> String {
        let mut hasher = Md5::new();
        hasher.update(format!("{}|{}", self.description, self.expected_output).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Description with inputs interpolated.
    pub fn interpolated_description(&self, inputs: &HashMap<String, String>) -> String {
        interpolate(&self.description, inputs)
    }

    /// Full prompt for the executing agent.
    pub fn prompt(
        &self,
        inputs: &HashMap<String, String>,
        context: &[TaskOutput],
        memories: &[(String, String)],
    ) -> String {
        let mut parts = vec![
            self.interpolated_description(inputs),
            format!(
                "Expected Output: {}",
                interpolate(&self.expected_output, inputs)
            ),
        ];
        if !context.is_empty() {
            let joined = context
                .iter()
                .map(|o| o.raw.as_str())
                .collect::<Vec<_>>()
                .join(CONTEXT_SEPARATOR);
            parts.push(format!(
                "This is the context you're working with:\n{}",
                joined
            ));
        }
        if !memories.is_empty() {
            let lines: Vec<String> = memories
                .iter()
                .map(|(source, text)| format!("- [{}] {}", source, text))
                .collect();
            parts.push(format!("Relevant memories:\n{}", lines.join("\n")));
        }
        parts.join("\n")
    }
}
