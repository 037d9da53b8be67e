//! Task construction and context wiring.

use std::collections::{HashMap, HashSet};

use crate::spec::{OrchestrationType, TaskSpec};
use crate::task::Task;
use crate::tools::{ResolvedTools, ToolOwner};
use crate::utilities::errors::ConfigError;

use super::agents::AgentSet;

/// Built tasks, keyed by name, in declaration order.
#[derive(Debug, Default, Clone)]
pub struct TaskSet {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

impl TaskSet {
    pub fn get(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|i| &self.tasks[*i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Build every declared task.
///
/// The first pass creates each task and checks its owner; the second wires
/// `context`, so a task may name tasks declared after it. Context names
/// that match no task are dropped.
pub fn build_tasks(
    specs: &[TaskSpec],
    agents: &AgentSet,
    tools: &mut ResolvedTools,
    kind: OrchestrationType,
) -> Result<TaskSet, ConfigError> {
    let mut set = TaskSet::default();

    for spec in specs {
        let mut task = Task::new(&spec.name, &spec.description, &spec.expected_output);
        task.agent = owner(spec, agents, kind)?;
        task.tools = tools.take(&ToolOwner::Task(spec.name.clone()));
        task.execution_number = spec.execution_number;
        task.async_execution = spec.async_execution;
        set.index.insert(task.name.clone(), set.tasks.len());
        set.tasks.push(task);
    }

    let known: HashSet<String> = set.index.keys().cloned().collect();
    for (task, spec) in set.tasks.iter_mut().zip(specs) {
        task.context = spec
            .context
            .iter()
            .filter(|name| {
                let found = known.contains(name.as_str()) && name.as_str() != spec.name;
                if !found {
                    log::debug!(
                        "Task '{}' context '{}' does not match another task; ignoring it",
                        spec.name,
                        name
                    );
                }
                found
            })
            .cloned()
            .collect();
    }

    Ok(set)
}

fn owner(
    spec: &TaskSpec,
    agents: &AgentSet,
    kind: OrchestrationType,
) -> Result<Option<String>, ConfigError> {
    let Some(role) = &spec.agent else {
        return Ok(None);
    };
    if agents.contains(role) {
        return Ok(Some(role.clone()));
    }
    match kind {
        OrchestrationType::Flow => Err(ConfigError::UnknownAgent {
            task: spec.name.clone(),
            role: role.clone(),
        }),
        OrchestrationType::Crew => {
            log::warn!(
                "Task '{}' references unknown agent '{}'; building it unassigned",
                spec.name,
                role
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, agent: Option<&str>, context: &[&str]) -> TaskSpec {
        TaskSpec {
            name: name.into(),
            description: format!("do {}", name),
            expected_output: "x".into(),
            agent: agent.map(str::to_string),
            tools: Vec::new(),
            context: context.iter().map(|s| s.to_string()).collect(),
            execution_number: None,
            async_execution: false,
        }
    }

    #[test]
    fn test_forward_context_resolves_and_unknown_is_dropped() {
        let specs = vec![
            task("draft", None, &["research", "ghost"]),
            task("research", None, &[]),
        ];
        let set = build_tasks(
            &specs,
            &AgentSet::default(),
            &mut ResolvedTools::default(),
            OrchestrationType::Crew,
        )
        .unwrap();
        assert_eq!(set.get("draft").unwrap().context, vec!["research"]);
        assert!(set.get("research").unwrap().context.is_empty());
    }

    #[test]
    fn test_unknown_agent_is_soft_for_crews() {
        let specs = vec![task("a", Some("Nobody"), &[])];
        let set = build_tasks(
            &specs,
            &AgentSet::default(),
            &mut ResolvedTools::default(),
            OrchestrationType::Crew,
        )
        .unwrap();
        assert_eq!(set.get("a").unwrap().agent, None);
    }

    #[test]
    fn test_unknown_agent_is_hard_for_flows() {
        let specs = vec![task("a", Some("Nobody"), &[])];
        let err = build_tasks(
            &specs,
            &AgentSet::default(),
            &mut ResolvedTools::default(),
            OrchestrationType::Flow,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAgent { ref role, .. } if role == "Nobody"));
    }
}
