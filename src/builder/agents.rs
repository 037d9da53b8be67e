//! Agent construction from validated declarations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{
    Agent, AgentLimits, CODE_EXECUTION_MAX_ITER, CODE_EXECUTION_MAX_TIME, DEFAULT_MAX_ITER,
};
use crate::llm::ModelProvider;
use crate::spec::{AgentSpec, ToolSpec, CODE_INTERPRETER_TOOL};
use crate::tools::{ResolvedTools, ToolOwner};
use crate::utilities::errors::{ConfigError, SchemaIssue};

/// Built agents, keyed by role, in declaration order.
#[derive(Debug, Default, Clone)]
pub struct AgentSet {
    agents: Vec<Arc<Agent>>,
    index: HashMap<String, usize>,
}

impl AgentSet {
    pub fn get(&self, role: &str) -> Option<&Arc<Agent>> {
        self.index.get(role).map(|i| &self.agents[*i])
    }

    pub fn contains(&self, role: &str) -> bool {
        self.index.contains_key(role)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Agent>> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    fn push(&mut self, agent: Agent) {
        self.index.insert(agent.role.clone(), self.agents.len());
        self.agents.push(Arc::new(agent));
    }
}

/// The tool declarations an agent actually gets.
///
/// `allow_code_execution` adds the code interpreter when the agent did not
/// already list it.
pub fn effective_tools(spec: &AgentSpec) -> Vec<ToolSpec> {
    let mut tools = spec.tools.clone();
    if spec.allow_code_execution && !tools.iter().any(ToolSpec::is_code_interpreter) {
        tools.push(ToolSpec::native(CODE_INTERPRETER_TOOL));
    }
    tools
}

/// Whether the agent ends up with the code interpreter attached.
pub fn has_code_execution(spec: &AgentSpec) -> bool {
    spec.allow_code_execution || spec.tools.iter().any(ToolSpec::is_code_interpreter)
}

/// Limits for an agent, tightened when code execution is attached.
///
/// Explicit values in the declaration always win.
pub fn limits_for(spec: &AgentSpec) -> AgentLimits {
    let code = has_code_execution(spec);
    AgentLimits {
        max_iter: spec.max_iter.unwrap_or(if code {
            CODE_EXECUTION_MAX_ITER
        } else {
            DEFAULT_MAX_ITER
        }),
        max_execution_time: match spec.max_execution_time {
            Some(secs) => Some(Duration::from_secs(secs)),
            None if code => Some(CODE_EXECUTION_MAX_TIME),
            None => None,
        },
        max_rpm: spec.max_rpm,
    }
}

/// Build every declared agent, attaching the tools that passed the gate.
pub fn build_agents(
    specs: &[AgentSpec],
    tools: &mut ResolvedTools,
    models: &dyn ModelProvider,
) -> Result<AgentSet, ConfigError> {
    let mut set = AgentSet::default();
    let mut issues = Vec::new();

    for (i, spec) in specs.iter().enumerate() {
        let llm = match models.model_for(spec.llm.as_ref()) {
            Ok(llm) => llm,
            Err(e) => {
                issues.push(SchemaIssue::new(
                    "agents",
                    format!("agents[{}].llm", i),
                    format!("model unavailable: {}", e),
                ));
                continue;
            }
        };
        let limits = limits_for(spec);
        log::debug!(
            "Building agent '{}' on model '{}' (max_iter={}, max_execution_time={:?})",
            spec.role,
            llm.model(),
            limits.max_iter,
            limits.max_execution_time
        );
        let agent = Agent::new(&spec.role, &spec.goal, &spec.backstory, llm)
            .with_tools(tools.take(&ToolOwner::Agent(spec.role.clone())))
            .with_limits(limits)
            .with_code_execution(has_code_execution(spec));
        set.push(agent);
    }

    if issues.is_empty() {
        Ok(set)
    } else {
        Err(ConfigError::Schema(issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(tools: &[&str]) -> AgentSpec {
        AgentSpec {
            role: "Coder".into(),
            goal: "g".into(),
            backstory: "b".into(),
            tools: tools.iter().map(|t| ToolSpec::native(*t)).collect(),
            llm: None,
            max_iter: None,
            max_execution_time: None,
            max_rpm: None,
            allow_code_execution: false,
        }
    }

    #[test]
    fn test_code_execution_attaches_interpreter_and_tightens_limits() {
        let spec = AgentSpec {
            allow_code_execution: true,
            ..agent(&[])
        };
        let tools = effective_tools(&spec);
        assert_eq!(tools, vec![ToolSpec::native(CODE_INTERPRETER_TOOL)]);

        let limits = limits_for(&spec);
        assert_eq!(limits.max_iter, CODE_EXECUTION_MAX_ITER);
        assert_eq!(limits.max_execution_time, Some(CODE_EXECUTION_MAX_TIME));
    }

    #[test]
    fn test_explicit_limits_override_code_defaults() {
        let spec = AgentSpec {
            allow_code_execution: true,
            max_iter: Some(12),
            max_execution_time: Some(30),
            ..agent(&[CODE_INTERPRETER_TOOL])
        };
        assert_eq!(effective_tools(&spec).len(), 1);
        let limits = limits_for(&spec);
        assert_eq!(limits.max_iter, 12);
        assert_eq!(limits.max_execution_time, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_plain_agent_gets_default_limits() {
        let spec = agent(&["search"]);
        assert!(!has_code_execution(&spec));
        assert_eq!(effective_tools(&spec).len(), 1);
        assert_eq!(limits_for(&spec), AgentLimits::default());
    }
}
