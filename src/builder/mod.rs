//! Turns a validated [`WorkflowSpec`] into runtime agents, tasks and crews.
//!
//! Building is all-or-nothing. Every declared tool is resolved and validated
//! first; if anything fails, the aggregated error is returned and no agent,
//! task or crew is constructed.

pub mod agents;
pub mod crews;
pub mod tasks;

use crate::crew::Crew;
use crate::llm::ModelProvider;
use crate::memory::EmbedderProvider;
use crate::spec::WorkflowSpec;
use crate::tools::{resolve_and_validate, ToolOwner, ToolRequest, ToolResolver};
use crate::utilities::errors::BuildResult;

pub use agents::{build_agents, effective_tools, limits_for, AgentSet};
pub use crews::assemble_crew;
pub use tasks::{build_tasks, TaskSet};

/// Collaborators a build needs.
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    pub resolver: &'a dyn ToolResolver,
    pub models: &'a dyn ModelProvider,
    pub embedders: Option<&'a dyn EmbedderProvider>,
}

/// Everything built from one document.
#[derive(Debug)]
pub struct BuiltWorkflow {
    pub agents: AgentSet,
    pub tasks: TaskSet,
    /// Crews in declaration order.
    pub crews: Vec<Crew>,
}

impl BuiltWorkflow {
    pub fn crew(&self, name: &str) -> Option<&Crew> {
        self.crews.iter().find(|c| c.name == name)
    }
}

/// Tool requests for every agent and task in the document.
pub fn tool_requests(spec: &WorkflowSpec) -> Vec<ToolRequest> {
    let agents = spec.agents.iter().map(|a| ToolRequest {
        owner: ToolOwner::Agent(a.role.clone()),
        specs: effective_tools(a),
    });
    let tasks = spec.tasks.iter().map(|t| ToolRequest {
        owner: ToolOwner::Task(t.name.clone()),
        specs: t.tools.clone(),
    });
    agents.chain(tasks).filter(|r| !r.specs.is_empty()).collect()
}

/// Gate, then build agents, tasks and crews.
pub async fn build(spec: &WorkflowSpec, ctx: BuildContext<'_>) -> BuildResult<BuiltWorkflow> {
    let mut tools = resolve_and_validate(ctx.resolver, tool_requests(spec)).await?;
    log::debug!(
        "Tool gate passed for '{}': {} capabilities",
        spec.display_name(),
        tools.total()
    );

    let agents = build_agents(&spec.agents, &mut tools, ctx.models)?;
    let tasks = build_tasks(&spec.tasks, &agents, &mut tools, spec.orchestration_type)?;
    let crews = spec
        .crews
        .iter()
        .map(|c| assemble_crew(c, &agents, &tasks, ctx.embedders))
        .collect();

    Ok(BuiltWorkflow {
        agents,
        tasks,
        crews,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::agent::core::tests::ScriptedModel;
    use crate::llm::ChatModel;
    use crate::spec::{parse, validate, LlmSpec};
    use crate::tools::{Capability, FunctionTool, ToolError, ToolRegistry};
    use crate::utilities::errors::BuildError;

    struct Scripted;

    impl ModelProvider for Scripted {
        fn model_for(&self, _: Option<&LlmSpec>) -> anyhow::Result<Arc<dyn ChatModel>> {
            Ok(ScriptedModel::new(&["Final Answer: ok"]))
        }
    }

    #[derive(Debug)]
    struct Offline(&'static str);

    #[async_trait]
    impl Capability for Offline {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "unreachable"
        }
        async fn validate(&self) -> Result<(), ToolError> {
            Err(ToolError::Connectivity(format!("{} is offline", self.0)))
        }
        async fn invoke(&self, _: Value) -> Result<Value, ToolError> {
            Ok(Value::Null)
        }
    }

    const DOC: &str = r#"
orchestration_type: crew
agents:
  - role: Researcher
    goal: Find facts
    backstory: Analyst
    tools: [search, weather]
  - role: Coder
    goal: Compute
    backstory: Engineer
    allow_code_execution: true
tasks:
  - name: research
    description: Research {user_input}
    expected_output: Facts
    agent: Researcher
    tools: [stocks]
crew:
  name: main
  agents: [Researcher, Coder]
  tasks: [research]
"#;

    fn registry() -> ToolRegistry {
        ToolRegistry::new()
            .with_native("search", |_| {
                Ok(FunctionTool::new("search", "Search", |_| Ok(json!("hits"))).into_ref())
            })
            .with_native("code_interpreter", |_| {
                Ok(FunctionTool::new("code_interpreter", "Run code", |_| Ok(json!(0))).into_ref())
            })
            .with_native("weather", |_| Ok(Arc::new(Offline("weather")) as Arc<dyn Capability>))
            .with_native("stocks", |_| Ok(Arc::new(Offline("stocks")) as Arc<dyn Capability>))
    }

    fn ctx<'a>(resolver: &'a ToolRegistry) -> BuildContext<'a> {
        BuildContext {
            resolver,
            models: &Scripted,
            embedders: None,
        }
    }

    #[tokio::test]
    async fn test_any_failing_tool_aborts_with_all_failures() {
        let spec = validate(&parse(DOC, None).unwrap()).unwrap();
        let registry = registry();
        let err = build(&spec, ctx(&registry)).await.unwrap_err();
        match err {
            BuildError::Connectivity(e) => {
                let tools: Vec<&str> = e.failures.iter().map(|f| f.tool.as_str()).collect();
                assert_eq!(e.failures.len(), 2);
                assert!(tools.contains(&"weather"));
                assert!(tools.contains(&"stocks"));
            }
            other => panic!("expected connectivity error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_successful_build_wires_everything() {
        let doc = DOC.replace("tools: [search, weather]", "tools: [search]").replace("    tools: [stocks]\n", "");
        let spec = validate(&parse(&doc, None).unwrap()).unwrap();
        let registry = registry();
        let built = build(&spec, ctx(&registry)).await.unwrap();

        assert_eq!(built.agents.get("Researcher").unwrap().tool_names(), vec!["search"]);
        let coder = built.agents.get("Coder").unwrap();
        assert_eq!(coder.tool_names(), vec!["code_interpreter"]);
        assert_eq!(coder.limits.max_iter, crate::agent::CODE_EXECUTION_MAX_ITER);

        let crew = built.crew("main").unwrap();
        assert_eq!(crew.task_names(), vec!["research"]);
        assert_eq!(crew.agents.len(), 2);
    }
}
