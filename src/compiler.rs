//! The compile pipeline: parse, validate, gate tools, build, then run.
//!
//! A [`WorkflowCompiler`] owns the injected collaborators (tool resolver,
//! model provider, optional embedder provider). It holds no per-run state,
//! so one compiler serves every concurrent run.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Map, Value};

use crate::builder::{build, BuildContext};
use crate::crew::Crew;
use crate::flow::{FlowExecutor, FlowGraph, FlowPersistence, FlowState};
use crate::llm::ModelProvider;
use crate::memory::EmbedderProvider;
use crate::spec::{parse, validate, OrchestrationType, StateFieldSpec, WorkflowSpec};
use crate::tools::ToolResolver;
use crate::utilities::errors::{BuildResult, ConfigError, ExecutionError};

/// A compiled flow, ready to run.
#[derive(Debug)]
pub struct CompiledFlow {
    pub executor: FlowExecutor,
    pub state: Vec<StateFieldSpec>,
}

/// Executable unit(s) produced from one document.
#[derive(Debug)]
pub enum CompiledWorkflow {
    /// Independent crews, run in parallel.
    Crews(Vec<Crew>),
    Flow(CompiledFlow),
}

impl CompiledWorkflow {
    pub fn orchestration_type(&self) -> OrchestrationType {
        match self {
            CompiledWorkflow::Crews(_) => OrchestrationType::Crew,
            CompiledWorkflow::Flow(_) => OrchestrationType::Flow,
        }
    }
}

/// Compiles and runs workflow documents.
#[derive(Clone)]
pub struct WorkflowCompiler {
    resolver: Arc<dyn ToolResolver>,
    models: Arc<dyn ModelProvider>,
    embedders: Option<Arc<dyn EmbedderProvider>>,
}

impl std::fmt::Debug for WorkflowCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowCompiler")
            .field("embedders", &self.embedders.is_some())
            .finish_non_exhaustive()
    }
}

impl WorkflowCompiler {
    pub fn new(resolver: Arc<dyn ToolResolver>, models: Arc<dyn ModelProvider>) -> Self {
        Self {
            resolver,
            models,
            embedders: None,
        }
    }

    pub fn with_embedders(mut self, embedders: Arc<dyn EmbedderProvider>) -> Self {
        self.embedders = Some(embedders);
        self
    }

    /// Parse and validate only. Makes no collaborator calls.
    pub fn check(&self, text: &str, kind: Option<&str>) -> Result<WorkflowSpec, ConfigError> {
        let parsed = parse(text, kind)?;
        validate(&parsed)
    }

    /// Full compile. Nothing is built unless every tool passes the gate.
    pub async fn compile(&self, text: &str, kind: Option<&str>) -> BuildResult<CompiledWorkflow> {
        let spec = self.check(text, kind)?;
        let ctx = BuildContext {
            resolver: self.resolver.as_ref(),
            models: self.models.as_ref(),
            embedders: self.embedders.as_deref(),
        };
        let built = build(&spec, ctx).await?;

        let compiled = match spec.orchestration_type {
            OrchestrationType::Crew => CompiledWorkflow::Crews(built.crews),
            OrchestrationType::Flow => {
                let graph = FlowGraph::from_spec(&spec);
                log::debug!(
                    "Flow '{}' compiled with {} steps",
                    graph.name,
                    graph.steps().len()
                );
                CompiledWorkflow::Flow(CompiledFlow {
                    executor: FlowExecutor::new(graph, built.crews),
                    state: spec.state,
                })
            }
        };
        Ok(compiled)
    }

    /// Run a compiled workflow to completion and return its result payload.
    ///
    /// Crews yield `{crew_name: raw_output}`. Flows yield
    /// `{output, state, steps}`.
    pub async fn run(
        &self,
        compiled: CompiledWorkflow,
        inputs: &HashMap<String, String>,
        workflow_id: Option<String>,
        persistence: Option<Arc<dyn FlowPersistence>>,
    ) -> Result<Value, ExecutionError> {
        match compiled {
            CompiledWorkflow::Crews(crews) => run_crews(&crews, inputs).await,
            CompiledWorkflow::Flow(flow) => {
                let mut executor = flow.executor;
                if let Some(persistence) = persistence {
                    executor = executor.with_persistence(persistence);
                }
                let state = FlowState::new(&flow.state, executor.graph().step_names(), workflow_id);
                let outcome = executor.run(inputs, state).await?;
                Ok(json!({
                    "output": outcome.output,
                    "state": outcome.state.to_value(),
                    "steps": outcome.executed,
                }))
            }
        }
    }

    /// Compile then run. Build errors surface as [`BuildError`](crate::utilities::errors::BuildError).
    pub async fn compile_and_run(
        &self,
        text: &str,
        kind: Option<&str>,
        inputs: &HashMap<String, String>,
        workflow_id: Option<String>,
        persistence: Option<Arc<dyn FlowPersistence>>,
    ) -> BuildResult<Value> {
        let compiled = self.compile(text, kind).await?;
        Ok(self.run(compiled, inputs, workflow_id, persistence).await?)
    }
}

/// Fan out every crew, fan back in. Any failure fails the whole run.
async fn run_crews(
    crews: &[Crew],
    inputs: &HashMap<String, String>,
) -> Result<Value, ExecutionError> {
    let results = join_all(crews.iter().map(|crew| crew.kickoff(inputs))).await;

    let mut payload = Map::new();
    let mut failures = Vec::new();
    for (crew, result) in crews.iter().zip(results) {
        match result {
            Ok(output) => {
                payload.insert(crew.name.clone(), Value::String(output.raw));
            }
            Err(e) => {
                log::error!("Crew '{}' failed: {}", crew.name, e);
                failures.push(e.to_string());
            }
        }
    }

    if failures.is_empty() {
        Ok(Value::Object(payload))
    } else {
        Err(ExecutionError::Other(failures.join("; ")))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::{ChatMessage, ChatModel};
    use crate::spec::LlmSpec;
    use crate::tools::{StaticToolServer, ToolRegistry};
    use crate::utilities::errors::BuildError;
    use async_trait::async_trait;

    /// Answers every prompt with the first line of the user message.
    pub(crate) struct EchoModel;

    #[async_trait]
    impl ChatModel for EchoModel {
        fn model(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
            let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
            let first = last.lines().next().unwrap_or("");
            if first.contains("explode") {
                anyhow::bail!("model refused");
            }
            Ok(format!("Final Answer: done {}", first))
        }
    }

    pub(crate) struct EchoProvider;

    impl ModelProvider for EchoProvider {
        fn model_for(&self, _spec: Option<&LlmSpec>) -> anyhow::Result<Arc<dyn ChatModel>> {
            Ok(Arc::new(EchoModel))
        }
    }

    pub(crate) fn compiler() -> WorkflowCompiler {
        let registry = ToolRegistry::new().with_servers(Arc::new(StaticToolServer::new()));
        WorkflowCompiler::new(Arc::new(registry), Arc::new(EchoProvider))
    }

    pub(crate) const TWO_CREWS: &str = r#"
orchestration_type: crew
agents:
  - { role: Writer, goal: Write, backstory: Writes }
tasks:
  - { name: first, description: "About {user_input}", expected_output: Text, agent: Writer }
  - { name: second, description: "More on {user_input}", expected_output: Text, agent: Writer }
crews:
  - { name: alpha, agents: [Writer], tasks: [first] }
  - { name: beta, agents: [Writer], tasks: [second] }
"#;

    fn inputs(topic: &str) -> HashMap<String, String> {
        HashMap::from([("user_input".to_string(), topic.to_string())])
    }

    #[test]
    fn test_check_reports_orchestration() {
        let spec = compiler().check(TWO_CREWS, None).unwrap();
        assert_eq!(spec.orchestration_type, OrchestrationType::Crew);
        assert_eq!(spec.crews.len(), 2);
    }

    #[test]
    fn test_check_rejects_bad_documents() {
        let err = compiler().check("agents: []\n", None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingOrchestrationType));
    }

    #[tokio::test]
    async fn test_parallel_crews_keyed_by_name() {
        let compiler = compiler();
        let result = compiler
            .compile_and_run(TWO_CREWS, None, &inputs("rust"), None, None)
            .await
            .unwrap();
        assert_eq!(result["alpha"], json!("done About rust"));
        assert_eq!(result["beta"], json!("done More on rust"));
    }

    #[tokio::test]
    async fn test_crew_failure_names_the_crew() {
        let text = TWO_CREWS.replace("More on {user_input}", "explode {user_input}");
        let err = compiler()
            .compile_and_run(&text, None, &inputs("rust"), None, None)
            .await
            .unwrap_err();
        match err {
            BuildError::Execution(e) => assert!(e.to_string().contains("beta")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_server_fails_before_building() {
        let text = TWO_CREWS.replace(
            "{ role: Writer, goal: Write, backstory: Writes }",
            "{ role: Writer, goal: Write, backstory: Writes, tools: [{ type: server, server: nowhere }] }",
        );
        let err = compiler().compile(&text, None).await.unwrap_err();
        assert_eq!(err.kind(), "connectivity");
    }

    #[tokio::test]
    async fn test_flow_unknown_agent_is_config_even_with_unreachable_tools() {
        let text = r#"
orchestration_type: flow
agents:
  - { role: Writer, goal: Write, backstory: Writes, tools: [{ type: server, server: nowhere }] }
tasks:
  - { name: draft, description: Draft, expected_output: Text, agent: Ghost }
crews:
  - { name: main, agents: [Writer], tasks: [draft] }
"#;
        let err = compiler().compile(text, None).await.unwrap_err();
        assert_eq!(err.kind(), "config");
        match err {
            BuildError::Config(e) => assert_eq!(e.failed_sections(), vec!["tasks"]),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_flow_result_carries_state_and_steps() {
        let text = r#"
orchestration_type: flow
name: pipeline
agents:
  - { role: Writer, goal: Write, backstory: Writes }
tasks:
  - { name: draft, description: "Draft {user_input}", expected_output: Text, agent: Writer }
crews:
  - { name: main, agents: [Writer], tasks: [draft] }
state:
  topic: { type: text, default: "rust" }
"#;
        let compiler = compiler();
        let compiled = compiler.compile(text, None).await.unwrap();
        assert_eq!(compiled.orchestration_type(), OrchestrationType::Flow);

        let result = compiler
            .run(compiled, &inputs("flows"), Some("wf-1".into()), None)
            .await
            .unwrap();
        assert_eq!(result["steps"], json!(["run_main", "finalize"]));
        assert_eq!(result["output"], json!("done Draft flows"));
        assert_eq!(result["state"]["workflow_id"], json!("wf-1"));
        assert_eq!(result["state"]["topic"], json!("rust"));
    }
}
