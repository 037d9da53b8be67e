//! Step executor for flow graphs.
//!
//! Walks a [`FlowGraph`] from its start steps. A listener runs once its
//! predecessors satisfy its join (AND: all completed, OR: any completed). A
//! router runs its crew, if any, then reads its condition field and triggers
//! the matching route; its other route targets are not triggered by it.
//! Every step runs at most once per run.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde_json::Value;

use super::graph::{FlowGraph, FlowStep, StepAction, StepKind};
use super::persistence::{persist_state, FlowPersistence};
use super::state::FlowState;
use crate::crew::Crew;
use crate::spec::JoinLogic;
use crate::utilities::errors::ExecutionError;

/// Separator used by `finalize` when concatenating crew results.
pub const RESULT_SEPARATOR: &str = "\n\n";

/// Result of one flow run.
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    pub state: FlowState,
    /// Steps in the order they ran.
    pub executed: Vec<String>,
    /// Output of the last step that produced one.
    pub output: String,
}

/// Runs a flow graph over a set of assembled crews.
#[derive(Debug)]
pub struct FlowExecutor {
    graph: FlowGraph,
    crews: HashMap<String, Crew>,
    persistence: Option<Arc<dyn FlowPersistence>>,
}

impl FlowExecutor {
    pub fn new(graph: FlowGraph, crews: impl IntoIterator<Item = Crew>) -> Self {
        Self {
            graph,
            crews: crews.into_iter().map(|c| (c.name.clone(), c)).collect(),
            persistence: None,
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn FlowPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn crew(&self, name: &str) -> Option<&Crew> {
        self.crews.get(name)
    }

    /// Run the flow from its start steps with `state` as the initial state.
    ///
    /// Crews receive `inputs` overlaid with the current state fields, so a
    /// field written by an earlier step can fill a later task's placeholder.
    pub async fn run(
        &self,
        inputs: &HashMap<String, String>,
        mut state: FlowState,
    ) -> Result<FlowOutcome, ExecutionError> {
        log::info!("Flow '{}' starting (state id {})", self.graph.name, state.id);

        let mut queue: VecDeque<String> = self
            .graph
            .starts()
            .into_iter()
            .map(|s| s.name.clone())
            .collect();
        let mut done: HashSet<String> = HashSet::new();
        let mut executed = Vec::new();
        let mut output = String::new();

        while let Some(name) = queue.pop_front() {
            if done.contains(&name) {
                continue;
            }
            let step = self.graph.step(&name).ok_or_else(|| ExecutionError::FlowStep {
                step: name.clone(),
                message: "step is not part of the graph".to_string(),
            })?;

            log::debug!("Flow step '{}' starting", step.name);
            if let Some(produced) = self.run_step(step, inputs, &mut state).await? {
                output = produced;
            }
            done.insert(step.name.clone());
            executed.push(step.name.clone());
            state.mark_completed(&step.name);
            self.persist(step, &state, &output);
            log::debug!("Flow step '{}' finished", step.name);

            let mut suppressed: Vec<&str> = Vec::new();
            if let StepKind::Router {
                condition, routes, ..
            } = &step.kind
            {
                let outcome = state.is_truthy(condition);
                let branch = if outcome { &routes.on_true } else { &routes.on_false };
                let chosen = branch.as_ref().or(routes.default.as_ref());
                log::debug!(
                    "Router '{}' read '{}' as {} and chose {:?}",
                    step.name,
                    condition,
                    outcome,
                    chosen
                );
                suppressed = routes.targets();
                if let Some(target) = chosen {
                    suppressed.retain(|t| *t != target.as_str());
                    queue.push_back(target.clone());
                }
            }

            for listener in self.graph.listeners_of(&step.name) {
                if done.contains(&listener.name)
                    || queue.contains(&listener.name)
                    || suppressed.contains(&listener.name.as_str())
                {
                    continue;
                }
                let (after, logic) = listener.trigger();
                let ready = match logic {
                    JoinLogic::And => after.iter().all(|p| done.contains(p)),
                    JoinLogic::Or => true,
                };
                if ready {
                    queue.push_back(listener.name.clone());
                }
            }
        }

        log::info!(
            "Flow '{}' finished after {} step(s)",
            self.graph.name,
            executed.len()
        );
        Ok(FlowOutcome {
            state,
            executed,
            output,
        })
    }

    async fn run_step(
        &self,
        step: &FlowStep,
        inputs: &HashMap<String, String>,
        state: &mut FlowState,
    ) -> Result<Option<String>, ExecutionError> {
        let failed = |message: String| ExecutionError::FlowStep {
            step: step.name.clone(),
            message,
        };
        match &step.action {
            StepAction::RunCrew(name) => {
                let crew = self
                    .crews
                    .get(name)
                    .ok_or_else(|| failed(format!("unknown crew '{}'", name)))?;
                let result = crew
                    .kickoff(&crew_inputs(inputs, state))
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                state.results.push(result.raw.clone());
                if let Some(field) = &step.output {
                    state
                        .set_from_text(field, &result.raw)
                        .map_err(|reason| failed(format!("cannot store output in '{}': {}", field, reason)))?;
                }
                Ok(Some(result.raw))
            }
            StepAction::Finalize => Ok(Some(state.results.join(RESULT_SEPARATOR))),
            StepAction::Noop => Ok(None),
        }
    }

    fn persist(&self, step: &FlowStep, state: &FlowState, output: &str) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let mut record = state.to_value();
        if step.action == StepAction::Finalize {
            if let Value::Object(map) = &mut record {
                map.insert("output".into(), Value::String(output.to_string()));
            }
        }
        persist_state(persistence.as_ref(), &state.id, &step.name, &record);
    }
}

fn crew_inputs(inputs: &HashMap<String, String>, state: &FlowState) -> HashMap<String, String> {
    let mut merged = inputs.clone();
    for (key, value) in &state.fields {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        merged.insert(key.clone(), text);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::core::tests::ScriptedModel;
    use crate::agent::Agent;
    use crate::flow::graph::default_chain;
    use crate::flow::persistence::InMemoryFlowPersistence;
    use crate::process::Process;
    use crate::spec::{RouteTable, StateFieldSpec, StateFieldType};
    use crate::task::Task;

    fn crew(name: &str, answers: &[&str]) -> Crew {
        let agent = Arc::new(Agent::new("R", "g", "b", ScriptedModel::new(answers)));
        let mut task = Task::new(format!("{}_task", name), "Work on {topic}", "text");
        task.agent = Some("R".into());
        Crew {
            name: name.into(),
            agents: vec![agent],
            tasks: vec![task],
            process: Process::Sequential,
            manager: None,
            embedder: None,
        }
    }

    fn step(name: &str, kind: StepKind, crew: Option<&str>, output: Option<&str>) -> FlowStep {
        FlowStep {
            name: name.into(),
            kind,
            action: crew
                .map(|c| StepAction::RunCrew(c.into()))
                .unwrap_or(StepAction::Noop),
            output: output.map(str::to_string),
        }
    }

    fn listen(after: &[&str], logic: JoinLogic) -> StepKind {
        StepKind::Listen {
            after: after.iter().map(|s| s.to_string()).collect(),
            logic,
        }
    }

    fn state_for(graph: &FlowGraph, fields: &[StateFieldSpec]) -> FlowState {
        FlowState::new(fields, graph.step_names(), None)
    }

    #[tokio::test]
    async fn test_default_chain_runs_in_order_and_finalizes() {
        let graph = FlowGraph::new("chain", default_chain(["A", "B", "C"]));
        let persistence = Arc::new(InMemoryFlowPersistence::new());
        let executor = FlowExecutor::new(
            graph.clone(),
            vec![
                crew("A", &["Final Answer: a"]),
                crew("B", &["Final Answer: b"]),
                crew("C", &["Final Answer: c"]),
            ],
        )
        .with_persistence(persistence.clone());

        let outcome = executor
            .run(&HashMap::new(), state_for(&graph, &[]))
            .await
            .unwrap();
        assert_eq!(outcome.executed, vec!["run_A", "run_B", "run_C", "finalize"]);
        assert_eq!(outcome.output, "a\n\nb\n\nc");
        assert!(outcome.state.is_completed("finalize"));

        let id = outcome.state.id.clone();
        assert_eq!(
            persistence.methods(&id),
            vec!["run_A", "run_B", "run_C", "finalize"]
        );
        let last = persistence.load_state(&id).unwrap().unwrap();
        assert_eq!(last["output"], "a\n\nb\n\nc");
        assert_eq!(last["results"][1], "b");
    }

    #[tokio::test]
    async fn test_router_follows_condition() {
        let graph = FlowGraph::new(
            "review",
            vec![
                step("begin", StepKind::Start, Some("main"), Some("approved")),
                step(
                    "review",
                    StepKind::Router {
                        after: vec!["begin".into()],
                        logic: JoinLogic::And,
                        condition: "approved".into(),
                        routes: RouteTable {
                            on_true: Some("publish".into()),
                            on_false: Some("revise".into()),
                            default: None,
                        },
                    },
                    None,
                    None,
                ),
                step("publish", listen(&["review"], JoinLogic::And), Some("pub"), None),
                step("revise", listen(&["review"], JoinLogic::And), Some("rev"), None),
                step("audit", listen(&["review"], JoinLogic::And), None, None),
            ],
        );
        let fields = vec![StateFieldSpec {
            name: "approved".into(),
            field_type: StateFieldType::Boolean,
            default: None,
        }];
        let executor = FlowExecutor::new(
            graph.clone(),
            vec![
                crew("main", &["Final Answer: yes"]),
                crew("pub", &["Final Answer: published"]),
                crew("rev", &[]),
            ],
        );
        let outcome = executor
            .run(&HashMap::new(), state_for(&graph, &fields))
            .await
            .unwrap();
        assert_eq!(outcome.executed, vec!["begin", "review", "publish", "audit"]);
        assert_eq!(outcome.output, "published");
        assert!(!outcome.state.is_completed("revise"));
        assert_eq!(outcome.state.get("approved"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_and_waits_for_all_or_fires_once() {
        let graph = FlowGraph::new(
            "joins",
            vec![
                step("left", StepKind::Start, None, None),
                step("right", StepKind::Start, None, None),
                step("both", listen(&["left", "right"], JoinLogic::And), None, None),
                step("either", listen(&["left", "right"], JoinLogic::Or), None, None),
            ],
        );
        let executor = FlowExecutor::new(graph.clone(), Vec::new());
        let outcome = executor
            .run(&HashMap::new(), state_for(&graph, &[]))
            .await
            .unwrap();
        assert_eq!(outcome.executed, vec!["left", "right", "either", "both"]);
    }

    #[tokio::test]
    async fn test_state_fields_fill_crew_placeholders() {
        let graph = FlowGraph::new("topic", vec![step("only", StepKind::Start, Some("main"), None)]);
        let model = ScriptedModel::new(&["Final Answer: done"]);
        let agent = Arc::new(Agent::new("R", "g", "b", model.clone()));
        let mut main = crew("main", &[]);
        main.agents = vec![agent];
        let fields = vec![StateFieldSpec {
            name: "topic".into(),
            field_type: StateFieldType::Text,
            default: Some(Value::String("rust".into())),
        }];
        FlowExecutor::new(graph.clone(), vec![main])
            .run(&HashMap::new(), state_for(&graph, &fields))
            .await
            .unwrap();
        let seen = model.seen.lock();
        assert!(seen[0].last().unwrap().content.starts_with("Work on rust"));
    }

    #[tokio::test]
    async fn test_crew_failure_names_the_step() {
        let graph = FlowGraph::new("broken", default_chain(["A"]));
        let executor = FlowExecutor::new(graph.clone(), vec![crew("A", &[])]);
        let err = executor
            .run(&HashMap::new(), state_for(&graph, &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::FlowStep { ref step, .. } if step == "run_A"));
    }
}
