//! Crew assembly: subsets, ordering, process resolution and memory.

use std::sync::Arc;

use crate::agent::Agent;
use crate::crew::Crew;
use crate::crews::sort_tasks_by_execution_number;
use crate::memory::{resolve_embedder, EmbedderProvider};
use crate::process::Process;
use crate::spec::CrewSpec;
use crate::task::Task;

use super::agents::AgentSet;
use super::tasks::TaskSet;

/// Assemble one crew from the globally built agents and tasks.
///
/// Never fails: unknown references are dropped and a hierarchical crew
/// without a usable manager runs sequentially.
pub fn assemble_crew(
    spec: &CrewSpec,
    agents: &AgentSet,
    tasks: &TaskSet,
    embedders: Option<&dyn EmbedderProvider>,
) -> Crew {
    let mut pool: Vec<Arc<Agent>> = Vec::with_capacity(spec.agents.len());
    for role in &spec.agents {
        match agents.get(role) {
            Some(agent) => pool.push(agent.clone()),
            None => log::debug!("Crew '{}' drops unknown agent '{}'", spec.name, role),
        }
    }

    let mut crew_tasks: Vec<Task> = Vec::with_capacity(spec.tasks.len());
    for name in &spec.tasks {
        match tasks.get(name) {
            Some(task) => crew_tasks.push(task.clone()),
            None => log::debug!("Crew '{}' drops unknown task '{}'", spec.name, name),
        }
    }
    sort_tasks_by_execution_number(&mut crew_tasks);

    let (process, manager) = match spec.process {
        Process::Sequential => (Process::Sequential, None),
        Process::Hierarchical => {
            let position = spec
                .manager
                .as_deref()
                .and_then(|role| pool.iter().position(|a| a.role == role));
            match position {
                Some(i) => (Process::Hierarchical, Some(pool.remove(i))),
                None => {
                    log::warn!(
                        "Crew '{}' is hierarchical but manager {:?} is not among its agents; running sequentially",
                        spec.name,
                        spec.manager
                    );
                    (Process::Sequential, None)
                }
            }
        }
    };

    let embedder = spec
        .memory
        .then(|| resolve_embedder(embedders, &spec.name));

    let crew = Crew {
        name: spec.name.clone(),
        agents: pool,
        tasks: crew_tasks,
        process,
        manager,
        embedder,
    };
    log::debug!("Assembled {:?} (key {})", crew, crew.key());
    crew
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::core::tests::ScriptedModel;
    use crate::builder::{agents::build_agents, tasks::build_tasks};
    use crate::llm::{ChatModel, ModelProvider};
    use crate::spec::{AgentSpec, LlmSpec, OrchestrationType, TaskSpec};
    use crate::tools::ResolvedTools;

    struct Scripted;

    impl ModelProvider for Scripted {
        fn model_for(&self, _: Option<&LlmSpec>) -> anyhow::Result<Arc<dyn ChatModel>> {
            Ok(ScriptedModel::new(&[]))
        }
    }

    fn fixtures() -> (AgentSet, TaskSet) {
        let agents: Vec<AgentSpec> = ["Lead", "Writer"]
            .iter()
            .map(|role| AgentSpec {
                role: role.to_string(),
                goal: "g".into(),
                backstory: "b".into(),
                tools: Vec::new(),
                llm: None,
                max_iter: None,
                max_execution_time: None,
                max_rpm: None,
                allow_code_execution: false,
            })
            .collect();
        let tasks: Vec<TaskSpec> = [("b", Some(2)), ("a", Some(1)), ("c", None)]
            .iter()
            .map(|(name, n)| TaskSpec {
                name: name.to_string(),
                description: "d".into(),
                expected_output: "e".into(),
                agent: Some("Writer".into()),
                tools: Vec::new(),
                context: Vec::new(),
                execution_number: *n,
                async_execution: false,
            })
            .collect();
        let mut tools = ResolvedTools::default();
        let agents = build_agents(&agents, &mut tools, &Scripted).unwrap();
        let tasks = build_tasks(&tasks, &agents, &mut tools, OrchestrationType::Crew).unwrap();
        (agents, tasks)
    }

    fn crew_spec(process: Process, manager: Option<&str>, agents: &[&str]) -> CrewSpec {
        CrewSpec {
            name: "main".into(),
            agents: agents.iter().map(|s| s.to_string()).collect(),
            tasks: vec!["b".into(), "ghost".into(), "c".into(), "a".into()],
            process,
            manager: manager.map(str::to_string),
            memory: false,
        }
    }

    #[test]
    fn test_subsets_are_intersected_and_sorted() {
        let (agents, tasks) = fixtures();
        let spec = crew_spec(Process::Sequential, None, &["Writer", "Phantom"]);
        let crew = assemble_crew(&spec, &agents, &tasks, None);
        assert_eq!(crew.task_names(), vec!["a", "b", "c"]);
        assert_eq!(crew.agents.len(), 1);
        assert!(crew.embedder.is_none());
    }

    #[test]
    fn test_manager_leaves_the_pool() {
        let (agents, tasks) = fixtures();
        let spec = crew_spec(Process::Hierarchical, Some("Lead"), &["Lead", "Writer"]);
        let crew = assemble_crew(&spec, &agents, &tasks, None);
        assert_eq!(crew.process, Process::Hierarchical);
        assert_eq!(crew.manager.as_ref().unwrap().role, "Lead");
        assert!(crew.agents.iter().all(|a| a.role != "Lead"));
    }

    #[test]
    fn test_manager_outside_subset_degrades_to_sequential() {
        let (agents, tasks) = fixtures();
        let spec = crew_spec(Process::Hierarchical, Some("Lead"), &["Writer"]);
        let crew = assemble_crew(&spec, &agents, &tasks, None);
        assert_eq!(crew.process, Process::Sequential);
        assert!(crew.manager.is_none());

        let spec = crew_spec(Process::Hierarchical, None, &["Writer", "Lead"]);
        let crew = assemble_crew(&spec, &agents, &tasks, None);
        assert_eq!(crew.process, Process::Sequential);
        assert_eq!(crew.agents.len(), 2);
    }

    #[test]
    fn test_memory_falls_back_to_default_embedder() {
        let (agents, tasks) = fixtures();
        let spec = CrewSpec {
            memory: true,
            ..crew_spec(Process::Sequential, None, &["Writer"])
        };
        let crew = assemble_crew(&spec, &agents, &tasks, None);
        assert!(crew.embedder.is_some());
    }
}
