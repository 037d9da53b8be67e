//! Runtime crew: a group of agents running an ordered list of tasks.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use md5::{Digest, Md5};
use tokio::task::AbortHandle;

use crate::agent::Agent;
use crate::crews::crew_output::CrewOutput;
use crate::memory::{Embedder, ShortTermMemory};
use crate::process::Process;
use crate::task::Task;
use crate::tasks::task_output::TaskOutput;
use crate::utilities::errors::ExecutionError;

/// Memories recalled per task when crew memory is enabled.
const MEMORY_RECALL_LIMIT: usize = 3;

type PendingOutput = Shared<BoxFuture<'static, Result<TaskOutput, ExecutionError>>>;

/// Async tasks spawned by one kickoff. Dropping the set aborts any that are
/// still running, so a crew that fails early leaves nothing behind.
#[derive(Default)]
struct SpawnedTasks(Vec<AbortHandle>);

impl SpawnedTasks {
    fn track(&mut self, handle: AbortHandle) {
        self.0.push(handle);
    }
}

impl Drop for SpawnedTasks {
    fn drop(&mut self) {
        for handle in &self.0 {
            if !handle.is_finished() {
                handle.abort();
            }
        }
    }
}

/// An assembled crew ready to run.
#[derive(Clone)]
pub struct Crew {
    pub name: String,
    /// Regular agent pool. Never contains the manager.
    pub agents: Vec<Arc<Agent>>,
    /// Tasks in execution order.
    pub tasks: Vec<Task>,
    pub process: Process,
    /// Coordinator for hierarchical crews.
    pub manager: Option<Arc<Agent>>,
    /// Present when the crew has memory enabled.
    pub embedder: Option<Arc<dyn Embedder>>,
}

impl fmt::Debug for Crew {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let agents: Vec<&str> = self.agents.iter().map(|a| a.role.as_str()).collect();
        let tasks: Vec<&str> = self.tasks.iter().map(|t| t.name.as_str()).collect();
        f.debug_struct("Crew")
            .field("name", &self.name)
            .field("process", &self.process)
            .field("agents", &agents)
            .field("tasks", &tasks)
            .field("manager", &self.manager.as_ref().map(|m| m.role.as_str()))
            .field("memory", &self.embedder.is_some())
            .finish()
    }
}

impl Crew {
    /// MD5 fingerprint over agent roles and task keys.
    pub fn key(&self) -> String {
        let mut source: Vec<String> = self.agents.iter().map(|a| a.role.clone()).collect();
        if let Some(manager) = &self.manager {
            source.push(manager.role.clone());
        }
        for task in &self.tasks {
            source.push(format!("{}:{}", task.name, task.key()));
        }
        let mut hasher = Md5::new();
        hasher.update(source.join("|").as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    /// Run every task in order.
    ///
    /// A task with `async_execution` is spawned and the loop moves on; any
    /// later task that depends on it waits for it. A task with an empty
    /// `context` depends on every task before it. When a task fails, async
    /// tasks that are still running are aborted.
    pub async fn kickoff(
        &self,
        inputs: &HashMap<String, String>,
    ) -> Result<CrewOutput, ExecutionError> {
        log::info!(
            "Crew '{}' starting: {} task(s), {} process",
            self.name,
            self.tasks.len(),
            self.process
        );
        let inputs = Arc::new(inputs.clone());
        let memory = self
            .embedder
            .as_ref()
            .map(|e| Arc::new(ShortTermMemory::new(e.clone())));

        let mut done: HashMap<String, TaskOutput> = HashMap::new();
        let mut pending: HashMap<String, PendingOutput> = HashMap::new();
        let mut spawned = SpawnedTasks::default();

        for (position, task) in self.tasks.iter().enumerate() {
            let deps: Vec<String> = if task.context.is_empty() {
                self.tasks[..position].iter().map(|t| t.name.clone()).collect()
            } else {
                task.context.clone()
            };
            let agent = self.agent_for(task).map_err(|message| self.failed(message))?;

            if task.async_execution {
                let ready: Vec<TaskOutput> = deps.iter().filter_map(|d| done.get(d).cloned()).collect();
                let waiting: Vec<PendingOutput> =
                    deps.iter().filter_map(|d| pending.get(d).cloned()).collect();
                let name = task.name.clone();
                let owned = task.clone();
                let inputs = inputs.clone();
                let memory = memory.clone();
                let order = deps.clone();
                let handle = tokio::spawn(async move {
                    let mut context = ready;
                    for waiter in waiting {
                        context.push(waiter.await?);
                    }
                    context.sort_by_key(|o| order.iter().position(|n| n == &o.name));
                    run_task(owned, agent, inputs, context, memory).await
                });
                spawned.track(handle.abort_handle());
                let joined_name = name.clone();
                let shared = async move {
                    handle.await.map_err(|e| ExecutionError::Task {
                        task: joined_name,
                        message: format!("task panicked or was cancelled: {}", e),
                    })?
                }
                .boxed()
                .shared();
                log::debug!("Task '{}' dispatched asynchronously", name);
                pending.insert(name, shared);
                continue;
            }

            let mut context = Vec::with_capacity(deps.len());
            for dep in &deps {
                if let Some(output) = self.settle(dep, &mut done, &mut pending).await? {
                    context.push(output);
                }
            }
            let output = run_task(task.clone(), agent, inputs.clone(), context, memory.clone())
                .await
                .map_err(|e| self.failed(e.to_string()))?;
            done.insert(task.name.clone(), output);
        }

        let names: Vec<String> = pending.keys().cloned().collect();
        for name in names {
            self.settle(&name, &mut done, &mut pending).await?;
        }

        let outputs: Vec<TaskOutput> = self
            .tasks
            .iter()
            .filter_map(|t| done.remove(&t.name))
            .collect();
        log::info!("Crew '{}' finished", self.name);
        Ok(CrewOutput::new(self.name.clone(), outputs))
    }

    /// Output of `name`, waiting for it if it is still running.
    async fn settle(
        &self,
        name: &str,
        done: &mut HashMap<String, TaskOutput>,
        pending: &mut HashMap<String, PendingOutput>,
    ) -> Result<Option<TaskOutput>, ExecutionError> {
        if let Some(output) = done.get(name) {
            return Ok(Some(output.clone()));
        }
        match pending.remove(name) {
            Some(waiter) => {
                let output = waiter.await.map_err(|e| self.failed(e.to_string()))?;
                done.insert(name.to_string(), output.clone());
                Ok(Some(output))
            }
            // Context outside this crew.
            None => Ok(None),
        }
    }

    /// The agent that runs `task` under this crew's process.
    fn agent_for(&self, task: &Task) -> Result<Arc<Agent>, String> {
        let assigned = task
            .agent
            .as_deref()
            .and_then(|role| self.agents.iter().find(|a| a.role == role));

        match (self.process, assigned, &self.manager) {
            (_, Some(agent), _) => Ok(agent.clone()),
            (Process::Hierarchical, None, Some(manager)) => Ok(manager.clone()),
            _ => match self.agents.first() {
                Some(agent) => {
                    log::warn!(
                        "Task '{}' has no agent in crew '{}'; running it on '{}'",
                        task.name,
                        self.name,
                        agent.role
                    );
                    Ok(agent.clone())
                }
                None => Err(format!("no agent available for task '{}'", task.name)),
            },
        }
    }

    fn failed(&self, message: String) -> ExecutionError {
        ExecutionError::Crew {
            crew: self.name.clone(),
            message,
        }
    }
}

async fn run_task(
    task: Task,
    agent: Arc<Agent>,
    inputs: Arc<HashMap<String, String>>,
    context: Vec<TaskOutput>,
    memory: Option<Arc<ShortTermMemory>>,
) -> Result<TaskOutput, ExecutionError> {
    let description = task.interpolated_description(&inputs);
    let memories = match &memory {
        Some(memory) => memory
            .search(&description, MEMORY_RECALL_LIMIT)
            .await
            .unwrap_or_else(|e| {
                log::warn!("Memory recall failed for task '{}': {}", task.name, e);
                Vec::new()
            }),
        None => Vec::new(),
    };
    let prompt = task.prompt(&inputs, &context, &memories);

    log::debug!("Task '{}' running on agent '{}'", task.name, agent.role);
    let raw = agent
        .execute(&prompt, &task.tools)
        .await
        .map_err(|e| ExecutionError::Task {
            task: task.name.clone(),
            message: e.to_string(),
        })?;

    if let Some(memory) = &memory {
        if let Err(e) = memory.save(&task.name, &raw).await {
            log::warn!("Could not store memory for task '{}': {}", task.name, e);
        }
    }
    log::debug!("Task '{}' completed", task.name);
    Ok(TaskOutput::new(
        task.name,
        description,
        task.expected_output,
        agent.role.clone(),
        raw,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::agent::core::tests::ScriptedModel;
    use crate::llm::{ChatMessage, ChatModel};
    use crate::memory::HashingEmbedder;

    /// Answers with the first line of the prompt, optionally after a delay
    /// keyed by that line, and logs completion order.
    struct EchoModel {
        delays: HashMap<String, u64>,
        finished: Arc<Mutex<Vec<String>>>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        fn model(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
            let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            let first = prompt.lines().next().unwrap_or_default().to_string();
            if first.contains("explode") {
                anyhow::bail!("model refused");
            }
            if let Some(ms) = self.delays.get(&first) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            self.prompts.lock().push(prompt);
            self.finished.lock().push(first.clone());
            Ok(format!("Final Answer: done {}", first))
        }
    }

    fn echo_agent(role: &str, delays: &[(&str, u64)]) -> (Arc<Agent>, Arc<Mutex<Vec<String>>>, Arc<Mutex<Vec<String>>>) {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let model = EchoModel {
            delays: delays.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            finished: finished.clone(),
            prompts: prompts.clone(),
        };
        (
            Arc::new(Agent::new(role, "g", "b", Arc::new(model))),
            finished,
            prompts,
        )
    }

    fn task(name: &str, agent: Option<&str>, context: &[&str], is_async: bool) -> Task {
        let mut t = Task::new(name, name, "out");
        t.agent = agent.map(str::to_string);
        t.context = context.iter().map(|s| s.to_string()).collect();
        t.async_execution = is_async;
        t
    }

    fn crew(agents: Vec<Arc<Agent>>, tasks: Vec<Task>) -> Crew {
        Crew {
            name: "main".into(),
            agents,
            tasks,
            process: Process::Sequential,
            manager: None,
            embedder: None,
        }
    }

    #[tokio::test]
    async fn test_sequential_context_flows_forward() {
        let (agent, finished, prompts) = echo_agent("R", &[]);
        let crew = crew(
            vec![agent],
            vec![task("a", Some("R"), &[], false), task("b", Some("R"), &[], false)],
        );
        let out = crew.kickoff(&HashMap::new()).await.unwrap();
        assert_eq!(out.raw, "done b");
        assert_eq!(*finished.lock(), vec!["a", "b"]);
        assert!(prompts.lock()[1].contains("done a"));
    }

    #[tokio::test]
    async fn test_async_task_runs_alongside_and_dependents_wait() {
        let (agent, finished, prompts) = echo_agent("R", &[("slow", 200)]);
        let crew = crew(
            vec![agent],
            vec![
                task("slow", Some("R"), &[], true),
                task("quick", Some("R"), &["elsewhere"], false),
                task("quick_dep", Some("R"), &["slow"], false),
            ],
        );
        let out = crew.kickoff(&HashMap::new()).await.unwrap();
        let order = finished.lock().clone();
        assert_eq!(order, vec!["quick", "slow", "quick_dep"]);
        assert_eq!(
            out.tasks_output.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            vec!["slow", "quick", "quick_dep"]
        );
        assert!(prompts.lock().iter().any(|p| p.starts_with("quick_dep") && p.contains("done slow")));
    }

    #[tokio::test]
    async fn test_hierarchical_unowned_tasks_go_to_manager() {
        let (worker, _, _) = echo_agent("Worker", &[]);
        let manager = Arc::new(Agent::new(
            "Lead",
            "g",
            "b",
            ScriptedModel::new(&["Final Answer: managed"]),
        ));
        let crew = Crew {
            process: Process::Hierarchical,
            manager: Some(manager),
            ..crew(
                vec![worker],
                vec![task("a", Some("Worker"), &[], false), task("b", Some("Lead"), &[], false)],
            )
        };
        let out = crew.kickoff(&HashMap::new()).await.unwrap();
        assert_eq!(out.tasks_output[0].agent, "Worker");
        assert_eq!(out.tasks_output[1].agent, "Lead");
        assert_eq!(out.raw, "managed");
    }

    #[tokio::test]
    async fn test_task_failure_fails_crew() {
        let agent = Arc::new(Agent::new("R", "g", "b", ScriptedModel::new(&[])));
        let crew = crew(vec![agent], vec![task("a", Some("R"), &[], false)]);
        let err = crew.kickoff(&HashMap::new()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Crew { ref crew, .. } if crew == "main"));
        assert!(err.to_string().contains("task 'a' failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_aborts_running_async_tasks() {
        let (agent, finished, prompts) = echo_agent("R", &[("slow", 300)]);
        let crew = crew(
            vec![agent],
            vec![
                task("slow", Some("R"), &[], true),
                task("explode", Some("R"), &["elsewhere"], false),
            ],
        );
        let err = crew.kickoff(&HashMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("task 'explode' failed"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(finished.lock().is_empty());
        assert!(prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_memory_recalls_earlier_outputs() {
        let (agent, _, prompts) = echo_agent("R", &[]);
        let crew = Crew {
            embedder: Some(Arc::new(HashingEmbedder::default())),
            ..crew(
                vec![agent],
                vec![task("alpha", Some("R"), &[], false), task("alpha again", Some("R"), &["missing"], false)],
            )
        };
        crew.kickoff(&HashMap::new()).await.unwrap();
        assert!(prompts.lock()[1].contains("Relevant memories:\n- [alpha] done alpha"));
    }

    #[test]
    fn test_key_changes_with_tasks() {
        let (agent, _, _) = echo_agent("R", &[]);
        let one = crew(vec![agent.clone()], vec![task("a", None, &[], false)]);
        let two = crew(vec![agent], vec![task("b", None, &[], false)]);
        assert_ne!(one.key(), two.key());
        assert_eq!(one.key(), one.clone().key());
    }
}
