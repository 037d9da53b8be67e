//! Runtime agent: a role bound to a chat model and a set of capabilities.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use super::parser::{parse, AgentStep};
use crate::llm::{ChatMessage, ChatModel};
use crate::tools::{result_text, CapabilityRef};
use crate::utilities::rpm_controller::RpmController;

/// Iteration ceiling when the agent does not set one.
pub const DEFAULT_MAX_ITER: u32 = 25;

/// Ceilings applied when code execution is attached and the agent does not
/// override them.
pub const CODE_EXECUTION_MAX_ITER: u32 = 5;
pub const CODE_EXECUTION_MAX_TIME: Duration = Duration::from_secs(300);

/// Why an agent stopped without an answer.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent '{role}' exceeded its time limit of {limit:?}")]
    Timeout { role: String, limit: Duration },

    #[error("agent '{role}' model call failed: {source}")]
    Model {
        role: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Execution limits for one agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentLimits {
    pub max_iter: u32,
    pub max_execution_time: Option<Duration>,
    pub max_rpm: Option<u32>,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_iter: DEFAULT_MAX_ITER,
            max_execution_time: None,
            max_rpm: None,
        }
    }
}

/// A built agent.
#[derive(Clone)]
pub struct Agent {
    pub role: String,
    pub goal: String,
    pub backstory: String,
    pub tools: Vec<CapabilityRef>,
    pub limits: AgentLimits,
    pub allow_code_execution: bool,
    llm: Arc<dyn ChatModel>,
    rpm: RpmController,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tools: Vec<&str> = self.tools.iter().map(|t| t.name()).collect();
        f.debug_struct("Agent")
            .field("role", &self.role)
            .field("model", &self.llm.model())
            .field("tools", &tools)
            .field("limits", &self.limits)
            .finish()
    }
}

impl Agent {
    pub fn new(
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
        llm: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            role: role.into(),
            goal: goal.into(),
            backstory: backstory.into(),
            tools: Vec::new(),
            limits: AgentLimits::default(),
            allow_code_execution: false,
            llm,
            rpm: RpmController::default(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<CapabilityRef>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_limits(mut self, limits: AgentLimits) -> Self {
        self.rpm = RpmController::new(limits.max_rpm);
        self.limits = limits;
        self
    }

    pub fn with_code_execution(mut self, allow: bool) -> Self {
        self.allow_code_execution = allow;
        self
    }

    pub fn model(&self) -> &str {
        self.llm.model()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Run `prompt` to a final answer, bounded by the agent's limits.
    ///
    /// `extra_tools` are task-level tools offered alongside the agent's own.
    pub async fn execute(
        &self,
        prompt: &str,
        extra_tools: &[CapabilityRef],
    ) -> Result<String, AgentError> {
        let run = self.react_loop(prompt, extra_tools);
        match self.limits.max_execution_time {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
                AgentError::Timeout {
                    role: self.role.clone(),
                    limit,
                }
            })?,
            None => run.await,
        }
    }

    async fn react_loop(
        &self,
        prompt: &str,
        extra_tools: &[CapabilityRef],
    ) -> Result<String, AgentError> {
        let tools: Vec<&CapabilityRef> = self.tools.iter().chain(extra_tools).collect();
        let mut messages = vec![
            ChatMessage::system(self.system_prompt(&tools)),
            ChatMessage::user(prompt),
        ];

        for iteration in 0..self.limits.max_iter {
            let text = self.call_model(&messages).await?;
            log::debug!(
                "Agent '{}' iteration {}: {} chars",
                self.role,
                iteration + 1,
                text.len()
            );

            let feedback = match parse(&text) {
                Ok(AgentStep::Finish(finish)) => return Ok(finish.output),
                Ok(AgentStep::Action(action)) => {
                    let observation = match tools.iter().find(|t| t.name() == action.tool) {
                        Some(tool) => match tool.invoke(tool_input(&action.tool_input)).await {
                            Ok(value) => result_text(&value),
                            Err(e) => format!("Tool '{}' failed: {}", action.tool, e),
                        },
                        None => format!(
                            "Tool '{}' does not exist. Available tools: {}",
                            action.tool,
                            tool_list(&tools)
                        ),
                    };
                    format!("Observation: {}", observation)
                }
                // Without tools there is nothing to act on, take the text as the answer.
                Err(_) if tools.is_empty() => return Ok(text.trim().to_string()),
                Err(e) => e.0,
            };
            messages.push(ChatMessage::assistant(text));
            messages.push(ChatMessage::user(feedback));
        }

        log::warn!(
            "Agent '{}' reached max iterations ({}), forcing a final answer",
            self.role,
            self.limits.max_iter
        );
        messages.push(ChatMessage::user(
            "You have reached the maximum number of iterations. \
             Give your best Final Answer now.",
        ));
        let text = self.call_model(&messages).await?;
        Ok(match parse(&text) {
            Ok(AgentStep::Finish(finish)) => finish.output,
            _ => text.trim().to_string(),
        })
    }

    async fn call_model(&self, messages: &[ChatMessage]) -> Result<String, AgentError> {
        self.rpm.acquire().await;
        self.llm
            .invoke(messages)
            .await
            .map_err(|source| AgentError::Model {
                role: self.role.clone(),
                source,
            })
    }

    fn system_prompt(&self, tools: &[&CapabilityRef]) -> String {
        let mut prompt = format!(
            "You are {}. {}\nYour personal goal is: {}",
            self.role, self.backstory, self.goal
        );
        if tools.is_empty() {
            prompt.push_str(
                "\n\nTo give my best complete final answer to the task respond using the exact following format:\n\n\
                 Thought: I now can give a great answer\n\
                 Final Answer: Your final answer must be the great and the most complete as possible.",
            );
        } else {
            prompt.push_str("\nYou ONLY have access to the following tools:\n\n");
            for tool in tools {
                prompt.push_str(&format!("Tool Name: {}\nTool Description: {}\n", tool.name(), tool.description()));
            }
            prompt.push_str(&format!(
                "\nUse the following format:\n\n\
                 Thought: you should always think about what to do\n\
                 Action: the action to take, only one name of [{}]\n\
                 Action Input: the input to the action, as a JSON object\n\
                 Observation: the result of the action\n\n\
                 Once all necessary information is gathered:\n\n\
                 Thought: I now know the final answer\n\
                 Final Answer: the final answer to the original input question",
                tool_list(tools)
            ));
        }
        prompt
    }
}

fn tool_list(tools: &[&CapabilityRef]) -> String {
    tools.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
}

/// JSON when it parses, otherwise `{"input": text}`.
fn tool_input(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if value.is_object() || value.is_array() => value,
        _ => serde_json::json!({ "input": raw }),
    }
}
