//! Agents: built roles that answer prompts through a bounded ReAct loop.

pub mod core;
pub mod parser;

pub use self::core::{
    Agent, AgentError, AgentLimits, CODE_EXECUTION_MAX_ITER, CODE_EXECUTION_MAX_TIME,
    DEFAULT_MAX_ITER,
};
