//! # crewforge
//!
//! Compile declarative multi-agent workflow documents into executable
//! pipelines and run them in the background with pollable status.
//!
//! A document declares agents, tasks, their tool bindings, and how tasks are
//! grouped into crews. Flow documents add typed shared state and a small
//! state machine of steps over those crews. The pipeline is:
//!
//! 1. [`spec`] parses and normalizes the text (YAML or JSON) and validates it.
//! 2. [`tools`] resolves every declared tool and validates each capability;
//!    any failure aborts the whole build with one aggregated error.
//! 3. [`builder`] creates agents and tasks, then assembles [`Crew`]s.
//! 4. [`flow`] turns flow documents into a step graph run by a data-driven
//!    executor.
//! 5. [`execution`] issues run ids, runs compiled workflows on background
//!    tasks and serves status from a cache backed by SQLite.
//!
//! [`server`] exposes the submission and polling operations over HTTP.

pub mod agent;
pub mod builder;
pub mod compiler;
pub mod config;
pub mod crew;
pub mod crews;
pub mod execution;
pub mod flow;
pub mod llm;
pub mod memory;
pub mod process;
pub mod server;
pub mod spec;
pub mod task;
pub mod tasks;
pub mod tools;
pub mod utilities;

pub use agent::Agent;
pub use compiler::{CompiledWorkflow, WorkflowCompiler};
pub use crew::Crew;
pub use crews::crew_output::CrewOutput;
pub use execution::{ExecutionStatus, ExecutionTracker, StatusReport, Submission};
pub use flow::{FlowExecutor, FlowGraph, FlowState};
pub use process::Process;
pub use spec::{OrchestrationType, WorkflowSpec};
pub use task::Task;
pub use tasks::task_output::TaskOutput;
pub use utilities::errors::{BuildError, ConfigError, ConnectivityError, ExecutionError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
