//! Declarative workflow documents: typed model, parser and validator.

pub mod document;
pub mod parser;
pub mod tool_spec;
pub mod validator;

pub use document::{
    AgentSpec, CrewSpec, FlowMethodSpec, FlowMethodType, JoinLogic, LlmSpec, OrchestrationType,
    RouteTable, StateFieldSpec, StateFieldType, TaskSpec, WorkflowSpec,
};
pub use parser::{parse, peek_name, ParsedDocument};
pub use tool_spec::{ToolSpec, CODE_INTERPRETER_TOOL};
pub use validator::{is_reserved_state_field, validate, COMPLETED_FLAG_SUFFIX};
