//! Tool capabilities, resolution and the validation gate.

pub mod capability;
pub mod registry;
pub mod remote;
pub mod validation;

pub use capability::{result_text, Capability, CapabilityRef, FunctionTool, ToolError};
pub use registry::{
    CustomFactory, NativeFactory, StaticToolServer, ToolRegistry, ToolResolver,
    ToolServerRegistry,
};
pub use remote::HttpToolServerRegistry;
pub use validation::{resolve_and_validate, ResolvedTools, ToolOwner, ToolRequest};
