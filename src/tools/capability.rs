//! The invocable form of a declared tool.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by a capability or while resolving one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    /// The declaration cannot be honoured by this resolver (unknown native
    /// tool, unknown custom implementation, bad params).
    #[error("{0}")]
    Config(String),
    /// A server could not be reached, is unknown, or does not offer the tool.
    #[error("{0}")]
    Connectivity(String),
    /// The tool ran and failed.
    #[error("{0}")]
    Invocation(String),
}

/// A resolved tool an agent can call.
///
/// `validate` is run by the validation gate before any agent executes;
/// implementations that have nothing to check keep the default.
#[async_trait]
pub trait Capability: Send + Sync + fmt::Debug {
    /// Name the model uses to call this tool.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// Check the tool is usable (credentials, reachability, ...).
    async fn validate(&self) -> Result<(), ToolError> {
        Ok(())
    }

    /// Run the tool.
    async fn invoke(&self, input: Value) -> Result<Value, ToolError>;
}

/// Shared handle to a capability.
pub type CapabilityRef = Arc<dyn Capability>;

/// Signature of a synchronous tool body.
pub type ToolFn = Arc<dyn Fn(Value) -> Result<Value, ToolError> + Send + Sync>;

/// A capability backed by a plain function.
///
/// Convenient for native and custom tools registered by the embedding
/// program.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    func: ToolFn,
}

impl FunctionTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            func: Arc::new(func),
        }
    }

    pub fn into_ref(self) -> CapabilityRef {
        Arc::new(self)
    }
}

impl fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl Capability for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, input: Value) -> Result<Value, ToolError> {
        (self.func)(input)
    }
}

/// Render a tool result as the text an agent sees.
pub fn result_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_function_tool_invokes_body() {
        let tool = FunctionTool::new("echo", "Echo input", Ok);
        assert!(tool.validate().await.is_ok());
        assert_eq!(tool.invoke(json!({"q": 1})).await.unwrap(), json!({"q": 1}));
    }

    #[test]
    fn test_result_text_unquotes_strings() {
        assert_eq!(result_text(&json!("plain")), "plain");
        assert_eq!(result_text(&json!({"a": 1})), r#"{"a":1}"#);
    }
}
