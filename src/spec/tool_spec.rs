//! Tool declarations as they appear in a workflow document.
//!
//! A `ToolSpec` is only a reference; turning it into something invocable is
//! the job of a [`ToolResolver`](crate::tools::ToolResolver).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the distinguished code-execution tool.
pub const CODE_INTERPRETER_TOOL: &str = "code_interpreter";

/// A declared tool reference.
///
/// In documents a tool is either a bare string (shorthand for a native tool
/// of that name) or a mapping tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolSpec {
    /// A tool shipped with the runtime, looked up by name.
    Native {
        name: String,
        #[serde(default)]
        params: HashMap<String, Value>,
    },
    /// A caller-provided implementation registered under an identifier.
    Custom {
        implementation: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        params: HashMap<String, Value>,
    },
    /// A single tool exposed by an externally hosted server.
    Hosted { server: String, tool: String },
    /// Every tool of an externally hosted server, optionally filtered by an
    /// allow-list of tool names.
    Server {
        server: String,
        #[serde(default)]
        tools: Option<Vec<String>>,
    },
}

impl ToolSpec {
    /// Shorthand for a native tool without parameters.
    pub fn native(name: impl Into<String>) -> Self {
        ToolSpec::Native {
            name: name.into(),
            params: HashMap::new(),
        }
    }

    /// Parse one declaration from its document form.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(name) if !name.trim().is_empty() => Ok(Self::native(name.trim())),
            Value::String(_) => Err("tool name must not be empty".to_string()),
            Value::Object(map) => {
                if !map.contains_key("type") {
                    return Err("tool mapping is missing 'type'".to_string());
                }
                serde_json::from_value(value.clone()).map_err(|e| e.to_string())
            }
            other => Err(format!(
                "tool must be a string or a mapping, got {}",
                json_kind(other)
            )),
        }
    }

    /// Identifier used in logs and error reports.
    pub fn identifier(&self) -> String {
        match self {
            ToolSpec::Native { name, .. } => name.clone(),
            ToolSpec::Custom {
                implementation,
                name,
                ..
            } => name.clone().unwrap_or_else(|| implementation.clone()),
            ToolSpec::Hosted { server, tool } => format!("{}/{}", server, tool),
            ToolSpec::Server { server, .. } => format!("{}/*", server),
        }
    }

    /// Whether this declaration requests the code-execution tool.
    pub fn is_code_interpreter(&self) -> bool {
        matches!(self, ToolSpec::Native { name, .. } if name == CODE_INTERPRETER_TOOL)
    }

    /// Whether resolving this declaration needs a live server lookup.
    pub fn is_external(&self) -> bool {
        matches!(self, ToolSpec::Hosted { .. } | ToolSpec::Server { .. })
    }
}

impl fmt::Display for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}
