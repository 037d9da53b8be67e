//! Typed workflow document.
//!
//! These are the validated, normalized shapes produced by
//! [`validate`](super::validator::validate). Everything downstream of the
//! validator works on these types and never on raw text or raw JSON.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tool_spec::ToolSpec;
use crate::process::Process;
use crate::utilities::errors::ConfigError;

/// Which orchestration a document describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestrationType {
    Crew,
    Flow,
}

impl fmt::Display for OrchestrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestrationType::Crew => write!(f, "crew"),
            OrchestrationType::Flow => write!(f, "flow"),
        }
    }
}

impl FromStr for OrchestrationType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crew" | "crews" => Ok(OrchestrationType::Crew),
            "flow" | "flows" => Ok(OrchestrationType::Flow),
            other => Err(ConfigError::UnknownOrchestrationType(other.to_string())),
        }
    }
}

/// Model settings for one agent. Passed opaquely to the LLM provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmSpec {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    /// Any other provider-specific keys.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// A declared agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Unique key within a workflow.
    pub role: String,
    pub goal: String,
    pub backstory: String,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub llm: Option<LlmSpec>,
    #[serde(default)]
    pub max_iter: Option<u32>,
    /// Wall-clock ceiling in seconds.
    #[serde(default)]
    pub max_execution_time: Option<u64>,
    #[serde(default)]
    pub max_rpm: Option<u32>,
    #[serde(default)]
    pub allow_code_execution: bool,
}

/// A declared task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique key within a workflow.
    pub name: String,
    pub description: String,
    pub expected_output: String,
    /// Owning agent role.
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    /// Names of tasks whose output feeds this one. Always present after
    /// normalization, possibly empty.
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub execution_number: Option<i64>,
    #[serde(default)]
    pub async_execution: bool,
}

/// A declared crew.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewSpec {
    pub name: String,
    /// Agent roles in this crew.
    pub agents: Vec<String>,
    /// Task names in this crew, in declaration order.
    pub tasks: Vec<String>,
    #[serde(default)]
    pub process: Process,
    #[serde(default)]
    pub manager: Option<String>,
    #[serde(default)]
    pub memory: bool,
}

/// Kind of a flow method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowMethodType {
    Start,
    Listen,
    Router,
}

impl FromStr for FlowMethodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(FlowMethodType::Start),
            "listen" => Ok(FlowMethodType::Listen),
            "router" => Ok(FlowMethodType::Router),
            other => Err(format!(
                "unknown method type '{}' (expected start, listen or router)",
                other
            )),
        }
    }
}

/// Join semantics over a listener's predecessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinLogic {
    /// Every predecessor must complete.
    #[default]
    And,
    /// Any one predecessor completing is enough.
    Or,
}

impl FromStr for JoinLogic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(JoinLogic::And),
            "OR" => Ok(JoinLogic::Or),
            other => Err(format!("unknown logic '{}' (expected AND or OR)", other)),
        }
    }
}

/// Router targets keyed by condition outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    #[serde(rename = "true", default)]
    pub on_true: Option<String>,
    #[serde(rename = "false", default)]
    pub on_false: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
}

impl RouteTable {
    /// Every named target, without duplicates.
    pub fn targets(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for target in [&self.on_true, &self.on_false, &self.default]
            .into_iter()
            .flatten()
        {
            if !out.contains(&target.as_str()) {
                out.push(target.as_str());
            }
        }
        out
    }
}

/// A declared flow method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowMethodSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub method_type: FlowMethodType,
    #[serde(default)]
    pub crew: Option<String>,
    #[serde(default)]
    pub listen_to: Vec<String>,
    #[serde(default)]
    pub logic: JoinLogic,
    /// State field read by a router.
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub routes: RouteTable,
    /// State field that receives this step's crew result.
    #[serde(default)]
    pub output: Option<String>,
}

/// Type of a declared state field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFieldType {
    Text,
    Integer,
    Decimal,
    Boolean,
    List,
    Map,
}

impl StateFieldType {
    /// Zero value used when a field declares no default.
    pub fn zero(&self) -> Value {
        match self {
            StateFieldType::Text => Value::String(String::new()),
            StateFieldType::Integer => Value::from(0),
            StateFieldType::Decimal => Value::from(0.0),
            StateFieldType::Boolean => Value::Bool(false),
            StateFieldType::List => Value::Array(Vec::new()),
            StateFieldType::Map => Value::Object(serde_json::Map::new()),
        }
    }

    /// Whether `value` already has this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            StateFieldType::Text => value.is_string(),
            StateFieldType::Integer => value.is_i64() || value.is_u64(),
            StateFieldType::Decimal => value.is_number(),
            StateFieldType::Boolean => value.is_boolean(),
            StateFieldType::List => value.is_array(),
            StateFieldType::Map => value.is_object(),
        }
    }

    /// Infer a field type from a bare default value.
    pub fn infer(value: &Value) -> Option<Self> {
        match value {
            Value::String(_) => Some(StateFieldType::Text),
            Value::Bool(_) => Some(StateFieldType::Boolean),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(StateFieldType::Integer),
            Value::Number(_) => Some(StateFieldType::Decimal),
            Value::Array(_) => Some(StateFieldType::List),
            Value::Object(_) => Some(StateFieldType::Map),
            Value::Null => None,
        }
    }
}

impl FromStr for StateFieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "str" | "string" => Ok(StateFieldType::Text),
            "integer" | "int" => Ok(StateFieldType::Integer),
            "decimal" | "float" | "number" => Ok(StateFieldType::Decimal),
            "boolean" | "bool" => Ok(StateFieldType::Boolean),
            "list" | "array" => Ok(StateFieldType::List),
            "map" | "dict" | "object" => Ok(StateFieldType::Map),
            other => Err(format!("unknown state type '{}'", other)),
        }
    }
}

/// A declared shared-state field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: StateFieldType,
    #[serde(default)]
    pub default: Option<Value>,
}

impl StateFieldSpec {
    /// Initial value: the declared default, or the type's zero value.
    pub fn initial_value(&self) -> Value {
        self.default.clone().unwrap_or_else(|| self.field_type.zero())
    }
}

/// A fully validated workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub orchestration_type: OrchestrationType,
    #[serde(default)]
    pub name: Option<String>,
    pub agents: Vec<AgentSpec>,
    pub tasks: Vec<TaskSpec>,
    pub crews: Vec<CrewSpec>,
    /// Declared state fields in declaration order (flows only).
    #[serde(default)]
    pub state: Vec<StateFieldSpec>,
    /// Declared flow methods in declaration order. Empty means a default
    /// chain is synthesized.
    #[serde(default)]
    pub flow_methods: Vec<FlowMethodSpec>,
}

impl WorkflowSpec {
    /// Name used for records and logs.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("workflow")
    }

    pub fn agent(&self, role: &str) -> Option<&AgentSpec> {
        self.agents.iter().find(|a| a.role == role)
    }

    pub fn task(&self, name: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn state_field(&self, name: &str) -> Option<&StateFieldSpec> {
        self.state.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_orchestration_type_parse() {
        assert_eq!(
            "Flow".parse::<OrchestrationType>().unwrap(),
            OrchestrationType::Flow
        );
        assert!(matches!(
            "pipeline".parse::<OrchestrationType>(),
            Err(ConfigError::UnknownOrchestrationType(_))
        ));
    }

    #[test]
    fn test_route_targets_are_deduplicated() {
        let routes = RouteTable {
            on_true: Some("publish".into()),
            on_false: Some("revise".into()),
            default: Some("publish".into()),
        };
        assert_eq!(routes.targets(), vec!["publish", "revise"]);
    }

    #[test]
    fn test_state_type_inference() {
        assert_eq!(StateFieldType::infer(&json!(3)), Some(StateFieldType::Integer));
        assert_eq!(StateFieldType::infer(&json!(0.5)), Some(StateFieldType::Decimal));
        assert_eq!(StateFieldType::infer(&json!(null)), None);
        assert!(StateFieldType::Decimal.accepts(&json!(3)));
        assert!(!StateFieldType::Integer.accepts(&json!(3.5)));
    }

    #[test]
    fn test_initial_value_falls_back_to_zero() {
        let field = StateFieldSpec {
            name: "count".into(),
            field_type: StateFieldType::Integer,
            default: None,
        };
        assert_eq!(field.initial_value(), json!(0));
    }
}
