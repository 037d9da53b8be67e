//! Shared flow state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::spec::{StateFieldSpec, StateFieldType, COMPLETED_FLAG_SUFFIX};

/// State shared by every step of one flow run.
///
/// Always carries a generated `id`, the caller's `workflow_id` when given,
/// one completion flag per step, and the ordered list of crew results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Declared fields, in declaration order.
    pub fields: Map<String, Value>,
    pub completed: BTreeMap<String, bool>,
    pub results: Vec<String>,
    #[serde(skip)]
    types: BTreeMap<String, StateFieldType>,
}

impl FlowState {
    /// Initial state for a run over `steps`.
    pub fn new<'a>(
        declared: &[StateFieldSpec],
        steps: impl IntoIterator<Item = &'a str>,
        workflow_id: Option<String>,
    ) -> Self {
        let mut fields = Map::new();
        let mut types = BTreeMap::new();
        for field in declared {
            fields.insert(field.name.clone(), field.initial_value());
            types.insert(field.name.clone(), field.field_type);
        }
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id,
            fields,
            completed: steps.into_iter().map(|s| (s.to_string(), false)).collect(),
            results: Vec::new(),
            types,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        match field {
            "id" => None,
            _ => self.fields.get(field),
        }
    }

    /// Store `raw` into `field`, converted to the field's declared type.
    pub fn set_from_text(&mut self, field: &str, raw: &str) -> Result<(), String> {
        let value = match self.types.get(field) {
            Some(kind) => coerce(*kind, raw)?,
            None => Value::String(raw.to_string()),
        };
        self.fields.insert(field.to_string(), value);
        Ok(())
    }

    pub fn mark_completed(&mut self, step: &str) {
        self.completed.insert(step.to_string(), true);
    }

    pub fn is_completed(&self, step: &str) -> bool {
        self.completed.get(step).copied().unwrap_or(false)
    }

    /// Truthiness of a field, as read by routers. Missing fields are false.
    pub fn is_truthy(&self, field: &str) -> bool {
        match self.fields.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Some(Value::String(s)) => {
                let s = s.trim();
                !(s.is_empty() || s.eq_ignore_ascii_case("false") || s == "0" || s.eq_ignore_ascii_case("no"))
            }
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
        }
    }

    /// Flat JSON view used for persistence and results.
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        out.insert("id".into(), Value::String(self.id.clone()));
        if let Some(workflow_id) = &self.workflow_id {
            out.insert("workflow_id".into(), Value::String(workflow_id.clone()));
        }
        for (k, v) in &self.fields {
            out.insert(k.clone(), v.clone());
        }
        let completed: Map<String, Value> = self
            .completed
            .iter()
            .map(|(k, v)| (format!("{}{}", k, COMPLETED_FLAG_SUFFIX), Value::Bool(*v)))
            .collect();
        out.extend(completed);
        out.insert(
            "results".into(),
            Value::Array(self.results.iter().cloned().map(Value::String).collect()),
        );
        Value::Object(out)
    }
}

/// Convert crew output text into a value of the given type.
pub fn coerce(kind: StateFieldType, raw: &str) -> Result<Value, String> {
    let text = raw.trim();
    match kind {
        StateFieldType::Text => Ok(Value::String(raw.to_string())),
        StateFieldType::Integer => text
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("'{}' is not an integer", text)),
        StateFieldType::Decimal => text
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| format!("'{}' is not a number", text)),
        StateFieldType::Boolean => match text.to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "n" | "0" => Ok(Value::Bool(false)),
            _ => Err(format!("'{}' is not a boolean", text)),
        },
        StateFieldType::List => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => Ok(Value::Array(items)),
            _ => Ok(Value::Array(vec![Value::String(raw.to_string())])),
        },
        StateFieldType::Map => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(Value::Object(map)),
            _ => Err("expected a JSON object".to_string()),
        },
    }
}
