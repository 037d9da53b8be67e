//! Workflow text parser and normalizer.
//!
//! Text is read as YAML first and JSON second. The result is a raw JSON
//! mapping with optional fields normalized, so the validator and builders
//! never need to tell "missing" apart from "empty".

use serde_json::{Map, Value};

use super::document::OrchestrationType;
use super::tool_spec::json_kind;
use crate::utilities::errors::ConfigError;

/// A parsed, normalized but not yet validated document.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub raw: Map<String, Value>,
    pub orchestration_type: OrchestrationType,
}

/// Parse workflow text and resolve its orchestration kind.
///
/// A caller-supplied `requested` kind takes precedence over the document's
/// own `orchestration_type` key.
pub fn parse(text: &str, requested: Option<&str>) -> Result<ParsedDocument, ConfigError> {
    let mut raw = parse_mapping(text)?;
    let orchestration_type = resolve_orchestration_type(&raw, requested)?;
    normalize(&mut raw);
    Ok(ParsedDocument {
        raw,
        orchestration_type,
    })
}

/// Read the workflow name without validating anything.
///
/// Returns `None` when the text does not parse or carries no name.
pub fn peek_name(text: &str) -> Option<String> {
    let raw = parse_mapping(text).ok()?;
    document_name(&raw)
}

fn parse_mapping(text: &str) -> Result<Map<String, Value>, ConfigError> {
    let format = detect_format(text);
    let value = match serde_yaml::from_str::<serde_yaml::Value>(text) {
        Ok(yaml) => yaml_to_json(yaml).map_err(|message| ConfigError::Parse {
            format: "YAML",
            message,
        })?,
        Err(yaml_err) => match serde_json::from_str::<Value>(text) {
            Ok(json) => json,
            Err(json_err) => {
                let message = if format == "JSON" {
                    json_err.to_string()
                } else {
                    yaml_err.to_string()
                };
                return Err(ConfigError::Parse { format, message });
            }
        },
    };

    match value {
        Value::Object(map) => Ok(map),
        other => Err(ConfigError::Parse {
            format,
            message: format!("top level must be a mapping, got {}", json_kind(&other)),
        }),
    }
}

/// JSON when the text opens like JSON, YAML otherwise.
fn detect_format(text: &str) -> &'static str {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        "JSON"
    } else {
        "YAML"
    }
}

/// Convert a YAML tree to JSON, stringifying scalar mapping keys such as
/// unquoted `true:` in router tables.
fn yaml_to_json(value: serde_yaml::Value) -> Result<Value, String> {
    use serde_yaml::Value as Y;
    Ok(match value {
        Y::Null => Value::Null,
        Y::Bool(b) => Value::Bool(b),
        Y::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("unsupported number {}", n))?
            }
        }
        Y::String(s) => Value::String(s),
        Y::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Y::Mapping(mapping) => {
            let mut out = Map::new();
            for (key, value) in mapping {
                let key = match key {
                    Y::String(s) => s,
                    Y::Bool(b) => b.to_string(),
                    Y::Number(n) => n.to_string(),
                    Y::Null => "null".to_string(),
                    other => return Err(format!("unsupported mapping key {:?}", other)),
                };
                out.insert(key, yaml_to_json(value)?);
            }
            Value::Object(out)
        }
        Y::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn resolve_orchestration_type(
    raw: &Map<String, Value>,
    requested: Option<&str>,
) -> Result<OrchestrationType, ConfigError> {
    if let Some(kind) = requested.filter(|k| !k.trim().is_empty()) {
        return kind.parse();
    }
    match raw.get("orchestration_type") {
        Some(Value::String(kind)) => kind.parse(),
        Some(Value::Null) | None => Err(ConfigError::MissingOrchestrationType),
        Some(other) => Err(ConfigError::UnknownOrchestrationType(other.to_string())),
    }
}

fn document_name(raw: &Map<String, Value>) -> Option<String> {
    if let Some(Value::String(name)) = raw.get("name") {
        if !name.trim().is_empty() {
            return Some(name.clone());
        }
    }
    raw.get("flow")
        .and_then(|flow| flow.get("flow_name"))
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
}

/// Normalize optional shapes in place.
pub(crate) fn normalize(raw: &mut Map<String, Value>) {
    if let Some(name) = document_name(raw) {
        raw.insert("name".to_string(), Value::String(name));
    }

    // Singular `crew` becomes a one-element `crews` list.
    let crews_missing = matches!(raw.get("crews"), None | Some(Value::Null));
    if let Some(crew) = raw.remove("crew") {
        if crews_missing {
            let crews = match crew {
                Value::Array(items) => Value::Array(items),
                Value::Null => Value::Array(Vec::new()),
                single => Value::Array(vec![single]),
            };
            raw.insert("crews".to_string(), crews);
        }
    }

    if let Some(Value::Array(agents)) = raw.get_mut("agents") {
        for agent in agents.iter_mut().filter_map(Value::as_object_mut) {
            default_list(agent, "tools");
        }
    }

    if let Some(Value::Array(tasks)) = raw.get_mut("tasks") {
        for task in tasks.iter_mut().filter_map(Value::as_object_mut) {
            default_list(task, "tools");
            default_list(task, "context");
        }
    }

    // `flow_methods` may be a mapping keyed by method name.
    if let Some(Value::Object(methods)) = raw.get("flow_methods") {
        let list = methods
            .iter()
            .map(|(name, method)| match method {
                Value::Object(fields) => {
                    let mut fields = fields.clone();
                    fields
                        .entry("name".to_string())
                        .or_insert_with(|| Value::String(name.clone()));
                    Value::Object(fields)
                }
                other => other.clone(),
            })
            .collect();
        raw.insert("flow_methods".to_string(), Value::Array(list));
    }
    if let Some(Value::Array(methods)) = raw.get_mut("flow_methods") {
        for method in methods.iter_mut().filter_map(Value::as_object_mut) {
            default_list(method, "listen_to");
        }
    }
}

/// Missing or null becomes `[]`; a lone string becomes a one-element list.
fn default_list(fields: &mut Map<String, Value>, key: &str) {
    match fields.get(key) {
        None | Some(Value::Null) => {
            fields.insert(key.to_string(), Value::Array(Vec::new()));
        }
        Some(Value::String(single)) => {
            let single = single.clone();
            fields.insert(key.to_string(), Value::Array(vec![Value::String(single)]));
        }
        _ => {}
    }
}
