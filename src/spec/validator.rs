//! Structural validation of a parsed workflow document.
//!
//! Validation is purely local: it reads the normalized raw tree, collects
//! every issue it finds across all sections, and either returns a typed
//! [`WorkflowSpec`] or a single [`ConfigError::Schema`] carrying all issues.
//! No tool is resolved and no network call is made here.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use super::document::{
    AgentSpec, CrewSpec, FlowMethodSpec, FlowMethodType, JoinLogic, LlmSpec, OrchestrationType,
    RouteTable, StateFieldSpec, StateFieldType, TaskSpec, WorkflowSpec,
};
use super::parser::ParsedDocument;
use super::tool_spec::{json_kind, ToolSpec};
use crate::process::Process;
use crate::utilities::errors::{ConfigError, SchemaIssue};

/// State keys owned by the runtime.
pub const RESERVED_STATE_FIELDS: &[&str] = &["id", "workflow_id", "results"];

/// Suffix of the per-step completion flags in the flat state view.
pub const COMPLETED_FLAG_SUFFIX: &str = "_completed";

/// Whether `name` collides with a key the runtime writes into flow state.
pub fn is_reserved_state_field(name: &str) -> bool {
    RESERVED_STATE_FIELDS.contains(&name) || name.ends_with(COMPLETED_FLAG_SUFFIX)
}

/// Validate a parsed document against its orchestration kind.
pub fn validate(doc: &ParsedDocument) -> Result<WorkflowSpec, ConfigError> {
    let mut v = Validator::default();
    let raw = &doc.raw;

    let name = raw
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string);
    let agents = v.agents(raw);
    let tasks = v.tasks(raw);
    let crews = v.crews(raw, &agents, &tasks);

    let (state, flow_methods) = match doc.orchestration_type {
        OrchestrationType::Flow => {
            v.task_owners(&tasks, &agents);
            let state = v.state(raw);
            let methods = v.flow_methods(raw, &crews, &state);
            (state, methods)
        }
        OrchestrationType::Crew => {
            if raw.contains_key("flow_methods") {
                log::debug!("Ignoring 'flow_methods' in a crew orchestration document");
            }
            (Vec::new(), Vec::new())
        }
    };

    if !v.issues.is_empty() {
        return Err(ConfigError::Schema(v.issues));
    }

    Ok(WorkflowSpec {
        orchestration_type: doc.orchestration_type,
        name,
        agents,
        tasks,
        crews,
        state,
        flow_methods,
    })
}

#[derive(Default)]
struct Validator {
    issues: Vec<SchemaIssue>,
}

impl Validator {
    fn issue(&mut self, section: &str, path: impl Into<String>, reason: impl Into<String>) {
        self.issues.push(SchemaIssue::new(section, path, reason));
    }

    /// The required list section `key`, or an issue.
    fn section<'a>(&mut self, raw: &'a Map<String, Value>, key: &str) -> Option<&'a Vec<Value>> {
        match raw.get(key) {
            Some(Value::Array(items)) if !items.is_empty() => Some(items),
            Some(Value::Array(_)) => {
                self.issue(key, key, "at least one entry is required");
                None
            }
            None | Some(Value::Null) => {
                self.issue(key, key, "section is required");
                None
            }
            Some(other) => {
                self.issue(key, key, format!("must be a list, got {}", json_kind(other)));
                None
            }
        }
    }

    fn mapping<'a>(
        &mut self,
        section: &str,
        path: &str,
        value: &'a Value,
    ) -> Option<&'a Map<String, Value>> {
        match value {
            Value::Object(fields) => Some(fields),
            other => {
                self.issue(
                    section,
                    path,
                    format!("must be a mapping, got {}", json_kind(other)),
                );
                None
            }
        }
    }

    fn required_str(
        &mut self,
        section: &str,
        path: &str,
        fields: &Map<String, Value>,
        key: &str,
    ) -> Option<String> {
        match fields.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::String(_)) => {
                self.issue(section, format!("{}.{}", path, key), "must not be empty");
                None
            }
            None | Some(Value::Null) => {
                self.issue(section, format!("{}.{}", path, key), "is required");
                None
            }
            Some(other) => {
                self.issue(
                    section,
                    format!("{}.{}", path, key),
                    format!("must be a string, got {}", json_kind(other)),
                );
                None
            }
        }
    }

    fn optional_str(
        &mut self,
        section: &str,
        path: &str,
        fields: &Map<String, Value>,
        key: &str,
    ) -> Option<String> {
        match fields.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(other) => {
                self.issue(
                    section,
                    format!("{}.{}", path, key),
                    format!("must be a string, got {}", json_kind(other)),
                );
                None
            }
        }
    }

    fn optional_bool(
        &mut self,
        section: &str,
        path: &str,
        fields: &Map<String, Value>,
        key: &str,
    ) -> bool {
        match fields.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                self.issue(
                    section,
                    format!("{}.{}", path, key),
                    format!("must be a boolean, got {}", json_kind(other)),
                );
                false
            }
        }
    }

    fn optional_int(
        &mut self,
        section: &str,
        path: &str,
        fields: &Map<String, Value>,
        key: &str,
        min: i64,
    ) -> Option<i64> {
        match fields.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) if n.as_i64().is_some_and(|i| i >= min) => n.as_i64(),
            Some(other) => {
                let reason = if min == i64::MIN {
                    format!("must be an integer, got {}", other)
                } else {
                    format!("must be an integer >= {}, got {}", min, other)
                };
                self.issue(section, format!("{}.{}", path, key), reason);
                None
            }
        }
    }

    /// A positive integer that fits in `u32`.
    fn optional_u32(
        &mut self,
        section: &str,
        path: &str,
        fields: &Map<String, Value>,
        key: &str,
    ) -> Option<u32> {
        let n = self.optional_int(section, path, fields, key, 1)?;
        match u32::try_from(n) {
            Ok(n) => Some(n),
            Err(_) => {
                self.issue(
                    section,
                    format!("{}.{}", path, key),
                    format!("must be at most {}, got {}", u32::MAX, n),
                );
                None
            }
        }
    }

    fn str_list(
        &mut self,
        section: &str,
        path: &str,
        fields: &Map<String, Value>,
        key: &str,
    ) -> Option<Vec<String>> {
        match fields.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    match item.as_str() {
                        Some(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
                        _ => self.issue(
                            section,
                            format!("{}.{}[{}]", path, key, i),
                            "must be a non-empty string",
                        ),
                    }
                }
                Some(out)
            }
            Some(Value::String(single)) => Some(vec![single.trim().to_string()]),
            Some(other) => {
                self.issue(
                    section,
                    format!("{}.{}", path, key),
                    format!("must be a list of strings, got {}", json_kind(other)),
                );
                None
            }
        }
    }

    fn tools(&mut self, path: &str, fields: &Map<String, Value>) -> Vec<ToolSpec> {
        let items = match fields.get("tools") {
            None | Some(Value::Null) => return Vec::new(),
            Some(Value::Array(items)) => items,
            Some(other) => {
                self.issue(
                    "tools",
                    format!("{}.tools", path),
                    format!("must be a list, got {}", json_kind(other)),
                );
                return Vec::new();
            }
        };

        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let tool_path = format!("{}.tools[{}]", path, i);
            match ToolSpec::from_value(item) {
                Ok(spec) => {
                    if let Some(reason) = empty_tool_field(&spec) {
                        self.issue("tools", tool_path, reason);
                    } else {
                        out.push(spec);
                    }
                }
                Err(reason) => self.issue("tools", tool_path, reason),
            }
        }
        out
    }

    fn agents(&mut self, raw: &Map<String, Value>) -> Vec<AgentSpec> {
        let Some(items) = self.section(raw, "agents") else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let path = format!("agents[{}]", i);
            let Some(fields) = self.mapping("agents", &path, item) else {
                continue;
            };
            let role = self.required_str("agents", &path, fields, "role");
            let goal = self.required_str("agents", &path, fields, "goal");
            let backstory = self.required_str("agents", &path, fields, "backstory");
            let tools = self.tools(&path, fields);
            let llm = self.llm(&path, fields);
            let max_iter = self.optional_u32("agents", &path, fields, "max_iter");
            let max_execution_time =
                self.optional_int("agents", &path, fields, "max_execution_time", 1);
            let max_rpm = self.optional_u32("agents", &path, fields, "max_rpm");
            let allow_code_execution =
                self.optional_bool("agents", &path, fields, "allow_code_execution");

            if let Some(role) = &role {
                if !seen.insert(role.clone()) {
                    self.issue("agents", format!("{}.role", path), format!("duplicate role '{}'", role));
                    continue;
                }
            }
            if let (Some(role), Some(goal), Some(backstory)) = (role, goal, backstory) {
                out.push(AgentSpec {
                    role,
                    goal,
                    backstory,
                    tools,
                    llm,
                    max_iter,
                    max_execution_time: max_execution_time.map(|n| n as u64),
                    max_rpm,
                    allow_code_execution,
                });
            }
        }
        out
    }

    fn llm(&mut self, path: &str, fields: &Map<String, Value>) -> Option<LlmSpec> {
        match fields.get("llm") {
            None | Some(Value::Null) => None,
            Some(Value::String(model)) => Some(LlmSpec {
                model: Some(model.clone()),
                ..LlmSpec::default()
            }),
            Some(value @ Value::Object(_)) => match serde_json::from_value(value.clone()) {
                Ok(spec) => Some(spec),
                Err(e) => {
                    self.issue("agents", format!("{}.llm", path), e.to_string());
                    None
                }
            },
            Some(other) => {
                self.issue(
                    "agents",
                    format!("{}.llm", path),
                    format!("must be a model name or a mapping, got {}", json_kind(other)),
                );
                None
            }
        }
    }

    fn tasks(&mut self, raw: &Map<String, Value>) -> Vec<TaskSpec> {
        let Some(items) = self.section(raw, "tasks") else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let path = format!("tasks[{}]", i);
            let Some(fields) = self.mapping("tasks", &path, item) else {
                continue;
            };
            let name = self.required_str("tasks", &path, fields, "name");
            let description = self.required_str("tasks", &path, fields, "description");
            let expected_output = self.required_str("tasks", &path, fields, "expected_output");
            let agent = self.optional_str("tasks", &path, fields, "agent");
            let tools = self.tools(&path, fields);
            let context = self
                .str_list("tasks", &path, fields, "context")
                .unwrap_or_default();
            let execution_number =
                self.optional_int("tasks", &path, fields, "execution_number", i64::MIN);
            let async_execution = self.optional_bool("tasks", &path, fields, "async_execution");

            if let Some(name) = &name {
                if !seen.insert(name.clone()) {
                    self.issue("tasks", format!("{}.name", path), format!("duplicate name '{}'", name));
                    continue;
                }
            }
            if let (Some(name), Some(description), Some(expected_output)) =
                (name, description, expected_output)
            {
                out.push(TaskSpec {
                    name,
                    description,
                    expected_output,
                    agent,
                    tools,
                    context,
                    execution_number,
                    async_execution,
                });
            }
        }
        out
    }

    /// Flow tasks must name a declared agent when they name one at all.
    fn task_owners(&mut self, tasks: &[TaskSpec], agents: &[AgentSpec]) {
        for (i, task) in tasks.iter().enumerate() {
            let Some(role) = &task.agent else {
                continue;
            };
            if !agents.iter().any(|a| &a.role == role) {
                self.issue(
                    "tasks",
                    format!("tasks[{}].agent", i),
                    format!("task '{}' references unknown agent '{}'", task.name, role),
                );
            }
        }
    }

    fn crews(
        &mut self,
        raw: &Map<String, Value>,
        agents: &[AgentSpec],
        tasks: &[TaskSpec],
    ) -> Vec<CrewSpec> {
        let Some(items) = self.section(raw, "crews") else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let path = format!("crews[{}]", i);
            let Some(fields) = self.mapping("crews", &path, item) else {
                continue;
            };
            let name = self
                .optional_str("crews", &path, fields, "name")
                .unwrap_or_else(|| format!("crew_{}", i + 1));
            // Absent subsets mean "every declared agent / task".
            let crew_agents = self
                .str_list("crews", &path, fields, "agents")
                .unwrap_or_else(|| agents.iter().map(|a| a.role.clone()).collect());
            let crew_tasks = self
                .str_list("crews", &path, fields, "tasks")
                .unwrap_or_else(|| tasks.iter().map(|t| t.name.clone()).collect());
            let process = match self.optional_str("crews", &path, fields, "process") {
                None => Process::default(),
                Some(p) => match p.parse::<Process>() {
                    Ok(p) => p,
                    Err(reason) => {
                        self.issue("crews", format!("{}.process", path), reason);
                        Process::default()
                    }
                },
            };
            let manager = self.optional_str("crews", &path, fields, "manager");
            let memory = self.optional_bool("crews", &path, fields, "memory");

            if !seen.insert(name.clone()) {
                self.issue("crews", format!("{}.name", path), format!("duplicate name '{}'", name));
                continue;
            }
            out.push(CrewSpec {
                name,
                agents: crew_agents,
                tasks: crew_tasks,
                process,
                manager,
                memory,
            });
        }
        out
    }

    fn state(&mut self, raw: &Map<String, Value>) -> Vec<StateFieldSpec> {
        let fields = match raw.get("state") {
            None | Some(Value::Null) => return Vec::new(),
            Some(Value::Object(fields)) => fields,
            Some(other) => {
                self.issue(
                    "state",
                    "state",
                    format!("must be a mapping, got {}", json_kind(other)),
                );
                return Vec::new();
            }
        };

        let mut out = Vec::with_capacity(fields.len());
        for (name, decl) in fields {
            let path = format!("state.{}", name);
            if is_reserved_state_field(name) {
                self.issue("state", path, "field name is reserved");
                continue;
            }
            let (field_type, default) = match decl {
                Value::Object(spec) if spec.contains_key("type") => {
                    let field_type = match spec.get("type").and_then(Value::as_str) {
                        Some(t) => match t.parse::<StateFieldType>() {
                            Ok(t) => t,
                            Err(reason) => {
                                self.issue("state", format!("{}.type", path), reason);
                                continue;
                            }
                        },
                        None => {
                            self.issue("state", format!("{}.type", path), "must be a string");
                            continue;
                        }
                    };
                    let default = spec.get("default").filter(|d| !d.is_null()).cloned();
                    (field_type, default)
                }
                Value::Null => {
                    self.issue("state", path, "needs a 'type' or a default value");
                    continue;
                }
                bare => match StateFieldType::infer(bare) {
                    Some(t) => (t, Some(bare.clone())),
                    None => continue,
                },
            };
            if let Some(default) = &default {
                if !field_type.accepts(default) {
                    self.issue(
                        "state",
                        format!("{}.default", path),
                        format!("default {} does not match type {:?}", default, field_type),
                    );
                    continue;
                }
            }
            out.push(StateFieldSpec {
                name: name.clone(),
                field_type,
                default,
            });
        }
        out
    }

    fn flow_methods(
        &mut self,
        raw: &Map<String, Value>,
        crews: &[CrewSpec],
        state: &[StateFieldSpec],
    ) -> Vec<FlowMethodSpec> {
        // Absent or empty: the graph generator synthesizes a default chain.
        let items = match raw.get("flow_methods") {
            None | Some(Value::Null) => return Vec::new(),
            Some(Value::Array(items)) => items,
            Some(other) => {
                self.issue(
                    "flow_methods",
                    "flow_methods",
                    format!("must be a list or mapping, got {}", json_kind(other)),
                );
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let path = format!("flow_methods[{}]", i);
            let Some(fields) = self.mapping("flow_methods", &path, item) else {
                continue;
            };
            let name = self.required_str("flow_methods", &path, fields, "name");
            let method_type = self
                .required_str("flow_methods", &path, fields, "type")
                .and_then(|t| match t.parse::<FlowMethodType>() {
                    Ok(t) => Some(t),
                    Err(reason) => {
                        self.issue("flow_methods", format!("{}.type", path), reason);
                        None
                    }
                });
            let crew = self.optional_str("flow_methods", &path, fields, "crew");
            let listen_to = self
                .str_list("flow_methods", &path, fields, "listen_to")
                .unwrap_or_default();
            let logic = match self.optional_str("flow_methods", &path, fields, "logic") {
                None => JoinLogic::default(),
                Some(l) => l.parse::<JoinLogic>().unwrap_or_else(|reason| {
                    self.issue("flow_methods", format!("{}.logic", path), reason);
                    JoinLogic::default()
                }),
            };
            let condition = self.optional_str("flow_methods", &path, fields, "condition");
            let routes = self.routes(&path, fields);
            let output = self.optional_str("flow_methods", &path, fields, "output");

            let (Some(name), Some(method_type)) = (name, method_type) else {
                continue;
            };
            if !seen.insert(name.clone()) {
                self.issue(
                    "flow_methods",
                    format!("{}.name", path),
                    format!("duplicate method name '{}'", name),
                );
                continue;
            }
            if matches!(method_type, FlowMethodType::Listen | FlowMethodType::Router)
                && listen_to.is_empty()
            {
                self.issue(
                    "flow_methods",
                    format!("{}.listen_to", path),
                    "listen and router methods need at least one predecessor",
                );
            }
            if method_type == FlowMethodType::Router {
                if condition.is_none() {
                    self.issue(
                        "flow_methods",
                        format!("{}.condition", path),
                        "router methods need a condition state field",
                    );
                }
                if routes.targets().is_empty() {
                    self.issue(
                        "flow_methods",
                        format!("{}.routes", path),
                        "router methods need at least one route",
                    );
                }
            }
            if let Some(crew) = &crew {
                if !crews.iter().any(|c| &c.name == crew) {
                    self.issue(
                        "flow_methods",
                        format!("{}.crew", path),
                        format!("unknown crew '{}'", crew),
                    );
                }
            }
            if let Some(output) = &output {
                if !state.iter().any(|f| &f.name == output) {
                    self.issue(
                        "flow_methods",
                        format!("{}.output", path),
                        format!("unknown state field '{}'", output),
                    );
                }
            }
            out.push(FlowMethodSpec {
                name,
                method_type,
                crew,
                listen_to,
                logic,
                condition,
                routes,
                output,
            });
        }

        self.flow_references(&out);
        out
    }

    fn routes(&mut self, path: &str, fields: &Map<String, Value>) -> RouteTable {
        match fields.get("routes") {
            None | Some(Value::Null) => RouteTable::default(),
            Some(value @ Value::Object(_)) => match serde_json::from_value(value.clone()) {
                Ok(routes) => routes,
                Err(e) => {
                    self.issue("flow_methods", format!("{}.routes", path), e.to_string());
                    RouteTable::default()
                }
            },
            Some(other) => {
                self.issue(
                    "flow_methods",
                    format!("{}.routes", path),
                    format!("must be a mapping, got {}", json_kind(other)),
                );
                RouteTable::default()
            }
        }
    }

    /// Every `listen_to` and route target must name a declared method, and
    /// listen edges must not form a cycle.
    fn flow_references(&mut self, methods: &[FlowMethodSpec]) {
        let names: HashSet<&str> = methods.iter().map(|m| m.name.as_str()).collect();
        for (i, method) in methods.iter().enumerate() {
            for pred in &method.listen_to {
                if !names.contains(pred.as_str()) {
                    self.issue(
                        "flow_methods",
                        format!("flow_methods[{}].listen_to", i),
                        format!("unknown method '{}'", pred),
                    );
                }
            }
            for target in method.routes.targets() {
                if !names.contains(target) {
                    self.issue(
                        "flow_methods",
                        format!("flow_methods[{}].routes", i),
                        format!("unknown method '{}'", target),
                    );
                }
            }
        }

        if let Some(cycle) = find_listen_cycle(methods) {
            self.issue(
                "flow_methods",
                "flow_methods",
                format!("listen cycle {}", cycle.join(" -> ")),
            );
        }
    }
}

fn empty_tool_field(spec: &ToolSpec) -> Option<&'static str> {
    match spec {
        ToolSpec::Native { name, .. } if name.trim().is_empty() => Some("native tool needs a name"),
        ToolSpec::Custom { implementation, .. } if implementation.trim().is_empty() => {
            Some("custom tool needs an implementation")
        }
        ToolSpec::Hosted { server, tool } if server.trim().is_empty() || tool.trim().is_empty() => {
            Some("hosted tool needs a server and a tool")
        }
        ToolSpec::Server { server, .. } if server.trim().is_empty() => {
            Some("server reference needs a server")
        }
        _ => None,
    }
}

/// Depth-first search over `listen_to` edges. Returns the first cycle found.
///
/// Start methods have no incoming edges; when none is declared the first
/// method becomes the start, so its `listen_to` is ignored too.
fn find_listen_cycle(methods: &[FlowMethodSpec]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Active,
        Done,
    }

    let index: HashMap<&str, usize> = methods
        .iter()
        .enumerate()
        .map(|(i, m)| (m.name.as_str(), i))
        .collect();
    let has_start = methods
        .iter()
        .any(|m| m.method_type == FlowMethodType::Start);
    let edges: Vec<&[String]> = methods
        .iter()
        .enumerate()
        .map(|(i, m)| {
            if m.method_type == FlowMethodType::Start || (!has_start && i == 0) {
                &[][..]
            } else {
                m.listen_to.as_slice()
            }
        })
        .collect();
    let mut marks = vec![Mark::Unvisited; methods.len()];
    let mut stack: Vec<usize> = Vec::new();

    fn visit(
        node: usize,
        methods: &[FlowMethodSpec],
        edges: &[&[String]],
        index: &HashMap<&str, usize>,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        marks[node] = Mark::Active;
        stack.push(node);
        for pred in edges[node] {
            let Some(&next) = index.get(pred.as_str()) else {
                continue;
            };
            match marks[next] {
                Mark::Active => {
                    let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle: Vec<String> = stack[start..]
                        .iter()
                        .map(|&n| methods[n].name.clone())
                        .collect();
                    cycle.push(methods[next].name.clone());
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(next, methods, edges, index, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        stack.pop();
        marks[node] = Mark::Done;
        None
    }

    for node in 0..methods.len() {
        if marks[node] == Mark::Unvisited {
            if let Some(cycle) = visit(node, methods, &edges, &index, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}
