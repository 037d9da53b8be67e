//! Flow graph generation.
//!
//! A flow is held as data: an ordered list of [`FlowStep`]s, each a start,
//! listener or router, interpreted by the executor. When a document declares
//! no methods, a linear chain over its crews is synthesized and closed by a
//! `finalize` step.

use std::collections::HashMap;

use crate::spec::{FlowMethodType, JoinLogic, RouteTable, WorkflowSpec};

/// Name of the synthesized terminal step.
pub const FINALIZE_STEP: &str = "finalize";

/// How a step is triggered.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Start,
    Listen {
        after: Vec<String>,
        logic: JoinLogic,
    },
    Router {
        after: Vec<String>,
        logic: JoinLogic,
        condition: String,
        routes: RouteTable,
    },
}

/// What a step does when it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    RunCrew(String),
    /// Concatenate results and persist a consolidated record.
    Finalize,
    /// Bookkeeping only.
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowStep {
    pub name: String,
    pub kind: StepKind,
    pub action: StepAction,
    /// State field that receives the crew result.
    pub output: Option<String>,
}

impl FlowStep {
    /// Predecessors and join logic, empty for a start step.
    pub fn trigger(&self) -> (&[String], JoinLogic) {
        match &self.kind {
            StepKind::Start => (&[], JoinLogic::And),
            StepKind::Listen { after, logic } | StepKind::Router { after, logic, .. } => {
                (after, *logic)
            }
        }
    }

    pub fn is_router(&self) -> bool {
        matches!(self.kind, StepKind::Router { .. })
    }
}

/// A well-formed step graph.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowGraph {
    pub name: String,
    steps: Vec<FlowStep>,
    index: HashMap<String, usize>,
}

impl FlowGraph {
    /// Graph for a validated flow document.
    pub fn from_spec(spec: &WorkflowSpec) -> Self {
        let steps = if spec.flow_methods.is_empty() {
            default_chain(spec.crews.iter().map(|c| c.name.as_str()))
        } else {
            declared_steps(spec)
        };
        Self::new(spec.display_name(), steps)
    }

    pub fn new(name: impl Into<String>, steps: Vec<FlowStep>) -> Self {
        let index = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        Self {
            name: name.into(),
            steps,
            index,
        }
    }

    pub fn steps(&self) -> &[FlowStep] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&FlowStep> {
        self.index.get(name).map(|i| &self.steps[*i])
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.name.as_str())
    }

    /// Start steps in declaration order.
    pub fn starts(&self) -> Vec<&FlowStep> {
        self.steps
            .iter()
            .filter(|s| matches!(s.kind, StepKind::Start))
            .collect()
    }

    /// Steps that list `name` among their predecessors.
    pub fn listeners_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FlowStep> + 'a {
        self.steps
            .iter()
            .filter(move |s| s.trigger().0.iter().any(|p| p == name))
    }

    /// Crews referenced by any step.
    pub fn crews(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|s| match &s.action {
                StepAction::RunCrew(crew) => Some(crew.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// One step per crew, each listening to the previous, then `finalize`.
pub fn default_chain<'a>(crews: impl IntoIterator<Item = &'a str>) -> Vec<FlowStep> {
    let mut steps: Vec<FlowStep> = Vec::new();
    for crew in crews {
        steps.push(FlowStep {
            name: format!("run_{}", crew),
            kind: chain_kind(steps.last()),
            action: StepAction::RunCrew(crew.to_string()),
            output: None,
        });
    }
    steps.push(FlowStep {
        name: FINALIZE_STEP.to_string(),
        kind: chain_kind(steps.last()),
        action: StepAction::Finalize,
        output: None,
    });
    steps
}

fn chain_kind(previous: Option<&FlowStep>) -> StepKind {
    match previous {
        None => StepKind::Start,
        Some(prev) => StepKind::Listen {
            after: vec![prev.name.clone()],
            logic: JoinLogic::And,
        },
    }
}

fn declared_steps(spec: &WorkflowSpec) -> Vec<FlowStep> {
    let promote_first = !spec
        .flow_methods
        .iter()
        .any(|m| m.method_type == FlowMethodType::Start);
    if promote_first {
        log::debug!(
            "Flow '{}' declares no start method; promoting '{}'",
            spec.display_name(),
            spec.flow_methods[0].name
        );
    }

    spec.flow_methods
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let kind = if promote_first && i == 0 {
                StepKind::Start
            } else {
                match m.method_type {
                    FlowMethodType::Start => StepKind::Start,
                    FlowMethodType::Listen => StepKind::Listen {
                        after: m.listen_to.clone(),
                        logic: m.logic,
                    },
                    FlowMethodType::Router => StepKind::Router {
                        after: m.listen_to.clone(),
                        logic: m.logic,
                        condition: m.condition.clone().unwrap_or_default(),
                        routes: m.routes.clone(),
                    },
                }
            };
            FlowStep {
                name: m.name.clone(),
                kind,
                action: m
                    .crew
                    .clone()
                    .map(StepAction::RunCrew)
                    .unwrap_or(StepAction::Noop),
                output: m.output.clone(),
            }
        })
        .collect()
}
