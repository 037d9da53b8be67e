//! Fail-fast tool validation gate.
//!
//! Every declared tool of every agent and task is resolved, and every
//! resolved capability is validated, before anything is built. All failures
//! are collected into one [`ConnectivityError`]; a single failure means no
//! tools are handed out at all.

use std::collections::HashMap;
use std::fmt;

use futures::future::join_all;

use super::capability::{CapabilityRef, ToolError};
use super::registry::ToolResolver;
use crate::spec::ToolSpec;
use crate::utilities::errors::{ConnectivityError, ToolFailure};

/// Who declared a set of tools.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToolOwner {
    Agent(String),
    Task(String),
}

impl fmt::Display for ToolOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolOwner::Agent(role) => write!(f, "agent '{}'", role),
            ToolOwner::Task(name) => write!(f, "task '{}'", name),
        }
    }
}

/// Tools requested by one owner.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub owner: ToolOwner,
    pub specs: Vec<ToolSpec>,
}

/// Capabilities that passed the gate, grouped by owner.
#[derive(Debug, Default, Clone)]
pub struct ResolvedTools {
    by_owner: HashMap<ToolOwner, Vec<CapabilityRef>>,
}

impl ResolvedTools {
    /// Capabilities for `owner`, in declaration order. Empty when the owner
    /// declared none.
    pub fn take(&mut self, owner: &ToolOwner) -> Vec<CapabilityRef> {
        self.by_owner.remove(owner).unwrap_or_default()
    }

    pub fn get(&self, owner: &ToolOwner) -> &[CapabilityRef] {
        self.by_owner.get(owner).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total(&self) -> usize {
        self.by_owner.values().map(Vec::len).sum()
    }
}

/// Resolve and validate every request.
///
/// Resolution of all declarations runs concurrently, then validation of all
/// resolved capabilities runs concurrently. Returns the aggregate of every
/// failure if anything failed.
pub async fn resolve_and_validate(
    resolver: &dyn ToolResolver,
    requests: Vec<ToolRequest>,
) -> Result<ResolvedTools, ConnectivityError> {
    let mut failures = Vec::new();

    let pending: Vec<(&ToolOwner, &ToolSpec)> = requests
        .iter()
        .flat_map(|r| r.specs.iter().map(move |s| (&r.owner, s)))
        .collect();
    let resolved = join_all(pending.iter().map(|(_, spec)| resolver.resolve(spec))).await;

    let mut by_owner: HashMap<ToolOwner, Vec<CapabilityRef>> = HashMap::new();
    for ((owner, spec), outcome) in pending.iter().zip(resolved) {
        let entry = by_owner.entry((*owner).clone()).or_default();
        match outcome {
            Ok(capabilities) => entry.extend(capabilities),
            Err(e) => {
                log::error!("Failed to resolve tool '{}' for {}: {}", spec, owner, e);
                failures.push(ToolFailure {
                    owner: owner.to_string(),
                    tool: spec.identifier(),
                    reason: e.to_string(),
                    local: matches!(e, ToolError::Config(_)),
                });
            }
        }
    }

    let checks: Vec<(&ToolOwner, &CapabilityRef)> = by_owner
        .iter()
        .flat_map(|(owner, caps)| caps.iter().map(move |c| (owner, c)))
        .collect();
    let outcomes = join_all(checks.iter().map(|(_, cap)| cap.validate())).await;
    for ((owner, cap), outcome) in checks.iter().zip(outcomes) {
        if let Err(e) = outcome {
            log::error!("Tool '{}' for {} failed validation: {}", cap.name(), owner, e);
            failures.push(ToolFailure {
                owner: owner.to_string(),
                tool: cap.name().to_string(),
                reason: e.to_string(),
                local: matches!(e, ToolError::Config(_)),
            });
        }
    }

    ConnectivityError::new(failures).into_result()?;
    Ok(ResolvedTools { by_owner })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::tools::capability::{Capability, FunctionTool, ToolError};
    use crate::tools::registry::{StaticToolServer, ToolRegistry};

    #[derive(Debug)]
    struct BrokenTool;

    #[async_trait]
    impl Capability for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails validation"
        }
        async fn validate(&self) -> Result<(), ToolError> {
            Err(ToolError::Connectivity("credentials rejected".into()))
        }
        async fn invoke(&self, _input: Value) -> Result<Value, ToolError> {
            unreachable!()
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new()
            .with_native("search", |_| Ok(FunctionTool::new("search", "Search", Ok).into_ref()))
            .with_native("broken", |_| Ok(Arc::new(BrokenTool) as CapabilityRef))
            .with_servers(Arc::new(StaticToolServer::new()))
    }

    fn request(owner: ToolOwner, specs: Vec<ToolSpec>) -> ToolRequest {
        ToolRequest { owner, specs }
    }

    #[tokio::test]
    async fn test_all_good_tools_pass() {
        let mut resolved = resolve_and_validate(
            &registry(),
            vec![
                request(ToolOwner::Agent("Researcher".into()), vec![ToolSpec::native("search")]),
                request(ToolOwner::Task("write".into()), vec![]),
            ],
        )
        .await
        .unwrap();
        assert_eq!(resolved.total(), 1);
        assert_eq!(resolved.take(&ToolOwner::Agent("Researcher".into())).len(), 1);
        assert!(resolved.take(&ToolOwner::Task("write".into())).is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_aggregated_across_owners() {
        let err = resolve_and_validate(
            &registry(),
            vec![
                request(
                    ToolOwner::Agent("Researcher".into()),
                    vec![ToolSpec::native("search"), ToolSpec::native("broken")],
                ),
                request(
                    ToolOwner::Task("write".into()),
                    vec![ToolSpec::Hosted { server: "offline".into(), tool: "x".into() }],
                ),
            ],
        )
        .await
        .unwrap_err();
        assert_eq!(err.failures.len(), 2);
        let owners: Vec<&str> = err.failures.iter().map(|f| f.owner.as_str()).collect();
        assert!(owners.contains(&"agent 'Researcher'"));
        assert!(owners.contains(&"task 'write'"));
        assert_eq!(err.local_failures().count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_native_tool_is_marked_local() {
        let err = resolve_and_validate(
            &registry(),
            vec![request(
                ToolOwner::Agent("Researcher".into()),
                vec![ToolSpec::native("serch"), ToolSpec::native("broken")],
            )],
        )
        .await
        .unwrap_err();
        assert_eq!(err.failures.len(), 2);
        let local: Vec<&str> = err.local_failures().map(|f| f.tool.as_str()).collect();
        assert_eq!(local, vec!["serch"]);
        assert!(err.to_string().contains("(1 local)"));
    }
}
