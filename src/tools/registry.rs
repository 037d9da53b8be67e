//! Tool resolution.
//!
//! [`ToolRegistry`] is an explicitly constructed resolver: native and custom
//! tools are registered as factories by the embedding program, and hosted
//! tools are looked up through a [`ToolServerRegistry`]. Nothing here is
//! global; callers build one registry and pass it to the compiler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::capability::{CapabilityRef, ToolError};
use crate::spec::ToolSpec;

/// Turns a declared tool into zero or more capabilities.
#[async_trait]
pub trait ToolResolver: Send + Sync {
    async fn resolve(&self, spec: &ToolSpec) -> Result<Vec<CapabilityRef>, ToolError>;
}

/// Lookup of externally hosted tool servers.
#[async_trait]
pub trait ToolServerRegistry: Send + Sync {
    /// Every tool the named server offers.
    async fn list_tools(&self, server: &str) -> Result<Vec<CapabilityRef>, ToolError>;

    /// Drop any cached tool list for `server`.
    fn invalidate(&self, _server: &str) {}

    /// Drop every cached tool list.
    fn clear(&self) {}
}

/// Builds a native tool from its declared params.
pub type NativeFactory =
    Arc<dyn Fn(&HashMap<String, Value>) -> Result<CapabilityRef, ToolError> + Send + Sync>;

/// Builds a custom tool from its optional display name and params.
pub type CustomFactory = Arc<
    dyn Fn(Option<&str>, &HashMap<String, Value>) -> Result<CapabilityRef, ToolError>
        + Send
        + Sync,
>;

/// The default resolver.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    native: HashMap<String, NativeFactory>,
    custom: HashMap<String, CustomFactory>,
    servers: Option<Arc<dyn ToolServerRegistry>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut native: Vec<&String> = self.native.keys().collect();
        native.sort();
        let mut custom: Vec<&String> = self.custom.keys().collect();
        custom.sort();
        f.debug_struct("ToolRegistry")
            .field("native", &native)
            .field("custom", &custom)
            .field("servers", &self.servers.is_some())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native tool factory under `name`.
    pub fn with_native<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&HashMap<String, Value>) -> Result<CapabilityRef, ToolError> + Send + Sync + 'static,
    {
        self.native.insert(name.into(), Arc::new(factory));
        self
    }

    /// Register a custom implementation under its identifier.
    pub fn with_custom<F>(mut self, implementation: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Option<&str>, &HashMap<String, Value>) -> Result<CapabilityRef, ToolError>
            + Send
            + Sync
            + 'static,
    {
        self.custom.insert(implementation.into(), Arc::new(factory));
        self
    }

    /// Attach the hosted tool server lookup.
    pub fn with_servers(mut self, servers: Arc<dyn ToolServerRegistry>) -> Self {
        self.servers = Some(servers);
        self
    }

    pub fn servers(&self) -> Option<&Arc<dyn ToolServerRegistry>> {
        self.servers.as_ref()
    }

    async fn server_tools(&self, server: &str) -> Result<Vec<CapabilityRef>, ToolError> {
        match &self.servers {
            Some(servers) => servers.list_tools(server).await,
            None => Err(ToolError::Connectivity(format!(
                "no tool server registry configured (needed for '{}')",
                server
            ))),
        }
    }
}

#[async_trait]
impl ToolResolver for ToolRegistry {
    async fn resolve(&self, spec: &ToolSpec) -> Result<Vec<CapabilityRef>, ToolError> {
        match spec {
            ToolSpec::Native { name, params } => {
                let factory = self
                    .native
                    .get(name)
                    .ok_or_else(|| ToolError::Config(format!("unknown native tool '{}'", name)))?;
                Ok(vec![factory(params)?])
            }
            ToolSpec::Custom {
                implementation,
                name,
                params,
            } => {
                let factory = self.custom.get(implementation).ok_or_else(|| {
                    ToolError::Config(format!(
                        "unknown custom implementation '{}'",
                        implementation
                    ))
                })?;
                Ok(vec![factory(name.as_deref(), params)?])
            }
            ToolSpec::Hosted { server, tool } => {
                let tools = self.server_tools(server).await?;
                tools
                    .into_iter()
                    .find(|t| t.name() == tool)
                    .map(|t| vec![t])
                    .ok_or_else(|| {
                        ToolError::Connectivity(format!(
                            "server '{}' does not offer tool '{}'",
                            server, tool
                        ))
                    })
            }
            ToolSpec::Server { server, tools } => {
                let offered = self.server_tools(server).await?;
                let Some(allow) = tools else {
                    return Ok(offered);
                };
                let missing: Vec<&str> = allow
                    .iter()
                    .filter(|name| !offered.iter().any(|t| t.name() == name.as_str()))
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() {
                    return Err(ToolError::Connectivity(format!(
                        "server '{}' does not offer: {}",
                        server,
                        missing.join(", ")
                    )));
                }
                Ok(offered
                    .into_iter()
                    .filter(|t| allow.iter().any(|name| name == t.name()))
                    .collect())
            }
        }
    }
}

/// In-memory tool servers, for embedding programs and tests.
#[derive(Default)]
pub struct StaticToolServer {
    servers: DashMap<String, Vec<CapabilityRef>>,
}

impl StaticToolServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(self, name: impl Into<String>, tools: Vec<CapabilityRef>) -> Self {
        self.servers.insert(name.into(), tools);
        self
    }

    pub fn remove_server(&self, name: &str) {
        self.servers.remove(name);
    }
}

#[async_trait]
impl ToolServerRegistry for StaticToolServer {
    async fn list_tools(&self, server: &str) -> Result<Vec<CapabilityRef>, ToolError> {
        self.servers
            .get(server)
            .map(|tools| tools.value().clone())
            .ok_or_else(|| ToolError::Connectivity(format!("unknown tool server '{}'", server)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::capability::FunctionTool;

    fn tool(name: &str) -> CapabilityRef {
        FunctionTool::new(name, format!("{} tool", name), Ok).into_ref()
    }

    fn registry() -> ToolRegistry {
        let servers = StaticToolServer::new().with_server("docs", vec![tool("lookup"), tool("list"), tool("delete")]);
        ToolRegistry::new()
            .with_native("search", |_| Ok(tool("search")))
            .with_custom("acme.Scraper", |name, _| Ok(tool(name.unwrap_or("scraper"))))
            .with_servers(Arc::new(servers))
    }

    fn names(tools: &[CapabilityRef]) -> Vec<&str> {
        tools.iter().map(|t| t.name()).collect()
    }

    #[tokio::test]
    async fn test_native_and_custom_resolution() {
        let registry = registry();
        let native = registry.resolve(&ToolSpec::native("search")).await.unwrap();
        assert_eq!(names(&native), vec!["search"]);

        let custom = registry
            .resolve(&ToolSpec::Custom {
                implementation: "acme.Scraper".into(),
                name: Some("web".into()),
                params: HashMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(names(&custom), vec!["web"]);
    }

    #[tokio::test]
    async fn test_server_reference_expands_to_many() {
        let registry = registry();
        let all = registry
            .resolve(&ToolSpec::Server { server: "docs".into(), tools: None })
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let filtered = registry
            .resolve(&ToolSpec::Server {
                server: "docs".into(),
                tools: Some(vec!["list".into(), "lookup".into()]),
            })
            .await
            .unwrap();
        assert_eq!(names(&filtered), vec!["lookup", "list"]);
    }

    #[tokio::test]
    async fn test_unknown_server_is_connectivity_error() {
        let err = registry()
            .resolve(&ToolSpec::Hosted { server: "nowhere".into(), tool: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Connectivity(_)));
    }

    #[tokio::test]
    async fn test_allow_list_names_missing_tools() {
        let err = registry()
            .resolve(&ToolSpec::Server {
                server: "docs".into(),
                tools: Some(vec!["lookup".into(), "teleport".into()]),
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::Connectivity("server 'docs' does not offer: teleport".into())
        );
    }

    #[tokio::test]
    async fn test_unknown_native_tool() {
        let err = registry().resolve(&ToolSpec::native("telepathy")).await.unwrap_err();
        assert!(matches!(err, ToolError::Config(_)));
    }
}
