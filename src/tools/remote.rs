//! Hosted tool servers reached over HTTP.
//!
//! A server is a base URL exposing:
//!
//! - `GET  {url}/tools` returning `[{"name", "description"}]` (or the same
//!   list under a `tools` key)
//! - `GET  {url}/health` returning any 2xx when the server is usable
//! - `POST {url}/tools/{name}` taking the tool input as JSON and returning
//!   the result as JSON
//!
//! Tool lists are cached per server until [`invalidate`] or [`clear`].
//!
//! [`invalidate`]: ToolServerRegistry::invalidate
//! [`clear`]: ToolServerRegistry::clear

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;

use super::capability::{Capability, CapabilityRef, ToolError};
use super::registry::ToolServerRegistry;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ToolDescriptor {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolListing {
    Bare(Vec<ToolDescriptor>),
    Wrapped { tools: Vec<ToolDescriptor> },
}

/// Registry of HTTP tool servers keyed by name.
pub struct HttpToolServerRegistry {
    client: reqwest::Client,
    servers: HashMap<String, String>,
    cache: DashMap<String, Vec<CapabilityRef>>,
}

impl HttpToolServerRegistry {
    /// Build a registry from `name -> base URL` pairs.
    pub fn new(servers: HashMap<String, String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self::with_client(client, servers)
    }

    pub fn with_client(client: reqwest::Client, servers: HashMap<String, String>) -> Self {
        let servers = servers
            .into_iter()
            .map(|(name, url)| (name, url.trim_end_matches('/').to_string()))
            .collect();
        Self {
            client,
            servers,
            cache: DashMap::new(),
        }
    }

    pub fn is_cached(&self, server: &str) -> bool {
        self.cache.contains_key(server)
    }

    async fn fetch_tools(&self, server: &str, base_url: &str) -> Result<Vec<CapabilityRef>, ToolError> {
        let url = format!("{}/tools", base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ToolError::Connectivity(format!("server '{}' unreachable: {}", server, e)))?;
        if !response.status().is_success() {
            return Err(ToolError::Connectivity(format!(
                "server '{}' returned {} listing tools",
                server,
                response.status()
            )));
        }
        let listing: ToolListing = response.json().await.map_err(|e| {
            ToolError::Connectivity(format!("server '{}' sent an invalid tool list: {}", server, e))
        })?;
        let descriptors = match listing {
            ToolListing::Bare(tools) | ToolListing::Wrapped { tools } => tools,
        };
        log::debug!("Server '{}' offers {} tool(s)", server, descriptors.len());

        Ok(descriptors
            .into_iter()
            .map(|d| {
                Arc::new(HttpTool {
                    client: self.client.clone(),
                    server: server.to_string(),
                    base_url: base_url.to_string(),
                    name: d.name,
                    description: d.description,
                }) as CapabilityRef
            })
            .collect())
    }
}

#[async_trait]
impl ToolServerRegistry for HttpToolServerRegistry {
    async fn list_tools(&self, server: &str) -> Result<Vec<CapabilityRef>, ToolError> {
        if let Some(cached) = self.cache.get(server) {
            return Ok(cached.value().clone());
        }
        let base_url = self
            .servers
            .get(server)
            .ok_or_else(|| ToolError::Connectivity(format!("unknown tool server '{}'", server)))?;
        let tools = self.fetch_tools(server, base_url).await?;
        self.cache.insert(server.to_string(), tools.clone());
        Ok(tools)
    }

    fn invalidate(&self, server: &str) {
        self.cache.remove(server);
    }

    fn clear(&self) {
        self.cache.clear();
    }
}

/// One tool offered by an HTTP tool server.
#[derive(Debug, Clone)]
pub struct HttpTool {
    client: reqwest::Client,
    server: String,
    base_url: String,
    name: String,
    description: String,
}

#[async_trait]
impl Capability for HttpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn validate(&self) -> Result<(), ToolError> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await.map_err(|e| {
            ToolError::Connectivity(format!("server '{}' unreachable: {}", self.server, e))
        })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ToolError::Connectivity(format!(
                "server '{}' health check returned {}",
                self.server,
                response.status()
            )))
        }
    }

    async fn invoke(&self, input: Value) -> Result<Value, ToolError> {
        let url = format!("{}/tools/{}", self.base_url, self.name);
        let response = self
            .client
            .post(&url)
            .json(&input)
            .send()
            .await
            .map_err(|e| ToolError::Invocation(format!("{}: {}", self.name, e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Invocation(format!(
                "{} returned {}: {}",
                self.name, status, body
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ToolError::Invocation(format!("{}: invalid response: {}", self.name, e)))
    }
}
