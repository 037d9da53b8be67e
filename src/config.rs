//! Service configuration for the HTTP server.
//!
//! Read from the environment by default, or from a YAML file with the same
//! field names.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::DEFAULT_MODEL;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DB_PATH: &str = "crewforge.db";

#[derive(Debug, Error)]
pub enum ServiceConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidVar { var: String, reason: String },

    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Settings for one server process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub default_model: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    /// Hosted tool servers by name.
    pub tool_servers: BTreeMap<String, String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            default_model: DEFAULT_MODEL.to_string(),
            openai_api_key: None,
            openai_base_url: None,
            tool_servers: BTreeMap::new(),
        }
    }
}

impl ServiceConfig {
    /// Read `PORT`, `CREWFORGE_DB_PATH`, `CREWFORGE_DEFAULT_MODEL`,
    /// `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `CREWFORGE_TOOL_SERVERS`.
    pub fn from_env() -> Result<Self, ServiceConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServiceConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(port) = var("PORT") {
            config.port = port.trim().parse().map_err(|e| ServiceConfigError::InvalidVar {
                var: "PORT".into(),
                reason: format!("{}", e),
            })?;
        }
        if let Some(path) = var("CREWFORGE_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(model) = var("CREWFORGE_DEFAULT_MODEL") {
            config.default_model = model;
        }
        config.openai_api_key = var("OPENAI_API_KEY");
        config.openai_base_url = var("OPENAI_BASE_URL");
        if let Some(servers) = var("CREWFORGE_TOOL_SERVERS") {
            config.tool_servers = parse_tool_servers(&servers)?;
        }
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ServiceConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ServiceConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ServiceConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

/// Parse `name=url,name=url`.
fn parse_tool_servers(raw: &str) -> Result<BTreeMap<String, String>, ServiceConfigError> {
    let mut servers = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
                servers.insert(name.trim().to_string(), url.trim().trim_end_matches('/').to_string());
            }
            _ => {
                return Err(ServiceConfigError::InvalidVar {
                    var: "CREWFORGE_TOOL_SERVERS".into(),
                    reason: format!("expected name=url, got '{}'", pair),
                })
            }
        }
    }
    Ok(servers)
}
