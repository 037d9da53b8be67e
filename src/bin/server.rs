//! crewforge HTTP server binary.
//!
//! Compiles submitted workflow documents and runs them in the background,
//! tracking their status in SQLite.
//!
//! # Environment Variables
//!
//! - `PORT`: HTTP port (default: 8080)
//! - `CREWFORGE_CONFIG`: optional YAML config file; replaces the variables below
//! - `CREWFORGE_DB_PATH`: SQLite database path (default: crewforge.db)
//! - `CREWFORGE_DEFAULT_MODEL`: model for agents without one (default: gpt-4o-mini)
//! - `OPENAI_API_KEY`, `OPENAI_BASE_URL`: chat completions endpoint
//! - `CREWFORGE_TOOL_SERVERS`: hosted tool servers, `name=url,name=url`
//! - `RUST_LOG`: Tracing filter (default: "info,crewforge=debug")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin server
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use crewforge::compiler::WorkflowCompiler;
use crewforge::config::ServiceConfig;
use crewforge::execution::{ExecutionTracker, SqliteConnector};
use crewforge::llm::openai::OpenAiProvider;
use crewforge::server::{app_router, AppState};
use crewforge::tools::{HttpToolServerRegistry, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,crewforge=debug".into()),
        )
        .init();

    let config = match std::env::var("CREWFORGE_CONFIG") {
        Ok(path) => ServiceConfig::from_yaml_file(&path)?,
        Err(_) => ServiceConfig::from_env()?,
    };

    let servers: HashMap<String, String> = config.tool_servers.clone().into_iter().collect();
    let registry = ToolRegistry::new().with_servers(Arc::new(HttpToolServerRegistry::new(servers)));
    let models = OpenAiProvider::new(
        Some(config.default_model.clone()),
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
    );
    let compiler = WorkflowCompiler::new(Arc::new(registry), Arc::new(models));

    let connector = Arc::new(SqliteConnector::new(&config.db_path));
    let tracker = ExecutionTracker::new(compiler, connector)
        .with_context(|| format!("opening {}", config.db_path.display()))?;

    let app = app_router(AppState::new(tracker));
    let bind_addr = config.bind_addr();

    tracing::info!("crewforge server starting on {}", bind_addr);
    tracing::info!("Database: {}", config.db_path.display());
    tracing::info!("Default model: {}", config.default_model);
    tracing::info!("Tool servers: {:?}", config.tool_servers.keys().collect::<Vec<_>>());
    tracing::info!("Endpoints:");
    tracing::info!("  GET    /health");
    tracing::info!("  POST   /executions");
    tracing::info!("  GET    /executions/:id");
    tracing::info!("  DELETE /executions/:id/cache");
    tracing::info!("  GET    /workflows/:workflow_id/executions");
    tracing::info!("  POST   /workflows/validate");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;

    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}
