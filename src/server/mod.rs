//! HTTP surface over the execution tracker.
//!
//! # Endpoints
//!
//! - `GET /health`: Liveness probe
//! - `POST /executions`: Submit a workflow run
//! - `GET /executions/:id`: Poll a run
//! - `DELETE /executions/:id/cache`: Drop a cached status
//! - `GET /workflows/:workflow_id/executions`: Recent runs of a workflow
//! - `POST /workflows/validate`: Validate a document

pub mod routes;

pub use routes::{app_router, AppState};
