//! Asynchronous execution and status tracking.

pub mod cache;
pub mod record;
pub mod store;
pub mod tracker;

pub use cache::{InMemoryStatusCache, StatusCache};
pub use record::{ExecutionRecord, ExecutionStatus, ExecutionSummary, StatusReport};
pub use store::{ExecutionStore, SqliteConnector, SqliteStore, StoreConnector, StoreHandle};
pub use tracker::{ExecutionTracker, Submission, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
