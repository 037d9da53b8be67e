//! Crew outputs and ordering helpers.

pub mod crew_output;
pub mod utils;

pub use crew_output::CrewOutput;
pub use utils::sort_tasks_by_execution_number;
