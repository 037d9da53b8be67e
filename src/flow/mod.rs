//! Flows: state machines whose steps run crews over shared state.
//!
//! [`graph`] turns a validated document into a step graph, [`state`] holds
//! the shared state, and [`executor`] walks the graph.

pub mod executor;
pub mod graph;
pub mod persistence;
pub mod state;

pub use executor::{FlowExecutor, FlowOutcome};
pub use graph::{default_chain, FlowGraph, FlowStep, StepAction, StepKind, FINALIZE_STEP};
pub use persistence::{FlowPersistence, InMemoryFlowPersistence};
pub use state::FlowState;
