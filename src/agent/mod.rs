//! The request lifecycle: planning, the verification gate, execution and the
//! session-backed orchestrator that ties them together.

pub mod executor;
pub mod gate;
pub mod orchestrator;
pub mod planner;
pub mod sessions;
pub mod state;
