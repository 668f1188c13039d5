//! Control Plane Module
//!
//! Startup/shutdown orchestration and the first-run import.

pub mod bootstrap;
pub mod orchestrator;

pub use bootstrap::*;
pub use orchestrator::*;
