//! Domain layer - Core types and port definitions
//!
//! This module defines the persisted model, the event payloads, and the
//! traits (ports) that system adapters implement.

pub mod dto;
pub mod model;
pub mod ports;

pub use dto::*;
pub use model::*;
pub use ports::*;
