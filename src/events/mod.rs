//! In-process event bus
//!
//! Decouples mutating components (lifecycle manager, repositories, REST
//! layer) from reactive ones (dirty-state tracker, notification layer).

pub mod bus;
pub mod types;

pub use bus::{EventBus, ListenerKey, Signal, Subscription};
pub use types::*;
