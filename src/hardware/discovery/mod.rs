//! Hardware Discovery Module
//!
//! Discovers block devices on Linux systems: stable identities from the
//! by-id links, filesystem details from `lsblk`, and SG/ATA capabilities.

pub mod command;
pub mod identity;
pub mod lsblk;
pub mod support;

pub use command::*;
pub use identity::*;
pub use lsblk::*;
pub use support::*;
