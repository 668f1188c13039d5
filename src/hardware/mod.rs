//! Hardware Module
//!
//! Provides block device discovery and identity resolution for the
//! mount lifecycle and the migrations.

pub mod discovery;

pub use discovery::*;
