//! Volume Module
//!
//! Mount/unmount lifecycle for block device volumes and the startup
//! automount sweep.

pub mod lifecycle;
pub mod mounter;

pub use lifecycle::{
    MountRequest, MountState, SweepReport, UnmountOptions, VolumeManager, VolumeManagerConfig,
};
pub use mounter::SystemMounter;
