//! NAS Share Reconciler
//!
//! Keeps a NAS host's block device mounts and Samba configuration in line
//! with a persisted desired state.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                       Startup / Shutdown Orchestrator                        │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  Volume/Mount   │  │  Samba Service  │  │     Share Exporter          │  │
//! │  │  Lifecycle      │  │  (render/apply) │  │     (supervisor)            │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           │ emit               │ clear                   │                   │
//! │           ▼                    ▲                         │                   │
//! │  ┌────────────────────────────────────────┐              │                   │
//! │  │  Event Bus  ──mark──▶  Dirty Tracker   │              │                   │
//! │  └────────────────────────────────────────┘              │                   │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                              Persistence                                     │
//! │        mount points · shares · properties · users   (SQLite, migrated)       │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                           Hardware Discovery                                 │
//! │   by-id resolver   ·   lsblk interpreter   ·   SG/ATA support check          │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: startup/shutdown orchestration and first-run import
//! - [`domain`]: persisted model, event payloads and ports
//! - [`error`]: error types and classification
//! - [`events`]: typed in-process event bus
//! - [`hardware`]: block device discovery
//! - [`samba`]: dirty tracking and smb.conf reconciliation
//! - [`store`]: SQLite repositories and migrations
//! - [`supervisor`]: host supervisor share exports
//! - [`volume`]: mount/unmount lifecycle

pub mod controlplane;
pub mod domain;
pub mod error;
pub mod events;
pub mod hardware;
pub mod samba;
pub mod store;
pub mod supervisor;
pub mod volume;

// Re-export commonly used types
pub use controlplane::{
    BootstrapConfig, Components, Orchestrator, OrchestratorConfig, OrchestratorPhase,
    OrchestratorStatus, StartupReport,
};

pub use domain::ports::{
    CommandRunner, Mounter, SambaDaemon, SupervisorApi,
};

pub use error::{Error, ErrorKind, Result};

pub use events::{Event, EventBus, EventContext, EventKind};

pub use hardware::{
    BlockDeviceInterpreter, DeviceSupportChecker, ResolverConfig, StableIdResolver,
    SystemCommandRunner,
};

pub use samba::{
    AccountProvisioner, DirtyStateTracker, SambaConfig, SambaService, SystemSambaDaemon,
};

pub use store::Database;

pub use supervisor::{NoopSupervisor, ShareExporter};

pub use volume::{SystemMounter, VolumeManager, VolumeManagerConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
