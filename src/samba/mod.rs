//! Samba configuration reconciliation
//!
//! - [`dirty`]: which sections changed since the last apply
//! - [`template`]: `{{ key }}` smb.conf templates
//! - [`service`]: render, validate, install and reload
//! - [`auto_apply`]: debounced background apply
//! - [`accounts`]: OS/Samba user provisioning

pub mod accounts;
pub mod auto_apply;
pub mod daemon;
pub mod dirty;
pub mod service;
pub mod template;

pub use accounts::AccountProvisioner;
pub use auto_apply::AutoApply;
pub use daemon::SystemSambaDaemon;
pub use dirty::{DirtyStateTracker, Section};
pub use service::{default_settings, SambaConfig, SambaService, MOUNT_USER};
pub use template::{render, RenderContext, DEFAULT_TEMPLATE};
