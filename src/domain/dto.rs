//! Event Payloads
//!
//! Read-through views carried by event bus payloads. None of these are
//! persisted; they are built on demand from live system state or from rows.

use super::model::{ExportedShare, MountFlags, MountPointPath, SambaUser};
use serde::{Deserialize, Serialize};

// =============================================================================
// Block Devices
// =============================================================================

/// A whole disk and its partitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    /// Kernel name (`sda`)
    pub name: String,
    pub device_path: String,
    pub stable_id: Option<String>,
    pub size_bytes: u64,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub partitions: Vec<Partition>,
}

/// A partition of a [`Disk`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    pub disk: String,
    pub device_path: String,
    pub stable_id: Option<String>,
    pub size_bytes: u64,
    pub label: String,
    pub partition_label: String,
    pub fs_type: String,
    pub mountpoint: String,
}

/// A mountable filesystem as seen by external consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub device_path: String,
    pub fs_type: String,
    pub mount_point: Option<String>,
}

// =============================================================================
// Mount Points
// =============================================================================

/// Observed state of a mount point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPointData {
    pub path: String,
    pub device_id: String,
    /// Device node the mount was issued against
    pub source: String,
    pub fs_type: String,
    pub flags: MountFlags,
    pub is_mounted: bool,
    pub is_to_mount_at_startup: bool,
}

impl MountPointData {
    pub fn from_row(row: &MountPointPath, source: impl Into<String>, is_mounted: bool) -> Self {
        Self {
            path: row.path.clone(),
            device_id: row.device_id.clone(),
            source: source.into(),
            fs_type: row.fs_type.clone().unwrap_or_default(),
            flags: row.flags,
            is_mounted,
            is_to_mount_at_startup: row.is_to_mount_at_startup,
        }
    }
}

/// Shares travel on the bus as-is
pub type SharedResource = ExportedShare;

// =============================================================================
// Users & Settings
// =============================================================================

/// A Samba account without its secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub is_admin: bool,
}

impl From<&SambaUser> for User {
    fn from(user: &SambaUser) -> Self {
        Self {
            username: user.username.clone(),
            is_admin: user.is_admin,
        }
    }
}

/// One user-facing setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: serde_json::Value,
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Outcome of a Samba write/reload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SambaStatus {
    pub config_path: String,
    pub shares: usize,
    pub reloaded: bool,
    pub message: Option<String>,
}

/// The four sections tracked for re-rendering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtySections {
    pub shares: bool,
    pub users: bool,
    pub volumes: bool,
    pub settings: bool,
}

impl DirtySections {
    pub fn all() -> Self {
        Self {
            shares: true,
            users: true,
            volumes: true,
            settings: true,
        }
    }

    pub fn any(&self) -> bool {
        self.shares || self.users || self.volumes || self.settings
    }
}

/// Where an apply cycle is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyPhase {
    /// Debounce elapsed, apply about to run
    Pending,
    /// Config written and daemon reloaded
    Clean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyData {
    pub sections: DirtySections,
    pub phase: ApplyPhase,
}

/// Connectivity to the host supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeAssistantState {
    pub connected: bool,
    pub message: Option<String>,
}
