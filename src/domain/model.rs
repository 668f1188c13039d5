//! Persisted Domain Model
//!
//! Rows owned by the repositories: mount points, exported shares, properties
//! and Samba users, plus the mount flag bitmask stored alongside mount points.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Row State
// =============================================================================

/// Visibility of a soft-deletable row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "at", rename_all = "lowercase")]
pub enum RowState {
    Active,
    Deleted(DateTime<Utc>),
}

impl RowState {
    pub fn is_active(&self) -> bool {
        matches!(self, RowState::Active)
    }

    pub(crate) fn from_column(deleted_at: Option<String>) -> Self {
        match deleted_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()) {
            Some(at) => RowState::Deleted(at.with_timezone(&Utc)),
            None => RowState::Active,
        }
    }

    pub(crate) fn to_column(self) -> Option<String> {
        match self {
            RowState::Active => None,
            RowState::Deleted(at) => Some(at.to_rfc3339()),
        }
    }
}

// =============================================================================
// Mount Flags
// =============================================================================

/// Mount flag bitmask persisted with a mount point
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MountFlags(u32);

bitflags! {
    impl MountFlags: u32 {
        const RDONLY = 1 << 0;
        const NOSUID = 1 << 1;
        const NODEV = 1 << 2;
        const NOEXEC = 1 << 3;
        const SYNC = 1 << 4;
        const NOATIME = 1 << 5;
        const RELATIME = 1 << 6;
        const LAZYTIME = 1 << 7;
        const BIND = 1 << 8;
    }
}

impl MountFlags {
    const NAMED: [(MountFlags, &'static str); 9] = [
        (MountFlags::RDONLY, "ro"),
        (MountFlags::NOSUID, "nosuid"),
        (MountFlags::NODEV, "nodev"),
        (MountFlags::NOEXEC, "noexec"),
        (MountFlags::SYNC, "sync"),
        (MountFlags::NOATIME, "noatime"),
        (MountFlags::RELATIME, "relatime"),
        (MountFlags::LAZYTIME, "lazytime"),
        (MountFlags::BIND, "bind"),
    ];

    /// Option names of the set flags, in a fixed order
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(f, _)| self.contains(*f))
            .map(|(_, n)| *n)
            .collect()
    }

    /// Kernel mount flags
    pub fn to_ms_flags(self) -> nix::mount::MsFlags {
        use nix::mount::MsFlags;

        let mut ms = MsFlags::empty();
        for (flag, bit) in [
            (MountFlags::RDONLY, MsFlags::MS_RDONLY),
            (MountFlags::NOSUID, MsFlags::MS_NOSUID),
            (MountFlags::NODEV, MsFlags::MS_NODEV),
            (MountFlags::NOEXEC, MsFlags::MS_NOEXEC),
            (MountFlags::SYNC, MsFlags::MS_SYNCHRONOUS),
            (MountFlags::NOATIME, MsFlags::MS_NOATIME),
            (MountFlags::RELATIME, MsFlags::MS_RELATIME),
            (MountFlags::LAZYTIME, MsFlags::MS_LAZYTIME),
            (MountFlags::BIND, MsFlags::MS_BIND),
        ] {
            if self.contains(flag) {
                ms |= bit;
            }
        }
        ms
    }
}

impl fmt::Display for MountFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join(","))
    }
}

impl FromStr for MountFlags {
    type Err = String;

    /// Parses a comma separated option list such as `ro,noatime`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = MountFlags::empty();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let part = part.to_lowercase();
            let (flag, _) = Self::NAMED
                .iter()
                .find(|(_, name)| *name == part)
                .ok_or_else(|| format!("unknown mount flag: {}", part))?;
            flags.insert(*flag);
        }
        Ok(flags)
    }
}

// =============================================================================
// Mount Points
// =============================================================================

/// Who owns a mount point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountPointKind {
    /// Managed by this service (automounted)
    Addon,
    /// Mounted by the host, only observed here
    Host,
}

impl fmt::Display for MountPointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountPointKind::Addon => write!(f, "addon"),
            MountPointKind::Host => write!(f, "host"),
        }
    }
}

impl FromStr for MountPointKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "addon" => Ok(MountPointKind::Addon),
            "host" => Ok(MountPointKind::Host),
            other => Err(format!("unknown mount point kind: {}", other)),
        }
    }
}

/// A persisted mount point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPointPath {
    /// Absolute mount path, the primary key
    pub path: String,
    /// `by-id-<name>` once resolved, empty otherwise
    pub device_id: String,
    /// Filesystem type, `None` means probe at mount time
    pub fs_type: Option<String>,
    pub flags: MountFlags,
    /// Filesystem specific mount data (e.g. `uid=1000`)
    pub data: Option<String>,
    pub is_to_mount_at_startup: bool,
    /// Path chosen by the user rather than derived from the device
    #[serde(default)]
    pub is_custom_path: bool,
    pub kind: MountPointKind,
    pub state: RowState,
}

impl MountPointPath {
    pub fn new(path: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            device_id: device_id.into(),
            fs_type: None,
            flags: MountFlags::empty(),
            data: None,
            is_to_mount_at_startup: false,
            is_custom_path: false,
            kind: MountPointKind::Addon,
            state: RowState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

// =============================================================================
// Exported Shares
// =============================================================================

/// What a share is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareUsage {
    Media,
    Share,
    Backup,
    Internal,
}

impl ShareUsage {
    /// Usages exported to the host supervisor
    pub fn is_externally_exported(&self) -> bool {
        matches!(self, ShareUsage::Media | ShareUsage::Share | ShareUsage::Backup)
    }
}

impl fmt::Display for ShareUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareUsage::Media => write!(f, "media"),
            ShareUsage::Share => write!(f, "share"),
            ShareUsage::Backup => write!(f, "backup"),
            ShareUsage::Internal => write!(f, "internal"),
        }
    }
}

impl FromStr for ShareUsage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "media" => Ok(ShareUsage::Media),
            "share" => Ok(ShareUsage::Share),
            "backup" => Ok(ShareUsage::Backup),
            "internal" => Ok(ShareUsage::Internal),
            other => Err(format!("unknown share usage: {}", other)),
        }
    }
}

/// A Samba share backed by a mount point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedShare {
    pub name: String,
    pub mount_point_path: String,
    pub usage: ShareUsage,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub recycle_bin: bool,
    #[serde(default)]
    pub guest_ok: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub ro_users: Vec<String>,
    #[serde(default)]
    pub veto_files: Vec<String>,
}

impl ExportedShare {
    pub fn new(name: impl Into<String>, mount_point_path: impl Into<String>, usage: ShareUsage) -> Self {
        Self {
            name: name.into(),
            mount_point_path: mount_point_path.into(),
            usage,
            disabled: false,
            recycle_bin: false,
            guest_ok: false,
            read_only: false,
            users: Vec::new(),
            ro_users: Vec::new(),
            veto_files: Vec::new(),
        }
    }
}

// =============================================================================
// Properties & Users
// =============================================================================

/// Generic key/value row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    pub value: serde_json::Value,
    /// Hidden from user-facing settings
    pub internal: bool,
}

/// A persisted Samba account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SambaUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
}
