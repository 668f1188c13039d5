//! First-run import
//!
//! A JSON document describing the initial settings, users, mount points and
//! shares. It is imported once, when the store has no `ConfigVersion` yet.

use crate::domain::{ExportedShare, MountFlags, MountPointKind, MountPointPath, SambaUser};
use crate::error::{Error, Result};
use crate::samba::default_settings;
use crate::store::{MountPointRepository, PropertyRepository, ShareRepository, UserRepository};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapMount {
    pub path: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub fs_type: Option<String>,
    /// Comma separated, e.g. `ro,noatime`
    #[serde(default)]
    pub flags: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub mount_at_startup: bool,
    #[serde(default)]
    pub custom_path: bool,
}

impl BootstrapMount {
    fn to_row(&self) -> Result<MountPointPath> {
        let flags: MountFlags = self
            .flags
            .parse()
            .map_err(|e| Error::Configuration(format!("{}: {}", self.path, e)))?;
        let mut row = MountPointPath::new(&self.path, &self.device_id);
        row.fs_type = self.fs_type.clone();
        row.flags = flags;
        row.data = self.data.clone();
        row.is_to_mount_at_startup = self.mount_at_startup;
        row.is_custom_path = self.custom_path;
        row.kind = MountPointKind::Addon;
        Ok(row)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub users: Vec<SambaUser>,
    #[serde(default)]
    pub mount_points: Vec<BootstrapMount>,
    #[serde(default)]
    pub shares: Vec<ExportedShare>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            settings: default_settings()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            users: Vec::new(),
            mount_points: Vec::new(),
            shares: Vec::new(),
        }
    }
}

/// What an import wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub settings: usize,
    pub users: usize,
    pub mount_points: usize,
    pub shares: usize,
}

impl BootstrapConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Read `path`, or fall back to the built-in default when none is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Configuration(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_json(&raw)
            }
            None => Ok(Self::default()),
        }
    }

    /// Write everything to the store. Mount points go first so shares can
    /// reference them.
    pub fn import(
        &self,
        properties: &PropertyRepository,
        users: &UserRepository,
        mount_points: &MountPointRepository,
        shares: &ShareRepository,
    ) -> Result<ImportSummary> {
        for (key, value) in &self.settings {
            properties.set(key, value)?;
        }
        for user in &self.users {
            users.save(user)?;
        }
        for mount in &self.mount_points {
            mount_points.save(&mount.to_row()?)?;
        }
        for share in &self.shares {
            shares.save(share)?;
        }

        let summary = ImportSummary {
            settings: self.settings.len(),
            users: self.users.len(),
            mount_points: self.mount_points.len(),
            shares: self.shares.len(),
        };
        info!(
            "Imported {} settings, {} users, {} mount points, {} shares",
            summary.settings, summary.users, summary.mount_points, summary.shares
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::test_db;
    use assert_matches::assert_matches;

    const DOC: &str = r#"{
        "settings": {"workgroup": "HOMELAB", "multi_channel": true},
        "users": [{"username": "alice", "password": "pw", "is_admin": true}],
        "mount_points": [
            {"path": "/mnt/media", "device_id": "by-id-usb-disk-part1", "fs_type": "ext4",
             "flags": "noatime", "mount_at_startup": true}
        ],
        "shares": [{"name": "media", "mount_point_path": "/mnt/media", "usage": "media"}]
    }"#;

    #[test]
    fn test_import_document() {
        let db = test_db();
        let props = PropertyRepository::new(db.clone());
        let users = UserRepository::new(db.clone());
        let mounts = MountPointRepository::new(db.clone());
        let shares = ShareRepository::new(db);

        let config = BootstrapConfig::from_json(DOC).unwrap();
        let summary = config.import(&props, &users, &mounts, &shares).unwrap();
        assert_eq!(summary.shares, 1);

        let mp = mounts.get_active("/mnt/media").unwrap().unwrap();
        assert!(mp.is_to_mount_at_startup);
        assert!(mp.flags.contains(MountFlags::NOATIME));
        assert!(shares.get("media").unwrap().is_some());
        assert!(users.get("alice").unwrap().unwrap().is_admin);
        let wg: String = props.get_value("workgroup").unwrap().unwrap();
        assert_eq!(wg, "HOMELAB");
    }

    #[test]
    fn test_default_has_settings_only() {
        let config = BootstrapConfig::default();
        assert!(config.settings.contains_key("workgroup"));
        assert!(config.users.is_empty() && config.shares.is_empty());
        assert_eq!(BootstrapConfig::load(None).unwrap(), config);
    }

    #[test]
    fn test_bad_flags_rejected() {
        let db = test_db();
        let config = BootstrapConfig::from_json(
            r#"{"mount_points": [{"path": "/mnt/x", "flags": "turbo"}]}"#,
        )
        .unwrap();
        let err = config
            .import(
                &PropertyRepository::new(db.clone()),
                &UserRepository::new(db.clone()),
                &MountPointRepository::new(db.clone()),
                &ShareRepository::new(db),
            )
            .unwrap_err();
        assert_matches!(err, Error::Configuration(msg) if msg.contains("turbo"));
    }

    #[test]
    fn test_share_with_section_break_rejected() {
        let db = test_db();
        let config = BootstrapConfig::from_json(
            r#"{
                "mount_points": [{"path": "/mnt/media", "device_id": "by-id-A", "custom_path": true}],
                "shares": [{"name": "media]\n[global]", "mount_point_path": "/mnt/media", "usage": "media"}]
            }"#,
        )
        .unwrap();
        let shares = ShareRepository::new(db.clone());
        let mounts = MountPointRepository::new(db.clone());
        let err = config
            .import(
                &PropertyRepository::new(db.clone()),
                &UserRepository::new(db),
                &mounts,
                &shares,
            )
            .unwrap_err();
        assert_matches!(err, Error::InvalidShare { .. });
        assert!(shares.list().unwrap().is_empty());
        assert!(mounts.get_active("/mnt/media").unwrap().unwrap().is_custom_path);
    }

    #[test]
    fn test_missing_file() {
        assert_matches!(
            BootstrapConfig::load(Some(Path::new("/nonexistent/bootstrap.json"))),
            Err(Error::Configuration(_))
        );
    }
}
