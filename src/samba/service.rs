//! Samba Reconciliation Service
//!
//! Renders smb.conf from persisted settings, shares and users, validates it
//! with `testparm`, swaps it into place and asks smbd to reload. Dirty flags
//! are cleared only after the whole cycle succeeds.

use super::dirty::DirtyStateTracker;
use super::template::{self, RenderContext};
use crate::domain::ports::{ReloadOutcome, SambaDaemon};
use crate::domain::{ApplyPhase, DirtyData, ExportedShare, SambaStatus};
use crate::error::Result;
use crate::events::{Event, EventBus, EventContext};
use crate::store::{MountPointRepository, PropertyRepository, ShareRepository};
use serde_json::json;
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Account the host supervisor uses to mount exported shares
pub const MOUNT_USER: &str = "_ha_mount_user_";

const CONFIG_MODE: u32 = 0o600;

/// Settings every rendered config can rely on; persisted values override them
pub fn default_settings() -> Vec<(&'static str, serde_json::Value)> {
    vec![
        ("workgroup", json!("WORKGROUP")),
        ("server_string", json!("nas")),
        ("local_master", json!(true)),
        ("hosts_allow", json!(["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16", "fe80::/10"])),
        ("interfaces", json!([])),
        ("bind_interfaces_only", json!(false)),
        ("multi_channel", json!(false)),
        ("compatibility_mode", json!("SMB2_10")),
    ]
}

#[derive(Debug, Clone)]
pub struct SambaConfig {
    /// Where smb.conf is written
    pub config_path: PathBuf,
    /// Template source
    pub template: String,
}

impl Default for SambaConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/samba/smb.conf"),
            template: template::DEFAULT_TEMPLATE.to_string(),
        }
    }
}

pub struct SambaService {
    config: SambaConfig,
    shares: ShareRepository,
    mount_points: MountPointRepository,
    properties: PropertyRepository,
    daemon: Arc<dyn SambaDaemon>,
    tracker: Arc<DirtyStateTracker>,
    bus: Arc<EventBus>,
}

impl SambaService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SambaConfig,
        shares: ShareRepository,
        mount_points: MountPointRepository,
        properties: PropertyRepository,
        daemon: Arc<dyn SambaDaemon>,
        tracker: Arc<DirtyStateTracker>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            shares,
            mount_points,
            properties,
            daemon,
            tracker,
            bus,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config.config_path
    }

    pub fn tracker(&self) -> &Arc<DirtyStateTracker> {
        &self.tracker
    }

    /// Shares that make it into smb.conf: enabled and backed by an active
    /// mount point, ordered by name
    pub fn exported_shares(&self) -> Result<Vec<ExportedShare>> {
        let mut out = Vec::new();
        for share in self.shares.list()? {
            if share.disabled {
                debug!("Skipping disabled share {}", share.name);
                continue;
            }
            if self.mount_points.get_active(&share.mount_point_path)?.is_none() {
                debug!(
                    "Skipping share {}: mount point {} is gone",
                    share.name, share.mount_point_path
                );
                continue;
            }
            out.push(share);
        }
        Ok(out)
    }

    /// Render smb.conf from the current persisted state
    pub fn render_config(&self) -> Result<String> {
        self.render_shares_config(&self.exported_shares()?)
    }

    fn render_shares_config(&self, shares: &[ExportedShare]) -> Result<String> {
        let mut ctx = RenderContext::new();
        for (key, value) in default_settings() {
            ctx.insert_json(key, &value);
        }
        for property in self.properties.list_public()? {
            ctx.insert_json(property.key, &property.value);
        }
        ctx.insert("version", crate::VERSION);
        ctx.insert("shares", render_shares(shares));

        template::render(&self.config.template, &ctx)
    }

    /// Write `contents` to the config path with owner-only permissions
    pub fn write_config(&self, contents: &str) -> Result<()> {
        write_private(&self.config.config_path, contents)
    }

    /// Render, validate, install and reload.
    ///
    /// The dirty flags seen at the start are cleared on success; on any
    /// failure they stay set and the previous config file is left in place.
    #[instrument(skip(self), fields(path = %self.config.config_path.display()))]
    pub fn write_and_restart(&self) -> Result<SambaStatus> {
        let snapshot = self.tracker.snapshot();
        let ctx = EventContext::new();

        let shares = self.exported_shares()?;
        let rendered = self.render_shares_config(&shares)?;
        let staging = staging_path(&self.config.config_path);
        write_private(&staging, &rendered)?;

        if let Err(e) = self.daemon.test_config(&staging) {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }
        fs::rename(&staging, &self.config.config_path)?;

        let outcome = self.daemon.reload()?;
        self.tracker.clear(snapshot);

        let status = SambaStatus {
            config_path: self.config.config_path.display().to_string(),
            shares: shares.len(),
            reloaded: outcome == ReloadOutcome::Reloaded,
            message: match outcome {
                ReloadOutcome::Reloaded => None,
                ReloadOutcome::NotRunning => Some("smbd not running".to_string()),
            },
        };
        info!("Samba config applied ({} shares)", status.shares);

        self.bus.emit_samba_in(&ctx, Event::update(status.clone()));
        self.bus.emit_dirty_data_in(
            &ctx,
            Event::update(DirtyData {
                sections: snapshot,
                phase: ApplyPhase::Clean,
            }),
        );
        Ok(status)
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".new");
    path.with_file_name(name)
}

fn write_private(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(CONFIG_MODE)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(fs::Permissions::from_mode(CONFIG_MODE))?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn render_shares(shares: &[ExportedShare]) -> String {
    let mut out = String::new();
    for share in shares {
        let _ = writeln!(out, "[{}]", share.name);
        let _ = writeln!(out, "   path = {}", share.mount_point_path);
        let _ = writeln!(out, "   browseable = yes");
        let _ = writeln!(out, "   writeable = {}", yes_no(!share.read_only));
        let _ = writeln!(out, "   guest ok = {}", yes_no(share.guest_ok));
        let _ = writeln!(out, "   create mask = 0664");
        let _ = writeln!(out, "   directory mask = 0775");

        let mut valid: Vec<&str> = share
            .users
            .iter()
            .chain(share.ro_users.iter())
            .map(String::as_str)
            .collect();
        if !valid.is_empty() {
            if share.usage.is_externally_exported() {
                valid.insert(0, MOUNT_USER);
            }
            let _ = writeln!(out, "   valid users = {}", valid.join(" "));
        }
        if !share.ro_users.is_empty() {
            let _ = writeln!(out, "   read list = {}", share.ro_users.join(" "));
        }
        if !share.veto_files.is_empty() {
            let _ = writeln!(out, "   veto files = /{}/", share.veto_files.join("/"));
            let _ = writeln!(out, "   delete veto files = yes");
        }

        let mut vfs = vec!["catia", "fruit", "streams_xattr"];
        if share.recycle_bin {
            vfs.push("recycle");
        }
        let _ = writeln!(out, "   vfs objects = {}", vfs.join(" "));
        if share.recycle_bin {
            let _ = writeln!(out, "   recycle:repository = .recycle/%U");
            let _ = writeln!(out, "   recycle:keeptree = yes");
            let _ = writeln!(out, "   recycle:versions = yes");
            let _ = writeln!(out, "   recycle:touch = yes");
        }
        out.push('\n');
    }
    out
}
