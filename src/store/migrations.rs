//! Schema Migrations
//!
//! Ordered, additive migrations tracked through `PRAGMA user_version`.
//! Each step runs in its own transaction.
//!
//! Steps 3 and 4 retire the legacy raw `device` column: step 3 resolves each
//! legacy device name to a stable id (or soft-deletes rows whose device is
//! gone), step 4 drops the column. Both are no-ops once the column is absent.

use crate::error::{Error, Result};
use crate::hardware::StableIdResolver;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

/// Schema version after all migrations ran
pub const LATEST_VERSION: u32 = 4;

const V1_BASE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS mount_point_paths (
    path          TEXT PRIMARY KEY NOT NULL,
    device        TEXT NOT NULL DEFAULT '',
    fstype        TEXT,
    flags         INTEGER NOT NULL DEFAULT 0,
    startup_mount INTEGER NOT NULL DEFAULT 0,
    deleted_at    TEXT
);

CREATE TABLE IF NOT EXISTS properties (
    key      TEXT PRIMARY KEY NOT NULL,
    value    TEXT NOT NULL,
    internal INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS exported_shares (
    name             TEXT PRIMARY KEY NOT NULL,
    mount_point_path TEXT NOT NULL REFERENCES mount_point_paths(path) ON UPDATE CASCADE,
    usage            TEXT NOT NULL DEFAULT 'share',
    disabled         INTEGER NOT NULL DEFAULT 0,
    recycle_bin      INTEGER NOT NULL DEFAULT 0,
    guest_ok         INTEGER NOT NULL DEFAULT 0,
    read_only        INTEGER NOT NULL DEFAULT 0,
    users            TEXT NOT NULL DEFAULT '[]',
    ro_users         TEXT NOT NULL DEFAULT '[]',
    veto_files       TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS samba_users (
    username TEXT PRIMARY KEY NOT NULL,
    password TEXT NOT NULL,
    is_admin INTEGER NOT NULL DEFAULT 0
);
"#;

const V2_DEVICE_ID: &str = r#"
ALTER TABLE mount_point_paths ADD COLUMN device_id TEXT NOT NULL DEFAULT '';
ALTER TABLE mount_point_paths ADD COLUMN data TEXT;
ALTER TABLE mount_point_paths ADD COLUMN kind TEXT NOT NULL DEFAULT 'addon';
ALTER TABLE mount_point_paths ADD COLUMN custom_path INTEGER NOT NULL DEFAULT 0;
CREATE UNIQUE INDEX IF NOT EXISTS idx_mount_point_paths_device_id
    ON mount_point_paths(device_id)
    WHERE deleted_at IS NULL AND device_id <> '';
"#;

/// Rows touched by the device-id migration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub resolved: usize,
    pub soft_deleted: usize,
}

impl MigrationReport {
    pub fn touched(&self) -> usize {
        self.resolved + self.soft_deleted
    }
}

pub fn current_version(conn: &Connection) -> Result<u32> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version.max(0) as u32)
}

/// Apply every migration above the current version up to `target`
pub fn run_to(conn: &mut Connection, resolver: &StableIdResolver, target: u32) -> Result<u32> {
    let target = target.min(LATEST_VERSION);
    let mut version = current_version(conn)?;

    while version < target {
        let next = version + 1;
        let tx = conn.transaction()?;
        apply(&tx, next, resolver).map_err(|e| Error::Migration {
            version: next,
            reason: e.to_string(),
        })?;
        tx.pragma_update(None, "user_version", next)?;
        tx.commit()?;
        info!("Applied schema migration {}", next);
        version = next;
    }

    Ok(version)
}

fn apply(conn: &Connection, version: u32, resolver: &StableIdResolver) -> Result<()> {
    match version {
        1 => conn.execute_batch(V1_BASE_TABLES)?,
        2 => conn.execute_batch(V2_DEVICE_ID)?,
        3 => {
            let report = migrate_device_ids(conn, resolver)?;
            info!(
                "Device id migration: {} resolved, {} soft-deleted",
                report.resolved, report.soft_deleted
            );
        }
        4 => {
            if !drop_legacy_device_column(conn)? {
                info!("Legacy device column already gone");
            }
        }
        other => {
            return Err(Error::Internal(format!("unknown migration {}", other)));
        }
    }
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Replace legacy device names with stable ids.
///
/// A row whose device cannot be resolved is soft-deleted: the device is
/// presumed gone. A row resolving to an id another active row already owns
/// is soft-deleted as a duplicate. Rows already carrying an id, and deleted
/// rows, are never touched, so a second run reports zero changes.
pub fn migrate_device_ids(conn: &Connection, resolver: &StableIdResolver) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();
    if !has_column(conn, "mount_point_paths", "device")? {
        return Ok(report);
    }

    let pending: Vec<(String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT path, device FROM mount_point_paths
             WHERE deleted_at IS NULL AND device_id = '' AND device <> ''
             ORDER BY path",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    let now = Utc::now().to_rfc3339();
    for (path, device) in pending {
        let owner = match resolver.resolve(&device) {
            Some(id) => {
                let owner: Option<String> = conn
                    .query_row(
                        "SELECT path FROM mount_point_paths
                         WHERE device_id = ?1 AND deleted_at IS NULL AND path <> ?2",
                        params![id, path],
                        |row| row.get(0),
                    )
                    .optional()?;
                match owner {
                    None => {
                        conn.execute(
                            "UPDATE mount_point_paths SET device_id = ?1 WHERE path = ?2",
                            params![id, path],
                        )?;
                        report.resolved += 1;
                        continue;
                    }
                    Some(owner) => Some(owner),
                }
            }
            None => None,
        };

        match owner {
            Some(owner) => warn!(
                "Mount point {} resolves to a device already used by {}, marking deleted",
                path, owner
            ),
            None => warn!(
                "No stable id for device {} of mount point {}, marking deleted",
                device, path
            ),
        }
        conn.execute(
            "UPDATE mount_point_paths SET deleted_at = ?1 WHERE path = ?2",
            params![now, path],
        )?;
        report.soft_deleted += 1;
    }

    Ok(report)
}

/// Drop the legacy `device` column if it is still there
pub fn drop_legacy_device_column(conn: &Connection) -> Result<bool> {
    if !has_column(conn, "mount_point_paths", "device")? {
        return Ok(false);
    }
    conn.execute_batch("ALTER TABLE mount_point_paths DROP COLUMN device")?;
    info!("Dropped legacy device column");
    Ok(true)
}
