//! Mount Point Repository
//!
//! Single source of truth for persisted mount intent. Rows are soft-deleted
//! and never physically removed.

use super::Database;
use crate::domain::{MountFlags, MountPointKind, MountPointPath, RowState};
use crate::error::{Error, Result};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};

const COLUMNS: &str =
    "path, device_id, fstype, flags, data, startup_mount, kind, deleted_at, custom_path";

fn from_row(row: &Row<'_>) -> rusqlite::Result<MountPointPath> {
    let kind: String = row.get(6)?;
    let kind = kind
        .parse::<MountPointKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, e.into()))?;

    Ok(MountPointPath {
        path: row.get(0)?,
        device_id: row.get(1)?,
        fs_type: row.get(2)?,
        flags: MountFlags::from_bits_truncate(row.get::<_, u32>(3)?),
        data: row.get(4)?,
        is_to_mount_at_startup: row.get(5)?,
        is_custom_path: row.get(8)?,
        kind,
        state: RowState::from_column(row.get(7)?),
    })
}

#[derive(Clone)]
pub struct MountPointRepository {
    db: Database,
}

impl MountPointRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Any row for `path`, deleted or not
    pub fn get(&self, path: &str) -> Result<Option<MountPointPath>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM mount_point_paths WHERE path = ?1", COLUMNS),
                    params![path],
                    from_row,
                )
                .optional()?)
        })
    }

    /// The active row for `path`
    pub fn get_active(&self, path: &str) -> Result<Option<MountPointPath>> {
        Ok(self.get(path)?.filter(MountPointPath::is_active))
    }

    pub fn list_active(&self) -> Result<Vec<MountPointPath>> {
        self.query(
            &format!(
                "SELECT {} FROM mount_point_paths WHERE deleted_at IS NULL ORDER BY path",
                COLUMNS
            ),
            &[],
        )
    }

    /// Active addon-managed rows flagged for startup mounting
    pub fn list_startup(&self) -> Result<Vec<MountPointPath>> {
        self.query(
            &format!(
                "SELECT {} FROM mount_point_paths
                 WHERE deleted_at IS NULL AND startup_mount = 1 AND kind = 'addon'
                 ORDER BY path",
                COLUMNS
            ),
            &[],
        )
    }

    pub fn find_by_device_id(&self, device_id: &str) -> Result<Option<MountPointPath>> {
        if device_id.is_empty() {
            return Ok(None);
        }
        Ok(self
            .query(
                &format!(
                    "SELECT {} FROM mount_point_paths WHERE device_id = ?1 AND deleted_at IS NULL",
                    COLUMNS
                ),
                &[device_id],
            )?
            .into_iter()
            .next())
    }

    /// Insert or replace the row keyed by `mount_point.path`
    pub fn save(&self, mount_point: &MountPointPath) -> Result<()> {
        if !mount_point.device_id.is_empty() && mount_point.is_active() {
            if let Some(owner) = self.find_by_device_id(&mount_point.device_id)? {
                if owner.path != mount_point.path {
                    return Err(Error::DeviceIdInUse {
                        device_id: mount_point.device_id.clone(),
                        path: owner.path,
                    });
                }
            }
        }

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO mount_point_paths
                    (path, device_id, fstype, flags, data, startup_mount, kind, deleted_at, custom_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(path) DO UPDATE SET
                    device_id = excluded.device_id,
                    fstype = excluded.fstype,
                    flags = excluded.flags,
                    data = excluded.data,
                    startup_mount = excluded.startup_mount,
                    kind = excluded.kind,
                    deleted_at = excluded.deleted_at,
                    custom_path = excluded.custom_path",
                params![
                    mount_point.path,
                    mount_point.device_id,
                    mount_point.fs_type,
                    mount_point.flags.bits(),
                    mount_point.data,
                    mount_point.is_to_mount_at_startup,
                    mount_point.kind.to_string(),
                    mount_point.state.to_column(),
                    mount_point.is_custom_path,
                ],
            )?;
            Ok(())
        })
    }

    /// Mark a row deleted. Returns false if it already was.
    pub fn soft_delete(&self, path: &str) -> Result<bool> {
        let row = self.get(path)?.ok_or_else(|| Error::MountPointNotFound {
            path: path.to_string(),
        })?;
        if !row.is_active() {
            return Ok(false);
        }

        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE mount_point_paths SET deleted_at = ?1 WHERE path = ?2 AND deleted_at IS NULL",
                params![Utc::now().to_rfc3339(), path],
            )?;
            Ok(true)
        })
    }

    fn query(&self, sql: &str, args: &[&str]) -> Result<Vec<MountPointPath>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}
