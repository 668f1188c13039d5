//! Exported Share Repository

use super::Database;
use crate::domain::{ExportedShare, ShareUsage};
use crate::error::{Error, Result};
use crate::samba::accounts::validate_username;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};

const COLUMNS: &str =
    "name, mount_point_path, usage, disabled, recycle_bin, guest_ok, read_only, users, ro_users, veto_files";

fn json_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<ExportedShare> {
    let usage: String = row.get(2)?;
    let usage = usage
        .parse::<ShareUsage>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into()))?;

    Ok(ExportedShare {
        name: row.get(0)?,
        mount_point_path: row.get(1)?,
        usage,
        disabled: row.get(3)?,
        recycle_bin: row.get(4)?,
        guest_ok: row.get(5)?,
        read_only: row.get(6)?,
        users: json_list(row, 7)?,
        ro_users: json_list(row, 8)?,
        veto_files: json_list(row, 9)?,
    })
}

/// Longest share name smb.conf section headers accept
const MAX_SHARE_NAME_LEN: usize = 80;

fn invalid(share: &ExportedShare, reason: impl Into<String>) -> Error {
    Error::InvalidShare {
        name: share.name.clone(),
        reason: reason.into(),
    }
}

/// Every field of a share ends up on its own smb.conf line, so none of
/// them may carry line breaks or section delimiters.
fn validate(share: &ExportedShare) -> Result<()> {
    let name = share.name.as_str();
    if name.trim().is_empty() {
        return Err(invalid(share, "empty name"));
    }
    if name.chars().count() > MAX_SHARE_NAME_LEN {
        return Err(invalid(share, format!("name longer than {} characters", MAX_SHARE_NAME_LEN)));
    }
    if name.chars().any(|c| c.is_control() || matches!(c, '[' | ']')) {
        return Err(invalid(share, "name contains brackets or control characters"));
    }
    if share.mount_point_path.chars().any(char::is_control) {
        return Err(invalid(share, "mount point path contains control characters"));
    }
    for user in share.users.iter().chain(&share.ro_users) {
        validate_username(user).map_err(|_| invalid(share, format!("invalid user {:?}", user)))?;
    }
    for pattern in &share.veto_files {
        if pattern.is_empty() || pattern.contains('/') || pattern.chars().any(char::is_control) {
            return Err(invalid(share, format!("invalid veto pattern {:?}", pattern)));
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct ShareRepository {
    db: Database,
}

impl ShareRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, name: &str) -> Result<Option<ExportedShare>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM exported_shares WHERE name = ?1", COLUMNS),
                    params![name],
                    from_row,
                )
                .optional()?)
        })
    }

    /// All shares ordered by name
    pub fn list(&self) -> Result<Vec<ExportedShare>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM exported_shares ORDER BY name",
                COLUMNS
            ))?;
            let rows = stmt.query_map([], from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Insert or replace a share. Its mount point must exist and be active.
    pub fn save(&self, share: &ExportedShare) -> Result<()> {
        validate(share)?;
        let users = serde_json::to_string(&share.users)?;
        let ro_users = serde_json::to_string(&share.ro_users)?;
        let veto_files = serde_json::to_string(&share.veto_files)?;

        self.db.with_tx(|tx| {
            let active: bool = tx
                .query_row(
                    "SELECT deleted_at IS NULL FROM mount_point_paths WHERE path = ?1",
                    params![share.mount_point_path],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(false);
            if !active {
                return Err(Error::MountPointNotFound {
                    path: share.mount_point_path.clone(),
                });
            }

            tx.execute(
                "INSERT INTO exported_shares
                    (name, mount_point_path, usage, disabled, recycle_bin, guest_ok, read_only, users, ro_users, veto_files)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(name) DO UPDATE SET
                    mount_point_path = excluded.mount_point_path,
                    usage = excluded.usage,
                    disabled = excluded.disabled,
                    recycle_bin = excluded.recycle_bin,
                    guest_ok = excluded.guest_ok,
                    read_only = excluded.read_only,
                    users = excluded.users,
                    ro_users = excluded.ro_users,
                    veto_files = excluded.veto_files",
                params![
                    share.name,
                    share.mount_point_path,
                    share.usage.to_string(),
                    share.disabled,
                    share.recycle_bin,
                    share.guest_ok,
                    share.read_only,
                    users,
                    ro_users,
                    veto_files,
                ],
            )?;
            Ok(())
        })
    }

    /// Remove a share. The mount point is left alone.
    pub fn delete(&self, name: &str) -> Result<()> {
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM exported_shares WHERE name = ?1", params![name])?)
        })?;
        if removed == 0 {
            return Err(Error::ShareNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}
