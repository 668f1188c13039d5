//! Samba User Repository

use super::Database;
use crate::domain::SambaUser;
use crate::error::{Error, Result};
use rusqlite::{params, OptionalExtension, Row};

fn from_row(row: &Row<'_>) -> rusqlite::Result<SambaUser> {
    Ok(SambaUser {
        username: row.get(0)?,
        password: row.get(1)?,
        is_admin: row.get(2)?,
    })
}

#[derive(Clone)]
pub struct UserRepository {
    db: Database,
}

impl UserRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, username: &str) -> Result<Option<SambaUser>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT username, password, is_admin FROM samba_users WHERE username = ?1",
                    params![username],
                    from_row,
                )
                .optional()?)
        })
    }

    /// Admins first, then by name
    pub fn list(&self) -> Result<Vec<SambaUser>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT username, password, is_admin FROM samba_users ORDER BY is_admin DESC, username",
            )?;
            let rows = stmt.query_map([], from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    pub fn save(&self, user: &SambaUser) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO samba_users (username, password, is_admin) VALUES (?1, ?2, ?3)
                 ON CONFLICT(username) DO UPDATE SET password = excluded.password, is_admin = excluded.is_admin",
                params![user.username, user.password, user.is_admin],
            )?;
            Ok(())
        })
    }

    pub fn delete(&self, username: &str) -> Result<()> {
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM samba_users WHERE username = ?1", params![username])?)
        })?;
        if removed == 0 {
            return Err(Error::UserNotFound {
                username: username.to_string(),
            });
        }
        Ok(())
    }
}
