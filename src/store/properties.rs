//! Property Repository
//!
//! Key/value rows holding user settings, generated secrets and version
//! markers. Values are stored as JSON text.

use super::Database;
use crate::domain::Property;
use crate::error::Result;
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Marker written once the first-time import completed
pub const CONFIG_VERSION: &str = "ConfigVersion";
/// Log level the service last started with
pub const LOG_LEVEL: &str = "LogLevel";
/// Password of the internal mount-bridging account
pub const MOUNT_USER_PASSWORD: &str = "MountUserPassword";

#[derive(Clone)]
pub struct PropertyRepository {
    db: Database,
}

impl PropertyRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, key: &str) -> Result<Option<Property>> {
        let row: Option<(String, bool)> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value, internal FROM properties WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })?;

        match row {
            Some((raw, internal)) => Ok(Some(Property {
                key: key.to_string(),
                value: serde_json::from_str(&raw)?,
                internal,
            })),
            None => Ok(None),
        }
    }

    /// Typed value of a property
    pub fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(prop) => Ok(Some(serde_json::from_value(prop.value)?)),
            None => Ok(None),
        }
    }

    /// Store a user-facing setting
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.put(key, serde_json::to_value(value)?, false)
    }

    /// Store a value hidden from settings views
    pub fn set_internal<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.put(key, serde_json::to_value(value)?, true)
    }

    /// Non-internal properties ordered by key
    pub fn list_public(&self) -> Result<Vec<Property>> {
        let rows: Vec<(String, String)> = self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT key, value FROM properties WHERE internal = 0 ORDER BY key")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;

        rows.into_iter()
            .map(|(key, raw)| {
                Ok(Property {
                    key,
                    value: serde_json::from_str(&raw)?,
                    internal: false,
                })
            })
            .collect()
    }

    fn put(&self, key: &str, value: serde_json::Value, internal: bool) -> Result<()> {
        let raw = serde_json::to_string(&value)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO properties (key, value, internal) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, internal = excluded.internal",
                params![key, raw, internal],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::test_db;

    #[test]
    fn test_set_get_typed() {
        let props = PropertyRepository::new(test_db());
        props.set("Workgroup", "HOME").unwrap();
        props.set("Hosts", &vec!["10.0.0.0/8", "192.168.0.0/16"]).unwrap();

        let workgroup: Option<String> = props.get_value("Workgroup").unwrap();
        assert_eq!(workgroup.as_deref(), Some("HOME"));
        let hosts: Vec<String> = props.get_value("Hosts").unwrap().unwrap();
        assert_eq!(hosts.len(), 2);
        assert!(props.get("Missing").unwrap().is_none());
    }

    #[test]
    fn test_internal_hidden_from_public_listing() {
        let props = PropertyRepository::new(test_db());
        props.set("Workgroup", "HOME").unwrap();
        props.set_internal(MOUNT_USER_PASSWORD, "s3cret").unwrap();
        props.set_internal(CONFIG_VERSION, &1).unwrap();

        let public = props.list_public().unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].key, "Workgroup");

        let secret = props.get(MOUNT_USER_PASSWORD).unwrap().unwrap();
        assert!(secret.internal);
    }

    #[test]
    fn test_overwrite() {
        let props = PropertyRepository::new(test_db());
        props.set(LOG_LEVEL, "info").unwrap();
        props.set(LOG_LEVEL, "debug").unwrap();
        let level: String = props.get_value(LOG_LEVEL).unwrap().unwrap();
        assert_eq!(level, "debug");
    }
}
