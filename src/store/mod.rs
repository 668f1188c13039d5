//! Persistence Module
//!
//! SQLite-backed repositories for the desired state: mount points, exported
//! shares, properties and Samba users. One connection is shared behind a
//! mutex; repositories are cheap clones of the same [`Database`] handle.

pub mod migrations;
pub mod mount_points;
pub mod properties;
pub mod shares;
pub mod users;

pub use migrations::{MigrationReport, LATEST_VERSION};
pub use mount_points::MountPointRepository;
pub use properties::PropertyRepository;
pub use shares::ShareRepository;
pub use users::UserRepository;

use crate::error::Result;
use crate::hardware::StableIdResolver;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Shared database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        info!("Opened database {:?}", path);
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Bring the schema up to date
    pub fn migrate(&self, resolver: &StableIdResolver) -> Result<u32> {
        self.migrate_to(resolver, LATEST_VERSION)
    }

    /// Bring the schema up to `target`
    pub fn migrate_to(&self, resolver: &StableIdResolver, target: u32) -> Result<u32> {
        let mut conn = self.conn.lock();
        migrations::run_to(&mut conn, resolver, target)
    }

    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.conn.lock();
        migrations::current_version(&conn)
    }

    /// Run `f` with the connection locked
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` inside a transaction, committing on `Ok`
    pub fn with_tx<T>(&self, f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}
