use duckdb::Connection;
use r2d2::ManageConnection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::db::DbError;

/// Pools connections to one DuckDB file.
///
/// DuckDB allows a single database instance per file and process, so every pooled
/// connection is cloned from one root connection instead of reopening the file.
pub struct DuckDBConnectionManager {
    path: PathBuf,
    root: Mutex<Connection>,
}

impl DuckDBConnectionManager {
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let root = Connection::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            root: Mutex::new(root),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = DbError;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let root = self
            .root
            .lock()
            .map_err(|_| DbError::Connection(format!("root connection for {} poisoned", self.path.display())))?;
        Ok(root.try_clone()?)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
