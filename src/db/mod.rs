pub mod db_pool;
pub mod duckdb_database;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("{0}")]
    Query(#[from] duckdb::Error),
    #[error("result formatting error: {0}")]
    Format(#[from] arrow::error::ArrowError),
    #[error("database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Connection details for one database, as supplied to registry initialization.
#[derive(Clone, Deserialize, Serialize)]
pub struct DatabaseCredentials {
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl DatabaseCredentials {
    /// Registry key for these credentials
    pub fn registry_name(&self) -> String {
        normalize_name(&self.database)
    }
}

// Keep the password out of logs
impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

/// Canonical form of a logical database name: trimmed and lower-cased.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Raw outcome of running one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows {
        columns: Vec<String>,
        row_count: usize,
        /// Pretty-printed table of the returned rows
        rendered: String,
    },
    Affected(usize),
}

impl fmt::Display for QueryOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOutput::Rows { columns, row_count: 0, .. } => {
                write!(f, "No rows returned (columns: {})", columns.join(", "))
            }
            QueryOutput::Rows { row_count, rendered, .. } => {
                write!(f, "{} row(s)\n{}", row_count, rendered)
            }
            QueryOutput::Affected(n) => write!(f, "{} row(s) affected", n),
        }
    }
}

/// A registered database: reports its schema and runs single statements.
#[async_trait]
pub trait SqlDatabase: Send + Sync {
    fn name(&self) -> &str;

    /// Schema description handed to the planner prompt
    async fn table_info(&self) -> Result<String, DbError>;

    async fn run(&self, sql: &str) -> Result<QueryOutput, DbError>;
}

/// Opens databases from credentials during registry initialization.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    async fn connect(&self, credentials: &DatabaseCredentials) -> Result<Arc<dyn SqlDatabase>, DbError>;
}
