use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use async_trait::async_trait;
use duckdb::Connection;
use r2d2::Pool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::{DatabaseConnector, DatabaseCredentials, DbError, QueryOutput, SqlDatabase};
use crate::util::sql::returns_rows;

/// Rows of sample data included per table in the schema description
const SAMPLE_ROWS: usize = 3;

/// Hosts that mean "the configured data directory"
const LOCAL_HOSTS: &[&str] = &["", "localhost", "127.0.0.1"];

pub struct DuckDbDatabase {
    name: String,
    pool: Pool<DuckDBConnectionManager>,
}

impl DuckDbDatabase {
    pub fn new(name: String, pool: Pool<DuckDBConnectionManager>) -> Self {
        Self { name, pool }
    }
}

#[async_trait]
impl SqlDatabase for DuckDbDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn table_info(&self) -> Result<String, DbError> {
        let pool = self.pool.clone();

        // DuckDB calls block, keep them off the async workers
        tokio::task::spawn_blocking(move || -> Result<String, DbError> {
            let conn = pool.get()?;
            describe_tables(&conn)
        })
        .await?
    }

    async fn run(&self, sql: &str) -> Result<QueryOutput, DbError> {
        let pool = self.pool.clone();
        let sql = sql.to_string();
        let name = self.name.clone();

        let output = tokio::task::spawn_blocking(move || -> Result<QueryOutput, DbError> {
            let start_time = std::time::Instant::now();
            let conn = pool.get()?;
            let output = execute_statement(&conn, &sql)?;
            debug!(
                "Statement on '{}' finished in {}ms",
                name,
                start_time.elapsed().as_millis()
            );
            Ok(output)
        })
        .await??;

        Ok(output)
    }
}

fn execute_statement(conn: &Connection, sql: &str) -> Result<QueryOutput, DbError> {
    if !returns_rows(sql) {
        let affected = conn.execute(sql, [])?;
        return Ok(QueryOutput::Affected(affected));
    }

    let mut stmt = conn.prepare(sql)?;
    let arrow_batch = stmt.query_arrow([])?;
    let schema = arrow_batch.get_schema();

    let columns = schema
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect::<Vec<String>>();

    let record_batches: Vec<RecordBatch> = arrow_batch.collect();
    let row_count: usize = record_batches.iter().map(|batch| batch.num_rows()).sum();
    let rendered = pretty_format_batches(&record_batches)?.to_string();

    Ok(QueryOutput::Rows {
        columns,
        row_count,
        rendered,
    })
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Renders one CREATE TABLE statement per table in `main`, each followed by a few sample rows.
fn describe_tables(conn: &Connection) -> Result<String, DbError> {
    let mut tables_stmt = conn.prepare(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = 'main' AND table_type = 'BASE TABLE' ORDER BY table_name",
    )?;
    let tables: Vec<String> = tables_stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<_, duckdb::Error>>()?;

    if tables.is_empty() {
        return Ok("No tables found in this database.".to_string());
    }

    let mut sections = Vec::with_capacity(tables.len());

    for table_name in &tables {
        let mut columns_stmt = conn.prepare(
            "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
             WHERE table_schema = 'main' AND table_name = ? ORDER BY ordinal_position",
        )?;
        let columns: Vec<(String, String, bool)> = columns_stmt
            .query_map([table_name], |row| {
                Ok((
                    row.get::<_, String>(0)?,           // column_name
                    row.get::<_, String>(1)?,           // data_type
                    row.get::<_, String>(2)? == "YES", // is_nullable
                ))
            })?
            .collect::<Result<_, duckdb::Error>>()?;

        let mut create_table = format!("CREATE TABLE {} (\n", quote_ident(table_name));
        let definitions = columns
            .iter()
            .map(|(name, data_type, nullable)| {
                let null_str = if *nullable { "" } else { " NOT NULL" };
                format!("    {} {}{}", quote_ident(name), data_type, null_str)
            })
            .collect::<Vec<_>>()
            .join(",\n");
        create_table.push_str(&definitions);
        create_table.push_str("\n);");

        let mut sample_stmt = conn.prepare(&format!(
            "SELECT * FROM {} LIMIT {}",
            quote_ident(table_name),
            SAMPLE_ROWS
        ))?;
        let sample_batches: Vec<RecordBatch> = sample_stmt.query_arrow([])?.collect();
        let sample_rows: usize = sample_batches.iter().map(|batch| batch.num_rows()).sum();
        let sample = pretty_format_batches(&sample_batches)?.to_string();

        sections.push(format!(
            "{}\n\n/*\n{} rows from {} table:\n{}\n*/",
            create_table, sample_rows, table_name, sample
        ));
    }

    Ok(sections.join("\n\n"))
}

/// Opens DuckDB files laid out as `<dir>/<database>/<database>.duckdb`.
pub struct DuckDbConnector {
    data_dir: PathBuf,
    pool_size: u32,
}

impl DuckDbConnector {
    pub fn new(data_dir: PathBuf, pool_size: usize) -> Self {
        Self {
            data_dir,
            pool_size: pool_size.max(1) as u32,
        }
    }

    pub fn resolve_path(&self, credentials: &DatabaseCredentials) -> PathBuf {
        let host = credentials.host.trim();
        let root = if LOCAL_HOSTS.contains(&host) {
            self.data_dir.clone()
        } else {
            PathBuf::from(host)
        };

        let database = credentials.database.trim();
        root.join(database).join(format!("{}.duckdb", database))
    }
}

#[async_trait]
impl DatabaseConnector for DuckDbConnector {
    async fn connect(&self, credentials: &DatabaseCredentials) -> Result<Arc<dyn SqlDatabase>, DbError> {
        let name = credentials.registry_name();
        if name.is_empty() {
            return Err(DbError::Connection("database name is empty".to_string()));
        }

        let path = self.resolve_path(credentials);
        if !path.exists() {
            return Err(DbError::Connection(format!(
                "database file {} does not exist",
                path.display()
            )));
        }

        if !credentials.user.is_empty() {
            debug!(
                "DuckDB has no user accounts, ignoring user '{}' for '{}'",
                credentials.user, name
            );
        }

        let pool_size = self.pool_size;
        let pool = tokio::task::spawn_blocking(move || -> Result<Pool<DuckDBConnectionManager>, DbError> {
            let manager = DuckDBConnectionManager::open(&path)?;
            info!("Opening pool of {} connections to {}", pool_size, manager.path().display());
            Ok(Pool::builder().max_size(pool_size).build(manager)?)
        })
        .await??;

        Ok(Arc::new(DuckDbDatabase::new(name, pool)))
    }
}
