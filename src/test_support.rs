//! Fixtures shared by the unit tests: a scripted model, an in-memory database fake and
//! DuckDB sample files.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::db::{DatabaseConnector, DatabaseCredentials, DbError, QueryOutput, SqlDatabase};
use crate::llm::models::CompletionRequest;
use crate::llm::{LlmError, LlmManager, LlmProvider};
use crate::util::sql::returns_rows;

/// Completion provider that replays queued replies.
///
/// JSON requests (planning) pop from the plan queue; other requests pop from the summary
/// queue and fall back to echoing the prompt, so tests can see the raw results.
#[derive(Default)]
pub struct ScriptedLlm {
    plans: Mutex<VecDeque<Result<String, String>>>,
    summaries: Mutex<VecDeque<Result<String, String>>>,
    log: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan_reply(self, database: &str, sql: &str, intent: &str) -> Self {
        let reply = serde_json::json!({
            "database_name": database,
            "sql_query": sql,
            "intent": intent,
        });
        self.plan_raw(&format!("```json\n{}\n```", reply))
    }

    pub fn plan_raw(self, content: &str) -> Self {
        self.plans.lock().unwrap().push_back(Ok(content.to_string()));
        self
    }

    pub fn plan_error(self, message: &str) -> Self {
        self.plans.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn summary_reply(self, content: &str) -> Self {
        self.summaries.lock().unwrap().push_back(Ok(content.to_string()));
        self
    }

    pub fn summary_error(self, message: &str) -> Self {
        self.summaries.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    /// Every request the provider has received, in order
    pub fn request_log(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        Arc::clone(&self.log)
    }

    pub fn into_manager(self) -> LlmManager {
        LlmManager::from_provider(Box::new(self)).unwrap()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.log.lock().unwrap().push(request.clone());

        let next = if request.json_output {
            self.plans
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err("no scripted plan left".to_string()))
        } else {
            self.summaries
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(format!("Summary of:\n{}", request.prompt)))
        };

        next.map_err(LlmError::ConnectionError)
    }
}

/// Database that records statements instead of running them.
pub struct FakeDatabase {
    name: String,
    executed: Mutex<Vec<String>>,
}

#[async_trait]
impl SqlDatabase for FakeDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn table_info(&self) -> Result<String, DbError> {
        Ok(format!("CREATE TABLE \"{}_items\" (\n    \"id\" INTEGER\n);", self.name))
    }

    async fn run(&self, sql: &str) -> Result<QueryOutput, DbError> {
        self.executed.lock().unwrap().push(sql.to_string());

        if sql.contains("fail") {
            return Err(DbError::Connection("simulated failure".to_string()));
        }
        if returns_rows(sql) {
            return Ok(QueryOutput::Rows {
                columns: vec!["count".to_string()],
                row_count: 1,
                rendered: "| count |\n| 3     |".to_string(),
            });
        }
        Ok(QueryOutput::Affected(1))
    }
}

/// Connector producing `FakeDatabase`s, optionally failing for chosen names.
#[derive(Default)]
pub struct FakeConnector {
    failing: HashSet<String>,
    calls: AtomicUsize,
    created: Mutex<HashMap<String, Arc<FakeDatabase>>>,
}

impl FakeConnector {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|name| name.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Statements run against the named database so far
    pub fn executed(&self, name: &str) -> Vec<String> {
        self.created
            .lock()
            .unwrap()
            .get(name)
            .map(|db| db.executed.lock().unwrap().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DatabaseConnector for FakeConnector {
    async fn connect(&self, credentials: &DatabaseCredentials) -> Result<Arc<dyn SqlDatabase>, DbError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let name = credentials.registry_name();
        if self.failing.contains(&name) {
            return Err(DbError::Connection(format!("cannot reach {}", name)));
        }

        let db = Arc::new(FakeDatabase {
            name: name.clone(),
            executed: Mutex::new(Vec::new()),
        });
        self.created.lock().unwrap().insert(name, Arc::clone(&db));
        Ok(db as Arc<dyn SqlDatabase>)
    }
}

pub fn local_credentials(database: &str) -> DatabaseCredentials {
    DatabaseCredentials {
        host: "localhost".to_string(),
        user: "root".to_string(),
        password: "secret".to_string(),
        database: database.to_string(),
    }
}

/// Creates `<root>/<name>/<name>.duckdb` with a `students` table: three pupils in grade 5
/// and two in grade 4.
pub fn create_school_db(root: &Path, name: &str) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();

    let conn = duckdb::Connection::open(dir.join(format!("{}.duckdb", name))).unwrap();
    conn.execute_batch(
        "CREATE TABLE students (id INTEGER PRIMARY KEY, name VARCHAR NOT NULL, grade INTEGER);
         INSERT INTO students VALUES
            (1, 'Ada', 5), (2, 'Grace', 5), (3, 'Linus', 5), (4, 'Ken', 4), (5, 'Barbara', 4);",
    )
    .unwrap();
}
