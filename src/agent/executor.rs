use std::sync::Arc;
use tracing::{error, info, warn};

use crate::agent::state::{FailureKind, RequestState};
use crate::db::normalize_name;
use crate::db::registry::DatabaseRegistry;
use crate::llm::LlmManager;

/// Runs approved SQL and turns the raw output into the final answer.
pub struct ExecutionNode {
    registry: Arc<DatabaseRegistry>,
    llm: Arc<LlmManager>,
}

impl ExecutionNode {
    pub fn new(registry: Arc<DatabaseRegistry>, llm: Arc<LlmManager>) -> Self {
        Self { registry, llm }
    }

    /// Always returns a terminal state; no error escapes this stage.
    pub async fn execute(&self, mut state: RequestState) -> RequestState {
        let db_name = state
            .database_name
            .as_deref()
            .map(normalize_name)
            .unwrap_or_default();

        info!("Running SQL against '{}'", db_name);

        let handle = if db_name.is_empty() {
            None
        } else {
            self.registry.get(&db_name).await
        };
        let Some(db) = handle else {
            return state.fail(
                FailureKind::DatabaseNotFound,
                format!("Error: Database '{}' not found.", db_name),
            );
        };

        let sql = match state.sql_query.as_deref().map(str::trim) {
            Some(sql) if !sql.is_empty() => sql.to_string(),
            _ => {
                return state.fail(
                    FailureKind::Execution,
                    "Database Error: 'no SQL statement to run'\nSQL: ",
                );
            }
        };

        let output = match db.run(&sql).await {
            Ok(output) => output,
            Err(e) => {
                error!("SQL execution error on '{}': {}", db_name, e);
                return state.fail(
                    FailureKind::Execution,
                    format!("Database Error: '{}'\nSQL: {}", e, sql),
                );
            }
        };

        let raw = output.to_string();
        info!("Query successful on '{}'", db.name());

        // The statement has already taken effect, so a summary failure is not an error
        let summary = match self.llm.summarize_results(state.query(), &sql, &raw).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Could not summarize results: {}", e);
                format!(
                    "The statement ran, but no summary is available ({}).\nRaw Results:\n{}",
                    e, raw
                )
            }
        };

        state.response = if state.sql_only_request {
            format!("SQL Query:\n```sql\n{}\n```\n\nFinal Answer:\n{}", sql, summary)
        } else {
            summary
        };
        state
    }
}
