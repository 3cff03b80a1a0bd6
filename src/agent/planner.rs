use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::agent::state::{FailureKind, Intent, RequestState, VerificationStatus};
use crate::db::normalize_name;
use crate::llm::{LlmError, LlmManager};
use crate::util::sql::is_mutating;

/// Phrase that makes the final answer include the generated SQL
pub const SQL_ONLY_MARKER: &str = "sql query";

/// Validated planner output, folded into a `RequestState` right away.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAction {
    pub database_name: String,
    pub sql_query: String,
    pub intent: Intent,
}

pub struct ActionPlanner {
    llm: Arc<LlmManager>,
    require_approval_for_writes: bool,
}

impl ActionPlanner {
    pub fn new(llm: Arc<LlmManager>, require_approval_for_writes: bool) -> Self {
        Self {
            llm,
            require_approval_for_writes,
        }
    }

    /// Asks the model for an action and normalizes it.
    pub async fn plan(
        &self,
        query: &str,
        schemas: &BTreeMap<String, String>,
    ) -> Result<PlannedAction, LlmError> {
        let action = self.llm.plan_action(query, schemas).await?;
        let sql_query = action.sql_query.trim().to_string();

        Ok(PlannedAction {
            database_name: normalize_name(&action.database_name),
            intent: classify_intent(&action.intent, &sql_query),
            sql_query,
        })
    }

    /// Runs planning for a fresh state. Failures end the request here.
    pub async fn plan_state(&self, mut state: RequestState, schemas: &BTreeMap<String, String>) -> RequestState {
        info!("Deciding action for query: '{}'", state.query());

        state.sql_only_request = is_sql_only_request(state.query());

        match self.plan(state.query(), schemas).await {
            Ok(action) => {
                state.verification_status = Some(match action.intent {
                    Intent::Write if self.require_approval_for_writes => VerificationStatus::Pending,
                    Intent::Write => VerificationStatus::ApprovedImplicit,
                    _ => VerificationStatus::Approved,
                });
                state.database_name = Some(action.database_name);
                state.sql_query = Some(action.sql_query);
                state.intent = action.intent;
                state.response.clear();
                state
            }
            Err(e) => {
                error!("Error during SQL generation: {}", e);
                state.database_name = None;
                state.sql_query = None;
                state.intent = Intent::Unknown;
                state.verification_status = Some(VerificationStatus::Failed);
                state.fail(
                    FailureKind::Planning,
                    format!("Error: Could not generate SQL. Details: {}", e),
                )
            }
        }
    }
}

pub fn is_sql_only_request(query: &str) -> bool {
    query.to_lowercase().contains(SQL_ONLY_MARKER)
}

/// Maps the model's tag to an intent, escalating anything doubtful to a write.
fn classify_intent(tag: &str, sql: &str) -> Intent {
    match Intent::from_tag(tag) {
        Intent::Read if is_mutating(sql) => {
            warn!("Model labelled a mutating statement as read, treating it as write: {}", sql);
            Intent::Write
        }
        Intent::Unknown => {
            warn!("Unrecognised intent '{}', treating it as write", tag);
            Intent::Write
        }
        intent => intent,
    }
}
