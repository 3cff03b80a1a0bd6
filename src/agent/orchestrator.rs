use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::executor::ExecutionNode;
use crate::agent::gate::{resume, route, verification_message, Decision, Route};
use crate::agent::planner::ActionPlanner;
use crate::agent::sessions::SessionStore;
use crate::agent::state::{FailureKind, RequestState, VerificationStatus};
use crate::config::VerificationConfig;
use crate::db::registry::DatabaseRegistry;
use crate::llm::LlmManager;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent is not initialized. Please call the /api/init endpoint first.")]
    NotInitialized,
    #[error("Query is required for new requests")]
    EmptyQuery,
    #[error("Session ID not found or expired: {0}")]
    SessionNotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AskStatus {
    Success,
    PendingVerification,
    Rejected,
    Error,
}

/// What the caller sees for a submitted query or a confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub session_id: String,
    pub status: AskStatus,
    pub response_message: String,
    pub proposed_sql: Option<String>,
    pub database_name: Option<String>,
}

impl AskResponse {
    fn terminal(session_id: String, state: RequestState) -> Self {
        let status = if state.failure.is_some() {
            AskStatus::Error
        } else if state.verification_status == Some(VerificationStatus::Rejected) {
            AskStatus::Rejected
        } else {
            AskStatus::Success
        };

        Self {
            session_id,
            status,
            response_message: state.response,
            proposed_sql: None,
            database_name: None,
        }
    }
}

/// Owns the request lifecycle: plan, gate, optional pause, execute.
pub struct Orchestrator {
    registry: Arc<DatabaseRegistry>,
    planner: ActionPlanner,
    executor: ExecutionNode,
    sessions: SessionStore,
}

impl Orchestrator {
    pub fn new(registry: Arc<DatabaseRegistry>, llm: Arc<LlmManager>, config: &VerificationConfig) -> Self {
        Self {
            planner: ActionPlanner::new(Arc::clone(&llm), config.require_approval_for_writes),
            executor: ExecutionNode::new(Arc::clone(&registry), llm),
            sessions: SessionStore::from_config(config),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<DatabaseRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Plans a new query and either answers it or parks it for approval.
    pub async fn submit(&self, query: &str) -> Result<AskResponse, AgentError> {
        if self.registry.is_empty().await {
            return Err(AgentError::NotInitialized);
        }
        if query.trim().is_empty() {
            return Err(AgentError::EmptyQuery);
        }

        let session_id = Uuid::new_v4().to_string();
        info!("New request {} for query: '{}'", session_id, query);

        let schemas = self.registry.schemas().await;
        let mut state = self
            .planner
            .plan_state(RequestState::new(query), &schemas)
            .await;

        match route(&state) {
            Route::AwaitHuman => {
                state.response = verification_message(&state);
                let response = AskResponse {
                    session_id: session_id.clone(),
                    status: AskStatus::PendingVerification,
                    response_message: state.response.clone(),
                    proposed_sql: state.sql_query.clone(),
                    database_name: state.database_name.clone(),
                };
                self.sessions.insert(session_id, state).await;
                Ok(response)
            }
            Route::Execute => {
                let state = self.executor.execute(state).await;
                Ok(AskResponse::terminal(session_id, state))
            }
            Route::TerminalError => Ok(AskResponse::terminal(session_id, routing_failure(state))),
        }
    }

    /// Resolves a pending write. The session is consumed whatever the decision.
    pub async fn confirm(&self, session_id: &str, decision: Decision) -> Result<AskResponse, AgentError> {
        if self.registry.is_empty().await {
            return Err(AgentError::NotInitialized);
        }

        let pending = self
            .sessions
            .take(session_id)
            .await
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;

        info!("Verification request for session {}: {:?}", session_id, decision);
        let state = resume(pending, decision);

        if state.verification_status == Some(VerificationStatus::Rejected) {
            return Ok(AskResponse {
                session_id: session_id.to_string(),
                status: AskStatus::Rejected,
                response_message: state.response,
                proposed_sql: state.sql_query,
                database_name: state.database_name,
            });
        }

        let state = match route(&state) {
            Route::Execute => self.executor.execute(state).await,
            other => {
                warn!("Resumed session {} routed to {:?}", session_id, other);
                routing_failure(state)
            }
        };
        Ok(AskResponse::terminal(session_id.to_string(), state))
    }
}

/// Makes sure a state that cannot proceed carries a failure and a message.
fn routing_failure(state: RequestState) -> RequestState {
    if state.failure.is_some() && state.is_terminal() {
        return state;
    }
    let kind = state.failure.unwrap_or(FailureKind::RoutingImpossible);
    state.fail(kind, "Error: The planned action could not be routed to execution.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::duckdb_database::DuckDbConnector;
    use crate::db::QueryOutput;
    use crate::test_support::{create_school_db, local_credentials, FakeConnector, ScriptedLlm};

    struct Fixture {
        orchestrator: Orchestrator,
        _dir: tempfile::TempDir,
    }

    async fn school_fixture(llm: ScriptedLlm) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        create_school_db(dir.path(), "school");
        create_school_db(dir.path(), "library");

        let registry = Arc::new(DatabaseRegistry::new());
        let connector = DuckDbConnector::new(dir.path().to_path_buf(), 2);
        registry
            .initialize(&[local_credentials("school"), local_credentials("library")], &connector)
            .await
            .unwrap();

        let config = AppConfig::default().verification;
        Fixture {
            orchestrator: Orchestrator::new(registry, Arc::new(llm.into_manager()), &config),
            _dir: dir,
        }
    }

    async fn student_count(orchestrator: &Orchestrator) -> String {
        let db = orchestrator.registry().get("school").await.unwrap();
        match db.run("SELECT COUNT(*) AS n FROM students").await.unwrap() {
            QueryOutput::Rows { rendered, .. } => rendered,
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn read_query_executes_immediately() {
        let llm = ScriptedLlm::new().plan_reply(
            "School",
            "SELECT COUNT(*) AS grade_5_students FROM students WHERE grade = 5",
            "read",
        );
        let fixture = school_fixture(llm).await;

        let response = fixture
            .orchestrator
            .submit("How many students are in grade 5?")
            .await
            .unwrap();

        assert_eq!(response.status, AskStatus::Success);
        // The scripted summary echoes the raw results it was given
        assert!(response.response_message.contains("grade_5_students"));
        assert!(response.response_message.contains("| 3"));
        assert!(response.proposed_sql.is_none());
        assert_eq!(fixture.orchestrator.sessions().len().await, 0);
    }

    #[tokio::test]
    async fn write_waits_then_executes_once_approved() {
        let llm = ScriptedLlm::new().plan_reply("school", "DELETE FROM students", "write");
        let fixture = school_fixture(llm).await;
        let orchestrator = &fixture.orchestrator;

        let pending = orchestrator
            .submit("Delete all records from the students table")
            .await
            .unwrap();

        assert_eq!(pending.status, AskStatus::PendingVerification);
        assert_eq!(pending.proposed_sql.as_deref(), Some("DELETE FROM students"));
        assert_eq!(pending.database_name.as_deref(), Some("school"));
        assert!(pending.response_message.contains("DELETE FROM students"));
        assert!(student_count(orchestrator).await.contains("| 5"));

        let done = orchestrator
            .confirm(&pending.session_id, Decision::parse("approved"))
            .await
            .unwrap();
        assert_eq!(done.status, AskStatus::Success);
        assert_eq!(done.session_id, pending.session_id);
        assert!(done.response_message.contains("5 row(s) affected"));
        assert!(student_count(orchestrator).await.contains("| 0"));

        let again = orchestrator
            .confirm(&pending.session_id, Decision::Approved)
            .await
            .unwrap_err();
        assert!(matches!(again, AgentError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn rejection_never_touches_the_database() {
        let llm = ScriptedLlm::new().plan_reply("school", "DELETE FROM students", "write");
        let log = llm.request_log();
        let fixture = school_fixture(llm).await;
        let orchestrator = &fixture.orchestrator;

        let pending = orchestrator
            .submit("Delete all records from the students table")
            .await
            .unwrap();
        let rejected = orchestrator
            .confirm(&pending.session_id, Decision::parse("no"))
            .await
            .unwrap();

        assert_eq!(rejected.status, AskStatus::Rejected);
        assert_eq!(rejected.proposed_sql.as_deref(), Some("DELETE FROM students"));
        assert!(student_count(orchestrator).await.contains("| 5"));
        // Only the planning call reached the model, no summary was requested
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(orchestrator.sessions().len().await, 0);

        let again = orchestrator.confirm(&pending.session_id, Decision::Approved).await;
        assert!(matches!(again, Err(AgentError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn cte_wrapped_delete_tagged_read_waits_for_approval() {
        let llm = ScriptedLlm::new().plan_reply(
            "school",
            "WITH doomed AS (SELECT 4 AS g) DELETE FROM students WHERE grade IN (SELECT g FROM doomed)",
            "read",
        );
        let fixture = school_fixture(llm).await;
        let orchestrator = &fixture.orchestrator;

        let pending = orchestrator.submit("Remove the grade 4 students").await.unwrap();
        assert_eq!(pending.status, AskStatus::PendingVerification);
        assert!(student_count(orchestrator).await.contains("| 5"));

        let done = orchestrator
            .confirm(&pending.session_id, Decision::Approved)
            .await
            .unwrap();
        assert_eq!(done.status, AskStatus::Success);
        assert!(done.response_message.contains("2 row(s) affected"));
        assert!(student_count(orchestrator).await.contains("| 3"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_confirms_run_the_write_once() {
        let connector = FakeConnector::default();
        let registry = Arc::new(DatabaseRegistry::new());
        registry
            .initialize(&[local_credentials("school"), local_credentials("sales")], &connector)
            .await
            .unwrap();

        let config = AppConfig::default().verification;
        let llm = ScriptedLlm::new().plan_reply("sales", "DELETE FROM sales_items", "write");
        let orchestrator = Arc::new(Orchestrator::new(registry, Arc::new(llm.into_manager()), &config));

        let pending = orchestrator.submit("clear the sales items").await.unwrap();
        assert_eq!(pending.status, AskStatus::PendingVerification);

        let confirm = |orchestrator: Arc<Orchestrator>, id: String| {
            tokio::spawn(async move { orchestrator.confirm(&id, Decision::Approved).await })
        };
        let (first, second) = tokio::join!(
            confirm(Arc::clone(&orchestrator), pending.session_id.clone()),
            confirm(Arc::clone(&orchestrator), pending.session_id.clone()),
        );

        let outcomes = [first.unwrap(), second.unwrap()];
        let successes = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Ok(response) if response.status == AskStatus::Success))
            .count();
        let missing = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Err(AgentError::SessionNotFound(_))))
            .count();

        assert_eq!((successes, missing), (1, 1));
        assert_eq!(connector.executed("sales"), vec!["DELETE FROM sales_items".to_string()]);
    }

    #[test]
    fn routing_failure_always_leaves_a_message() {
        let mut state = RequestState::new("q");
        state.failure = Some(FailureKind::Execution);
        let state = routing_failure(state);
        assert_eq!(state.failure, Some(FailureKind::Execution));
        assert!(state.is_terminal());

        let state = routing_failure(RequestState::new("q"));
        assert_eq!(state.failure, Some(FailureKind::RoutingImpossible));
        assert!(state.response.starts_with("Error:"));
    }

    #[tokio::test]
    async fn unknown_session_is_not_a_rejection() {
        let fixture = school_fixture(ScriptedLlm::new()).await;
        let err = fixture
            .orchestrator
            .confirm("never-issued", Decision::Rejected)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::SessionNotFound(ref id) if id == "never-issued"));
    }

    #[tokio::test]
    async fn failures_surface_as_error_status() {
        let llm = ScriptedLlm::new()
            .plan_error("service unavailable")
            .plan_reply("payroll", "SELECT 1", "read")
            .plan_reply("school", "SELECT * FROM missing_table", "read");
        let fixture = school_fixture(llm).await;
        let orchestrator = &fixture.orchestrator;

        let planning = orchestrator.submit("anything").await.unwrap();
        assert_eq!(planning.status, AskStatus::Error);
        assert!(planning.response_message.contains("service unavailable"));

        let not_found = orchestrator.submit("anything").await.unwrap();
        assert_eq!(not_found.status, AskStatus::Error);
        assert_eq!(not_found.response_message, "Error: Database 'payroll' not found.");

        let execution = orchestrator.submit("anything").await.unwrap();
        assert_eq!(execution.status, AskStatus::Error);
        assert!(execution.response_message.contains("SQL: SELECT * FROM missing_table"));

        assert_eq!(orchestrator.sessions().len().await, 0);
    }

    #[tokio::test]
    async fn success_text_mentioning_errors_stays_success() {
        let llm = ScriptedLlm::new()
            .plan_reply("school", "SELECT COUNT(*) FROM students", "read")
            .summary_reply("Error rates are not tracked, but there are 5 students.");
        let fixture = school_fixture(llm).await;

        let response = fixture.orchestrator.submit("How many students?").await.unwrap();
        assert_eq!(response.status, AskStatus::Success);
    }

    #[tokio::test]
    async fn requests_need_an_initialized_registry_and_a_query() {
        let registry = Arc::new(DatabaseRegistry::new());
        let config = AppConfig::default().verification;
        let orchestrator = Orchestrator::new(
            Arc::clone(&registry),
            Arc::new(ScriptedLlm::new().into_manager()),
            &config,
        );

        assert!(matches!(orchestrator.submit("hi").await, Err(AgentError::NotInitialized)));
        assert!(matches!(
            orchestrator.confirm("id", Decision::Approved).await,
            Err(AgentError::NotInitialized)
        ));

        registry
            .initialize(
                &[local_credentials("school"), local_credentials("sales")],
                &FakeConnector::default(),
            )
            .await
            .unwrap();
        assert!(matches!(orchestrator.submit("   ").await, Err(AgentError::EmptyQuery)));
    }

    #[tokio::test]
    async fn implicit_approval_skips_the_pause() {
        let connector = FakeConnector::default();
        let registry = Arc::new(DatabaseRegistry::new());
        registry
            .initialize(&[local_credentials("school"), local_credentials("sales")], &connector)
            .await
            .unwrap();

        let mut config = AppConfig::default().verification;
        config.require_approval_for_writes = false;
        let llm = ScriptedLlm::new().plan_reply("sales", "DELETE FROM sales_items", "write");
        let orchestrator = Orchestrator::new(registry, Arc::new(llm.into_manager()), &config);

        let response = orchestrator.submit("clear the sales items").await.unwrap();
        assert_eq!(response.status, AskStatus::Success);
        assert_eq!(connector.executed("sales"), vec!["DELETE FROM sales_items".to_string()]);
    }
}
