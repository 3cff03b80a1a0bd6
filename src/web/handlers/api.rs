use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::agent::gate::Decision;
use crate::agent::orchestrator::{AgentError, AskResponse};
use crate::db::DatabaseCredentials;
use crate::web::state::AppState;

// Registry types

#[derive(Debug, Deserialize)]
pub struct InitRequest {
    pub databases: Vec<DatabaseCredentials>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InitResponse {
    pub message: String,
    pub databases: Vec<String>,
}

// Query types

/// Either a new question (`query`) or a decision on a pending write
/// (`session_id` + `verification_status`).
#[derive(Debug, Deserialize, Default)]
pub struct QueryRequest {
    pub query: Option<String>,
    pub session_id: Option<String>,
    pub verification_status: Option<String>,
}

// System status

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub database_count: usize,
    pub pending_sessions: usize,
    pub approval_required: bool,
    pub registry_refreshed_at: Option<String>,
}

fn agent_error_response(err: AgentError) -> (StatusCode, String) {
    let status = match &err {
        AgentError::NotInitialized | AgentError::EmptyQuery => StatusCode::BAD_REQUEST,
        AgentError::SessionNotFound(_) => StatusCode::NOT_FOUND,
    };
    (status, err.to_string())
}

// API Implementations

pub async fn init_databases(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<InitRequest>,
) -> Result<Json<InitResponse>, (StatusCode, String)> {
    info!("Initializing registry with {} databases", payload.databases.len());

    let databases = state.initialize_databases(&payload.databases).await.map_err(|e| {
        error!("Database initialization failed: {}", e);
        (StatusCode::BAD_REQUEST, e.to_string())
    })?;

    Ok(Json(InitResponse {
        message: "Databases initialized successfully. You can now send queries to the /api/ask endpoint."
            .to_string(),
        databases,
    }))
}

pub async fn ask_agent(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<AskResponse>, (StatusCode, String)> {
    let orchestrator = &state.orchestrator;

    // Handle HIL approval
    if let (Some(session_id), Some(verification_status)) =
        (payload.session_id.as_deref(), payload.verification_status.as_deref())
    {
        let decision = Decision::parse(verification_status);
        return orchestrator
            .confirm(session_id, decision)
            .await
            .map(Json)
            .map_err(|e| {
                warn!("Verification request failed: {}", e);
                agent_error_response(e)
            });
    }

    // Handle a new query
    let query = payload.query.as_deref().unwrap_or_default();
    orchestrator
        .submit(query)
        .await
        .map(Json)
        .map_err(agent_error_response)
}

pub async fn list_databases(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.registry().names().await)
}

pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let registry = state.registry();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: (chrono::Utc::now() - state.startup_time).num_seconds(),
        database_count: registry.len().await,
        pending_sessions: state.orchestrator.sessions().len().await,
        approval_required: state.config.verification.require_approval_for_writes,
        registry_refreshed_at: registry.last_refresh().await.map(|at| at.to_rfc3339()),
    })
}
