use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

// API Routes - REST API for programmatic access
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest(
            "/api",
            Router::new()
                // Registry setup
                .route("/init", post(handlers::api::init_databases))
                .route("/databases", get(handlers::api::list_databases))

                // Queries and approvals
                .route("/ask", post(handlers::api::ask_agent))

                // System status
                .route("/status", get(handlers::api::system_status))
        )
}

pub fn build_router(state: Arc<AppState>) -> Router {
    api_routes()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
