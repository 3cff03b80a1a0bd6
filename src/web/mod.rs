pub mod handlers;
pub mod routes;
pub mod state;

use std::sync::Arc;
use tracing::info;

use crate::config::WebConfig;
use self::state::AppState;

pub async fn run_server(
    config: WebConfig,
    app_state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        // Never resolve, keep serving
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
