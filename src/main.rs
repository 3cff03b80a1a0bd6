use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

mod agent;
mod config;
mod db;
mod llm;
mod util;
mod web;

#[cfg(test)]
mod test_support;

use crate::agent::orchestrator::Orchestrator;
use crate::config::{AppConfig, CliArgs};
use crate::db::duckdb_database::DuckDbConnector;
use crate::db::registry::DatabaseRegistry;
use crate::llm::LlmManager;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_tracing(args.log_json);

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Ensure data directory exists
    let data_dir = PathBuf::from(&config.data_dir);
    if !data_dir.exists() {
        info!("Creating data directory: {}", config.data_dir);
        std::fs::create_dir_all(&data_dir)?;
    }

    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = Arc::new(LlmManager::new(&config.llm)?);

    let registry = Arc::new(DatabaseRegistry::new());
    let connector = Arc::new(DuckDbConnector::new(data_dir.clone(), config.database.pool_size));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&registry),
        llm_manager,
        &config.verification,
    ));

    let app_state = Arc::new(AppState::new(config.clone(), Arc::clone(&orchestrator), connector));

    // Register databases listed in the config file, if any
    if !config.databases.is_empty() {
        info!("Initializing {} databases from configuration", config.databases.len());
        if let Err(e) = app_state.initialize_databases(&config.databases).await {
            warn!("Startup database initialization failed: {}", e);
            // Continue anyway, /api/init can still be called
        }
    }

    // Sweep abandoned approvals
    if let Some(ttl) = orchestrator.sessions().ttl() {
        let sweeper = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ttl.min(Duration::from_secs(60)));
            loop {
                interval.tick().await;
                let purged = sweeper.sessions().purge_expired().await;
                if purged > 0 {
                    info!("Purged {} expired pending sessions", purged);
                }
            }
        });
    }

    // Start the web server
    info!("Starting NL-SQL-Gate server on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(std::io::Error::other(e.to_string()).into());
        }
    }

    Ok(())
}
