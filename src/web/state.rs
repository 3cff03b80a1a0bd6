use crate::agent::orchestrator::Orchestrator;
use crate::config::AppConfig;
use crate::db::registry::{DatabaseRegistry, RegistryError};
use crate::db::{DatabaseConnector, DatabaseCredentials};
use std::sync::Arc;
use tracing::info;

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub orchestrator: Arc<Orchestrator>,
    /// Opens databases for /api/init
    pub connector: Arc<dyn DatabaseConnector>,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, orchestrator: Arc<Orchestrator>, connector: Arc<dyn DatabaseConnector>) -> Self {
        Self {
            config,
            orchestrator,
            connector,
            startup_time: chrono::Utc::now(),
        }
    }

    pub fn registry(&self) -> &Arc<DatabaseRegistry> {
        self.orchestrator.registry()
    }

    // Replaces the registry with the databases that connect
    pub async fn initialize_databases(&self, credentials: &[DatabaseCredentials]) -> Result<Vec<String>, RegistryError> {
        let names = self
            .registry()
            .initialize(credentials, self.connector.as_ref())
            .await?;
        info!("Registry now holds {} databases", names.len());
        Ok(names)
    }
}
