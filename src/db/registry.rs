use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::db::{normalize_name, DatabaseConnector, DatabaseCredentials, SqlDatabase};

/// Smallest credential list accepted by `initialize`
pub const MIN_DATABASES: usize = 2;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Must provide at least {required} databases, got {provided}")]
    TooFewDatabases { provided: usize, required: usize },
    #[error("No databases were successfully initialized ({})", .0.join("; "))]
    NoneConnected(Vec<String>),
}

/// The set of databases known to the planner and the executor, keyed by normalized name.
pub struct DatabaseRegistry {
    databases: RwLock<HashMap<String, Arc<dyn SqlDatabase>>>,
    /// When the current set was installed
    last_refresh: RwLock<Option<DateTime<Utc>>>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self {
            databases: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(None),
        }
    }

    /// Connects every credential and installs the survivors as the new registry.
    ///
    /// Entries that fail to connect are skipped with a warning. The existing registry is
    /// only replaced when at least one database connected.
    pub async fn initialize(
        &self,
        credentials: &[DatabaseCredentials],
        connector: &dyn DatabaseConnector,
    ) -> Result<Vec<String>, RegistryError> {
        if credentials.len() < MIN_DATABASES {
            return Err(RegistryError::TooFewDatabases {
                provided: credentials.len(),
                required: MIN_DATABASES,
            });
        }

        info!("Initializing {} databases from provided credentials", credentials.len());

        // Connect outside the lock, requests keep using the old set meanwhile
        let mut connected: HashMap<String, Arc<dyn SqlDatabase>> = HashMap::new();
        let mut failures = Vec::new();

        for creds in credentials {
            let name = creds.registry_name();
            match connector.connect(creds).await {
                Ok(db) => {
                    if connected.insert(name.clone(), db).is_some() {
                        warn!("Database '{}' listed more than once, keeping the last entry", name);
                    }
                    info!("Connection successful for database '{}'", name);
                }
                Err(e) => {
                    warn!("Could not initialize database '{}', skipping: {}", name, e);
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }

        if connected.is_empty() {
            return Err(RegistryError::NoneConnected(failures));
        }

        let mut names: Vec<String> = connected.keys().cloned().collect();
        names.sort();

        *self.databases.write().await = connected;
        *self.last_refresh.write().await = Some(Utc::now());

        info!("Active databases: {:?}", names);
        Ok(names)
    }

    /// Looks up a handle; the name is normalized first.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn SqlDatabase>> {
        let key = normalize_name(name);
        self.databases.read().await.get(&key).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn is_empty(&self) -> bool {
        self.databases.read().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.databases.read().await.len()
    }

    pub async fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh.read().await
    }

    /// Collects the schema description of every registered database.
    ///
    /// Handles are cloned out first so no lock is held while the databases are queried.
    pub async fn schemas(&self) -> BTreeMap<String, String> {
        let handles: Vec<(String, Arc<dyn SqlDatabase>)> = self
            .databases
            .read()
            .await
            .iter()
            .map(|(name, db)| (name.clone(), Arc::clone(db)))
            .collect();

        let mut schemas = BTreeMap::new();
        for (name, db) in handles {
            let info = match db.table_info().await {
                Ok(info) => info,
                Err(e) => {
                    warn!("Failed to read schema for '{}': {}", name, e);
                    format!("Schema unavailable: {}", e)
                }
            };
            debug!("Schema for '{}' is {} bytes", name, info.len());
            schemas.insert(name, info);
        }
        schemas
    }
}

impl Default for DatabaseRegistry {
    fn default() -> Self {
        Self::new()
    }
}
