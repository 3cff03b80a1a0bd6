use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::db::DatabaseCredentials;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// Connections kept per registered database
    pub pool_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "remote" or "ollama"
    pub model: String,   // Model name
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VerificationConfig {
    /// When false, writes are approved implicitly and run without a pause
    pub require_approval_for_writes: bool,
    /// Seconds a pending approval stays valid; 0 keeps it until restart
    pub session_ttl_secs: u64,
    pub max_pending_sessions: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub verification: VerificationConfig,
    pub data_dir: String,
    /// Databases registered at startup, same shape as the /api/init payload
    #[serde(default)]
    pub databases: Vec<DatabaseCredentials>,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory holding the DuckDB databases
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        // Start with default configuration
        let mut config_builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/nl-sql-gate/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // NL_SQL_GATE__LLM__API_KEY and friends
        config_builder = config_builder.add_source(
            Environment::with_prefix("NL_SQL_GATE")
                .prefix_separator("__")
                .separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(data_dir) = &args.data_dir {
            config.data_dir = data_dir.clone();
        }

        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig { pool_size: 4 },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            llm: LlmConfig {
                backend: "ollama".to_string(),
                model: "llama3.1".to_string(),
                api_key: None,
                api_url: None,
                temperature: 0.0,
                timeout_secs: 60,
            },
            verification: VerificationConfig {
                require_approval_for_writes: true,
                session_ttl_secs: 3600,
                max_pending_sessions: 1024,
            },
            data_dir: "data".to_string(),
            databases: Vec::new(),
        }
    }
}
