pub mod models;
pub mod prompts;
pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info};

use self::models::{AgentAction, CompletionRequest};
use self::prompts::PromptTemplates;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    ConnectionError(String),
    #[error("LLM response error: {0}")]
    ResponseError(String),
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
    #[error("LLM prompt template error: {0}")]
    TemplateError(#[from] minijinja::Error),
}

/// A completion backend: takes a system instruction and a user turn, returns raw text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("fenced block pattern is valid")
});

/// Pulls the JSON object out of a model reply.
///
/// Tries a fenced block first, then falls back to the outermost braces.
pub fn extract_json_object(content: &str) -> Option<&str> {
    if let Some(block) = FENCED_BLOCK.captures(content).and_then(|caps| caps.get(1)) {
        return Some(block.as_str());
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (start < end).then(|| &content[start..=end])
}

/// Parses and sanity-checks the planner's structured output.
pub fn parse_agent_action(content: &str) -> Result<AgentAction, LlmError> {
    let json = extract_json_object(content).ok_or_else(|| {
        LlmError::ResponseError(format!("No JSON object in model output: {}", content))
    })?;

    let action: AgentAction = serde_json::from_str(json).map_err(|e| {
        LlmError::ResponseError(format!("Malformed action {}: {}", json, e))
    })?;

    if action.database_name.trim().is_empty() {
        return Err(LlmError::ResponseError("Model returned an empty database_name".to_string()));
    }
    if action.sql_query.trim().is_empty() {
        return Err(LlmError::ResponseError("Model returned an empty sql_query".to_string()));
    }

    Ok(action)
}

pub struct LlmManager {
    provider: Box<dyn LlmProvider>,
    templates: PromptTemplates,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let provider: Box<dyn LlmProvider> = match config.backend.as_str() {
            "remote" => Box::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        Self::from_provider(provider)
    }

    pub fn from_provider(provider: Box<dyn LlmProvider>) -> Result<Self, LlmError> {
        Ok(Self {
            provider,
            templates: PromptTemplates::new()?,
        })
    }

    /// Asks the model which database to use, what SQL to run and whether it writes.
    pub async fn plan_action(
        &self,
        query: &str,
        schemas: &BTreeMap<String, String>,
    ) -> Result<AgentAction, LlmError> {
        let request = self.templates.plan_request(query, schemas)?;
        let content = self.provider.complete(&request).await?;
        debug!("Raw planning output: {}", content);

        let action = parse_agent_action(&content)?;
        info!(
            "Planned action: intent={} database={} sql={}",
            action.intent, action.database_name, action.sql_query
        );
        Ok(action)
    }

    /// Turns raw statement output into a natural-language answer.
    pub async fn summarize_results(&self, query: &str, sql: &str, result: &str) -> Result<String, LlmError> {
        let request = self.templates.summary_request(query, sql, result)?;
        let content = self.provider.complete(&request).await?;

        let summary = content.trim();
        if summary.is_empty() {
            return Err(LlmError::ResponseError("Model returned an empty summary".to_string()));
        }
        Ok(summary.to_string())
    }
}
