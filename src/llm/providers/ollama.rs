use crate::config::LlmConfig;
use crate::llm::models::CompletionRequest;
use crate::llm::{LlmError, LlmProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

pub struct OllamaProvider {
    client: reqwest::Client,
    api_url: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize, Debug)]
struct OllamaRequest {
    model: String,
    system: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    options: OllamaOptions,
}

#[derive(Serialize, Debug)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    done: Option<bool>,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434/api/generate".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        info!("Sending request to Ollama with model: {}", self.model);
        debug!("API URL: {}", self.api_url);

        let body = OllamaRequest {
            model: self.model.clone(),
            system: request.system.clone(),
            prompt: request.prompt.clone(),
            stream: false, // Explicitly disable streaming
            format: request.json_output.then(|| "json".to_string()),
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            // Try to get the error message from the response body
            let error_body = match response.text().await {
                Ok(body) => format!(" - Response body: {}", body),
                Err(_) => String::new(),
            };

            error!("Ollama API responded with status code: {}{}", status, error_body);
            return Err(LlmError::ResponseError(format!(
                "Ollama API responded with status code: {}{}",
                status, error_body
            )));
        }

        // Get the raw text response first for diagnostics
        let response_text = response
            .text()
            .await
            .map_err(|e| LlmError::ResponseError(format!("Failed to read response body: {}", e)))?;

        debug!("Raw response from Ollama: {}", response_text);

        let ollama_response = serde_json::from_str::<OllamaResponse>(&response_text).map_err(|e| {
            error!("Failed to parse Ollama response: {} - Response was: {}", e, response_text);
            LlmError::ResponseError(format!(
                "Failed to parse Ollama response: {} - Response was: {}",
                e, response_text
            ))
        })?;

        if ollama_response.done == Some(false) {
            return Err(LlmError::ResponseError("Ollama returned an incomplete response".to_string()));
        }

        Ok(ollama_response.response)
    }
}
