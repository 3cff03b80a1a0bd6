use crate::config::LlmConfig;
use crate::llm::models::CompletionRequest;
use crate::llm::{LlmError, LlmProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Any OpenAI-compatible chat completions endpoint.
pub struct RemoteLlmProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct PromptRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct PromptResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl RemoteLlmProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config.api_url.clone().ok_or_else(|| {
            LlmError::ConfigError("API URL is required for remote LLM provider".to_string())
        })?;

        let api_key = config.api_key.clone().ok_or_else(|| {
            LlmError::ConfigError("API key is required for remote LLM provider".to_string())
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn build_request(&self, request: &CompletionRequest) -> PromptRequest {
        PromptRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: request.prompt.clone(),
                },
            ],
            temperature: self.temperature,
            max_tokens: 2000,
            response_format: request.json_output.then(|| ResponseFormat {
                kind: "json_object".to_string(),
            }),
        }
    }
}

#[async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        debug!("Sending request to {} with model: {}", self.api_url, self.model);

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.build_request(request))
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            error!("API responded with status code: {} - {}", status, error_body);
            return Err(LlmError::ResponseError(format!(
                "API responded with status code: {}",
                status
            )));
        }

        let prompt_response: PromptResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ResponseError(e.to_string()))?;

        prompt_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::ResponseError("No choices in response".to_string()))
    }
}
