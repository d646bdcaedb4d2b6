use crate::error::GenerationError;
use crate::logging::preview;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

/// Text-completion collaborator.
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// Complete `prompt` deterministically. An empty `Ok` string is a
    /// successful, empty completion.
    async fn complete(&self, prompt: &str, max_output_tokens: u32) -> Result<String, GenerationError>;
}

/// OpenAI-compatible chat-completions client (DeepSeek, OpenAI, vLLM, ...).
#[derive(Clone)]
pub struct LlmClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(api_key: Option<String>, model: String, base_url: String, timeout: Duration) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn classify_send_error(&self, e: reqwest::Error) -> GenerationError {
        if e.is_timeout() {
            GenerationError::Timeout(self.timeout)
        } else {
            GenerationError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl GenerationGateway for LlmClient {
    async fn complete(&self, prompt: &str, max_output_tokens: u32) -> Result<String, GenerationError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| GenerationError::Auth("No LLM API key configured".to_string()))?;

        info!(
            "Calling LLM {} ({} chars prompt): {:?}",
            self.model,
            prompt.len(),
            preview(prompt, 50)
        );

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": 0,
            "max_tokens": max_output_tokens,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(match status.as_u16() {
                401 | 403 => GenerationError::Auth(error_text),
                408 | 504 => GenerationError::Timeout(self.timeout),
                code => GenerationError::Api {
                    status: code,
                    body: error_text,
                },
            });
        }

        let response_json: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(self.timeout)
            } else {
                GenerationError::Malformed(format!("Failed to parse LLM response: {}", e))
            }
        })?;

        parse_completion(&response_json)
    }
}

/// Pull the first choice's text out of a chat-completions payload.
fn parse_completion(response_json: &serde_json::Value) -> Result<String, GenerationError> {
    if let Some(error) = response_json.get("error") {
        return Err(GenerationError::Api {
            status: 200,
            body: error.to_string(),
        });
    }

    let choice = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| GenerationError::Malformed(format!("No choices in LLM response: {}", response_json)))?;

    match choice.get("finish_reason").and_then(|r| r.as_str()) {
        Some("content_filter") => return Err(GenerationError::ContentFiltered),
        Some("length") => warn!("LLM response was truncated due to length limit"),
        _ => {}
    }

    let message = choice
        .get("message")
        .ok_or_else(|| GenerationError::Malformed("Choice has no message".to_string()))?;

    let content = match message.get("content") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => {
            return Err(GenerationError::Malformed(format!(
                "Unexpected content type in LLM response: {}",
                other
            )))
        }
    };

    if content.is_empty() {
        warn!("LLM returned an empty completion");
    } else {
        info!("LLM output: {:?}", preview(&content, 80));
    }
    Ok(content)
}
