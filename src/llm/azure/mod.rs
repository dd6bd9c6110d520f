#[cfg(test)]
mod tests;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::{ChatMessage, LanguageModel};
use crate::config::LlmConfig;
use crate::{KnowledgeError, Result};

/// Azure OpenAI chat-completions client
#[derive(Clone)]
pub struct AzureOpenAiClient {
    completions_url: Url,
    api_key: Option<String>,
    api_key_env: String,
    temperature: f32,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl std::fmt::Debug for AzureOpenAiClient {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureOpenAiClient")
            .field("completions_url", &self.completions_url.as_str())
            .field("api_key_env", &self.api_key_env)
            .field("has_api_key", &self.api_key.is_some())
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl AzureOpenAiClient {
    /// Build a client for the configured deployment; the key is read from the environment
    #[inline]
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let mut completions_url = config
            .endpoint_url()
            .context("Invalid Azure OpenAI endpoint")?
            .join(&format!(
                "openai/deployments/{}/chat/completions",
                config.deployment.trim()
            ))
            .context("Failed to build chat completions URL")?;
        completions_url
            .query_pairs_mut()
            .append_pair("api-version", config.api_version.trim());

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout()))
            .http_status_as_error(false)
            .build()
            .into();

        Ok(Self {
            completions_url,
            api_key: config.api_key(),
            api_key_env: config.api_key_env.clone(),
            temperature: config.temperature,
            agent,
        })
    }

    #[inline]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[inline]
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    #[inline]
    pub fn completions_url(&self) -> &Url {
        &self.completions_url
    }

    fn complete_blocking(&self, messages: &[ChatMessage]) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            KnowledgeError::GenerationFailed(format!(
                "API key not found. Set the {} environment variable",
                self.api_key_env
            ))
        })?;

        let body = serde_json::to_string(&CompletionRequest {
            messages,
            temperature: self.temperature,
        })
        .map_err(|e| KnowledgeError::GenerationFailed(format!("Failed to encode request: {e}")))?;

        debug!(
            "Requesting completion for {} messages from {}",
            messages.len(),
            self.completions_url.path()
        );

        let mut response = self
            .agent
            .post(self.completions_url.as_str())
            .header("Content-Type", "application/json")
            .header("api-key", api_key)
            .send(&body)
            .map_err(|e| {
                warn!("Language model request failed: {}", e);
                KnowledgeError::GenerationFailed(format!("Request failed: {e}"))
            })?;

        let status = response.status().as_u16();
        let text = response.body_mut().read_to_string().map_err(|e| {
            KnowledgeError::GenerationFailed(format!("Failed to read response: {e}"))
        })?;

        if !(200..300).contains(&status) {
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map_or(text, |parsed| parsed.error.message);
            warn!("Language model returned HTTP {}: {}", status, message);
            return Err(KnowledgeError::GenerationFailed(format!(
                "HTTP {status}: {message}"
            )));
        }

        let parsed: CompletionResponse = serde_json::from_str(&text).map_err(|e| {
            KnowledgeError::GenerationFailed(format!("Malformed completion response: {e}"))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                KnowledgeError::GenerationFailed("Completion contained no answer".to_string())
            })
    }
}

#[async_trait]
impl LanguageModel for AzureOpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let client = self.clone();
        let messages = messages.to_vec();

        tokio::task::spawn_blocking(move || client.complete_blocking(&messages))
            .await
            .map_err(|e| KnowledgeError::GenerationFailed(format!("Completion task failed: {e}")))?
    }
}
