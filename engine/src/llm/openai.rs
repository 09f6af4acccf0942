use super::{LLMError, LLMProvider, Message};
use crate::config::LLMConfig;
use async_trait::async_trait;
use keyring::Entry;
use sdk::errors::EngineError;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Keychain service name for stored API keys
pub const KEYRING_SERVICE: &str = "luna";

/// Any OpenAI-compatible chat completions endpoint
pub struct OpenAIProvider {
    config: LLMConfig,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: LLMConfig, api_key: impl Into<String>) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::LLMProvider(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            api_key: api_key.into(),
            client,
        })
    }

    /// Provider with the key looked up via [`resolve_api_key`]
    pub fn from_config(config: LLMConfig) -> Result<Self, EngineError> {
        let api_key = resolve_api_key(&config.api_key_env)?;
        Self::new(config, api_key)
    }
}

/// Find the API key: the named environment variable first, then the OS keychain
/// entry of the same name under the `luna` service.
pub fn resolve_api_key(env_var: &str) -> Result<String, EngineError> {
    if let Ok(key) = std::env::var(env_var) {
        if !key.trim().is_empty() {
            debug!("Using API key from ${}", env_var);
            return Ok(key.trim().to_string());
        }
    }

    let entry = Entry::new(KEYRING_SERVICE, env_var).map_err(|e| {
        EngineError::KeyringError(format!("Failed to create keyring entry: {}", e))
    })?;

    match entry.get_password() {
        Ok(key) => {
            debug!("Retrieved API key '{}' from keychain", env_var);
            Ok(key)
        }
        Err(keyring::Error::NoEntry) => Err(EngineError::LLMProvider(format!(
            "no API key: set ${} or store it in the keychain under service '{}'",
            env_var, KEYRING_SERVICE
        ))),
        Err(e) => Err(EngineError::KeyringError(format!(
            "Failed to retrieve secret '{}': {}",
            env_var, e
        ))),
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, messages: &[Message]) -> super::Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let api_messages: Vec<_> = messages
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.to_string(),
                    "content": msg.content
                })
            })
            .collect();

        let payload = json!({
            "model": self.config.model,
            "messages": api_messages,
            "temperature": self.config.temperature,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimitExceeded,
                _ => LLMError::InvalidRequest(format!("{}: {}", status, text)),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let content = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| LLMError::ParseError("No message content in response".to_string()))?;

        Ok(content.to_string())
    }
}
