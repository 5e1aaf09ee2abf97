//! Generator client: calls the external generative endpoint and returns
//! completion text.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{MemoriaError, Result};

/// Options for a single generation call.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self { temperature: 0.7 }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, options: GenerateOptions) -> Result<String>;
}

/// Generic HTTP generator speaking the `{model, prompt, stream:false}` /
/// `{response: "..."}` contract. Non-2xx or a missing `response` field
/// counts as failure.
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl HttpGenerator {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.generator_endpoint.clone(),
            config.generator_model.clone(),
            config.generate_timeout(),
        )
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &str, options: GenerateOptions) -> Result<String> {
        let request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "temperature": options.temperature,
            }))
            .timeout(self.timeout)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| MemoriaError::Timeout(self.timeout))??;

        if !response.status().is_success() {
            return Err(MemoriaError::Generator(format!(
                "generator endpoint returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await?;
        match body["response"].as_str() {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => Err(MemoriaError::Generator("missing response field".to_string())),
        }
    }
}

/// A generator that always fails, for tests exercising degradation paths
/// that must not make network calls.
pub struct NullGenerator;

#[async_trait]
impl Generator for NullGenerator {
    async fn generate(&self, _prompt: &str, _options: GenerateOptions) -> Result<String> {
        Err(MemoriaError::Generator("no generator configured".to_string()))
    }
}
