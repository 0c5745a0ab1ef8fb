//! Ollama API provider.
//!
//! - `POST {host}/api/generate`: single-shot generation (`stream: false`)
//! - `GET  {host}/api/tags`: models available locally
//! - `POST {host}/api/pull`: download a model (`stream: false`)
//!
//! Generation and pulls can take minutes, so each call carries its own
//! timeout instead of a client-wide one.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::BackendConfig;
use crate::error::GatewayError;

use super::client::Backend;

/// Timeout for the model listing call
const LIST_TIMEOUT: Duration = Duration::from_secs(30);

// ── Ollama API request types ─────────────────────────────

/// Ollama `/api/generate` request body.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// Ollama `/api/pull` request body.
#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    model: &'a str,
    stream: bool,
}

// ── Ollama API response types ────────────────────────────

/// Ollama `/api/tags` response.
#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Final object of a non-streaming `/api/pull`.
#[derive(Debug, Deserialize)]
struct PullResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

// ── OllamaClient ────────────────────────────────────────

/// Client for the Ollama API.
pub struct OllamaClient {
    client: Client,
    host: String,
    model: String,
    request_timeout: Duration,
    pull_timeout: Duration,
}

impl OllamaClient {
    /// Creates a new Ollama client from configuration.
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: Client::new(),
            // Strip trailing slash for consistent URL construction
            host: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            request_timeout: config.request_timeout(),
            pull_timeout: config.pull_timeout(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Lists the names of models available on the server.
    pub async fn list_models(&self) -> Result<Vec<String>, GatewayError> {
        let url = format!("{}/api/tags", self.host);
        let response = self
            .client
            .get(&url)
            .timeout(LIST_TIMEOUT)
            .send()
            .await
            .map_err(|e| GatewayError::BackendUnreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::BackendUnreachable(format!(
                "model listing returned {status}"
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::BackendMalformed(format!("Invalid model list: {e}")))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Downloads `model` onto the server and waits for completion.
    pub async fn pull_model(&self, model: &str) -> Result<(), GatewayError> {
        let provision_failed = |reason: String| {
            error!("Failed to pull model {model}: {reason}");
            GatewayError::ModelProvisionFailed {
                model: model.to_string(),
                reason,
            }
        };

        info!("Pulling model {model} (this can take a while)");

        let url = format!("{}/api/pull", self.host);
        let response = self
            .client
            .post(&url)
            .timeout(self.pull_timeout)
            .json(&PullRequest {
                model,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| provision_failed(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(provision_failed(format!("HTTP {status}: {}", body.trim())));
        }

        // A 200 can still carry an error object
        if let Ok(pull) = serde_json::from_str::<PullResponse>(&body) {
            if let Some(err) = pull.error {
                return Err(provision_failed(err));
            }
            debug!("Pull status: {}", pull.status.as_deref().unwrap_or("unknown"));
        }

        info!("Model {model} is ready");
        Ok(())
    }
}

/// True if `available` contains `model`, treating an untagged name as `:latest`.
pub fn has_model(available: &[String], model: &str) -> bool {
    available.iter().any(|name| {
        name == model
            || (!model.contains(':')
                && name.strip_suffix(":latest").is_some_and(|base| base == model))
    })
}

#[async_trait]
impl Backend for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String, GatewayError> {
        let url = format!("{}/api/generate", self.host);

        debug!("Calling Ollama API ({}) with a {}-char prompt", self.model, prompt.len());

        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let unreachable_err = |reason: String| {
            error!("Failed to reach Ollama: {reason}");
            GatewayError::BackendUnreachable(format!("Failed to reach Ollama: {reason}"))
        };

        let response = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| unreachable_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(unreachable_err(format!("HTTP {status}: {}", body.trim())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| unreachable_err(e.to_string()))?;

        let data: Value = serde_json::from_str(&body).map_err(|e| {
            error!("Invalid JSON from Ollama: {e}");
            GatewayError::BackendMalformed("Invalid JSON response from Ollama".to_string())
        })?;

        match data.get("response") {
            Some(Value::String(text)) => {
                info!("LLM response: {} chars", text.len());
                Ok(text.clone())
            }
            _ => Err(GatewayError::BackendMalformed(
                "Unexpected Ollama response format".to_string(),
            )),
        }
    }

    fn description(&self) -> String {
        format!("ollama ({})", self.model)
    }
}
