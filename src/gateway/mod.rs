//! The request handler: core of the proxy.
//!
//! One request is handled start to finish in this order:
//!
//! 1. authenticate (`X-API-KEY`, skipped in open mode)
//! 2. parse the body and require a non-blank prompt
//! 3. write `write_files`
//! 4. run `run_shell`
//! 5. generate with the backend
//!
//! Any failure stops the sequence, so the backend is never called after a
//! rejected or failed command. Side effects from earlier steps are kept.
//!
//! Steps 3 and 4 are skipped when the backend handles files and commands
//! itself (see [`Backend::applies_local_effects`]).

pub mod server;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::GatewayError;
use crate::llm::Backend;
use crate::sandbox::{CommandBatch, CommandPolicy, CommandRunner, FileEntry, FileWriter};

/// Header carrying the API token.
pub const API_KEY_HEADER: &str = "X-API-KEY";

/// Body of `POST /v1/agent/complete`.
#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(default)]
    pub write_files: Option<Vec<FileEntry>>,
    #[serde(default)]
    pub run_shell: Option<CommandBatch>,
}

impl CompletionRequest {
    /// Parses a raw body regardless of its declared content type.
    pub fn parse(body: &[u8]) -> Result<Self, GatewayError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|_| GatewayError::BadRequest("Invalid JSON payload".to_string()))?;

        if !value.is_object() {
            return Err(GatewayError::BadRequest(
                "Invalid request format".to_string(),
            ));
        }

        let has_prompt = value
            .get("prompt")
            .and_then(Value::as_str)
            .is_some_and(|p| !p.trim().is_empty());
        if !has_prompt {
            return Err(GatewayError::BadRequest(
                "Missing 'prompt' field".to_string(),
            ));
        }

        serde_json::from_value(value).map_err(|e| GatewayError::BadRequest(e.to_string()))
    }
}

/// `{ ok, output?, files?, shell?, error? }`
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CompletionResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompletionResponse {
    pub fn success(output: String, files: Option<Vec<String>>, shell: Option<String>) -> Self {
        Self {
            ok: true,
            output: Some(output),
            files,
            shell,
            error: None,
        }
    }

    pub fn failure(error: String) -> Self {
        Self {
            ok: false,
            output: None,
            files: None,
            shell: None,
            error: Some(error),
        }
    }
}

pub struct Gateway {
    config: Config,
    writer: FileWriter,
    runner: CommandRunner,
    backend: Box<dyn Backend>,
}

impl Gateway {
    pub fn new(config: Config, backend: Box<dyn Backend>) -> Self {
        let runner = CommandRunner::new(CommandPolicy::default(), config.commands.timeout());
        Self {
            config,
            writer: FileWriter::new(),
            runner,
            backend,
        }
    }

    /// Runs one request through every step and builds the success body.
    pub async fn complete(
        &self,
        api_key: Option<&str>,
        body: &[u8],
    ) -> Result<CompletionResponse, GatewayError> {
        if !self.config.is_authorized(api_key) {
            warn!("Rejected request with missing or invalid API key");
            return Err(GatewayError::Unauthorized);
        }

        let request = CompletionRequest::parse(body)?;
        debug!(
            "Request: {} file(s), {} command(s)",
            request.write_files.as_ref().map_or(0, Vec::len),
            request.run_shell.as_ref().map_or(0, |b| b.commands.len())
        );

        if !self.backend.applies_local_effects() {
            if request.write_files.is_some() || request.run_shell.is_some() {
                warn!(
                    "Ignoring write_files/run_shell, handled by {}",
                    self.backend.description()
                );
            }
            let output = self.backend.generate(&request.prompt).await?;
            info!("Completed delegated request: {} chars of output", output.len());
            return Ok(CompletionResponse::success(output, None, None));
        }

        let files = self
            .writer
            .write_all(request.write_files.as_deref().unwrap_or_default())
            .await?;
        let shell = self.runner.run(request.run_shell.as_ref()).await?;
        let output = self.backend.generate(&request.prompt).await?;

        info!(
            "Completed request: {} file(s) written, {} chars of output",
            files.len(),
            output.len()
        );

        Ok(CompletionResponse::success(output, Some(files), Some(shell)))
    }
}
