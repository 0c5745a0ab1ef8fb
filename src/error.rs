//! Error kinds surfaced by the gateway.
//!
//! Every component returns [`GatewayError`]; the orchestrator converts it
//! into a `{ ok: false, error }` body with the status from [`GatewayError::status`].

use std::path::PathBuf;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::gateway::CompletionResponse;
use crate::sandbox::policy::PolicyViolation;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unauthorized")]
    Unauthorized,

    /// Malformed JSON, missing prompt, malformed file or command batch.
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    PolicyRejected(#[from] PolicyViolation),

    #[error("Failed to write file {}: {source}", .path.display())]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}", command_failure_message(.command, .failure))]
    CommandExecutionFailed {
        command: String,
        failure: CommandFailure,
    },

    #[error("Command '{command}' timed out after {}s", .timeout.as_secs())]
    CommandTimedOut { command: String, timeout: Duration },

    /// Transport failure reaching the model server or the runner.
    #[error("{0}")]
    BackendUnreachable(String),

    #[error("{0}")]
    BackendMalformed(String),

    #[error("Failed to pull model '{model}': {reason}")]
    ModelProvisionFailed { model: String, reason: String },

    #[error("Agent runner '{0}' not found")]
    RunnerNotFound(String),

    #[error("{0}")]
    RunnerFailed(String),
}

/// Why a validated command did not complete successfully.
#[derive(Debug)]
pub enum CommandFailure {
    /// The child ran and exited nonzero (`-1` when killed by a signal).
    ExitCode(i32),
    /// The child could not be spawned or awaited.
    Spawn(std::io::Error),
}

fn command_failure_message(command: &str, failure: &CommandFailure) -> String {
    match failure {
        CommandFailure::ExitCode(code) => {
            format!("Command '{command}' failed with exit code {code}")
        }
        CommandFailure::Spawn(e) => format!("Failed to execute command {command}: {e}"),
    }
}

impl GatewayError {
    /// HTTP status class for this kind.
    ///
    /// Command failures count as caller faults: the caller supplied the
    /// command, so a failing one is treated like any other bad input.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_)
            | Self::PolicyRejected(_)
            | Self::FileWriteFailed { .. }
            | Self::CommandExecutionFailed { .. }
            | Self::CommandTimedOut { .. } => StatusCode::BAD_REQUEST,
            Self::BackendUnreachable(_)
            | Self::BackendMalformed(_)
            | Self::ModelProvisionFailed { .. }
            | Self::RunnerNotFound(_)
            | Self::RunnerFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(CompletionResponse::failure(self.to_string()))).into_response()
    }
}
