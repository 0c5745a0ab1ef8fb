//! Sequential command runner for `run_shell` batches.
//!
//! Each command goes through [`CommandPolicy`] first and is then spawned
//! directly from its tokens, never through a shell. The batch stops at the
//! first rejection, spawn error, nonzero exit or timeout; on failure only
//! the error is returned, not the partial log.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::{error, info};

use crate::error::{CommandFailure, GatewayError};

use super::files::expand_path;
use super::policy::CommandPolicy;

/// `run_shell` section of a request.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CommandBatch {
    /// Defaults to the process working directory when absent or empty.
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default, deserialize_with = "command_list")]
    pub commands: Vec<String>,
}

/// Accepts `null`/absent as empty and rejects anything that is not a list
/// of strings.
fn command_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                _ => Err(de::Error::custom("Commands must be strings")),
            })
            .collect(),
        Some(_) => Err(de::Error::custom("'commands' must be a list")),
    }
}

pub struct CommandRunner {
    policy: CommandPolicy,
    timeout: Duration,
}

impl CommandRunner {
    /// `timeout` bounds each command individually.
    pub fn new(policy: CommandPolicy, timeout: Duration) -> Self {
        Self { policy, timeout }
    }

    /// Runs a batch and returns the joined log, or `""` when there is no batch.
    pub async fn run(&self, batch: Option<&CommandBatch>) -> Result<String, GatewayError> {
        let Some(batch) = batch else {
            return Ok(String::new());
        };

        let workdir = resolve_workdir(batch.workdir.as_deref())?;
        if !workdir.exists() {
            return Err(GatewayError::BadRequest(format!(
                "Working directory does not exist: {}",
                workdir.display()
            )));
        }

        let mut logs = Vec::with_capacity(batch.commands.len());
        for raw in &batch.commands {
            let tokens = self.policy.validate(raw)?;
            logs.push(self.execute(raw, &tokens, &workdir).await?);
        }

        Ok(logs.join("\n\n"))
    }

    async fn execute(
        &self,
        raw: &str,
        tokens: &[String],
        workdir: &Path,
    ) -> Result<String, GatewayError> {
        let command_line = tokens.join(" ");
        info!("Executing command: {command_line}");

        let spawn_failed = |e: std::io::Error| {
            error!("Failed to execute command {raw}: {e}");
            GatewayError::CommandExecutionFailed {
                command: raw.to_string(),
                failure: CommandFailure::Spawn(e),
            }
        };

        let child = Command::new(&tokens[0])
            .args(&tokens[1..])
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_failed)?;

        // Dropping the future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(spawn_failed)?,
            Err(_) => {
                error!(
                    "Command timed out after {}s: {raw}",
                    self.timeout.as_secs()
                );
                return Err(GatewayError::CommandTimedOut {
                    command: raw.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        let log = format!(
            "$ {command_line}\n{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            error!("Command failed with exit code {code}: {raw}");
            return Err(GatewayError::CommandExecutionFailed {
                command: raw.to_string(),
                failure: CommandFailure::ExitCode(code),
            });
        }

        Ok(log.trim().to_string())
    }
}

fn resolve_workdir(workdir: Option<&str>) -> Result<PathBuf, GatewayError> {
    match workdir.filter(|w| !w.is_empty()) {
        Some(w) => Ok(expand_path(w)),
        None => std::env::current_dir().map_err(|e| {
            GatewayError::BadRequest(format!("Cannot resolve working directory: {e}"))
        }),
    }
}
