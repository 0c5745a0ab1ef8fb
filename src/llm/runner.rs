//! Ensure-then-delegate backend.
//!
//! Before each generation the configured model is looked up on the Ollama
//! server and pulled if missing. The prompt is then handed to an external
//! agent runner as one JSON object on stdin:
//!
//! ```json
//! {"provider": "ollama", "model": "...", "base_url": "...", "input": "<prompt>"}
//! ```
//!
//! The runner's trimmed stdout is the result. On a nonzero exit its stderr
//! is the error message.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::BackendConfig;
use crate::error::GatewayError;

use super::client::Backend;
use super::ollama::{has_model, OllamaClient};

const PROVIDER: &str = "ollama";

/// Payload written to the runner's stdin.
#[derive(Debug, Serialize)]
struct RunnerPayload<'a> {
    provider: &'a str,
    model: &'a str,
    base_url: &'a str,
    input: &'a str,
}

pub struct RunnerBackend {
    ollama: OllamaClient,
    bin: String,
    args: Vec<String>,
    timeout: Duration,
}

impl RunnerBackend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            ollama: OllamaClient::new(config),
            bin: config.runner.bin.clone(),
            args: config.runner.args.clone(),
            timeout: config.request_timeout(),
        }
    }

    /// Pulls the model if the server does not list it.
    ///
    /// A failed listing is not fatal: the runner will surface the problem
    /// itself if the model really is missing.
    async fn ensure_model(&self) -> Result<(), GatewayError> {
        let model = self.ollama.model();
        match self.ollama.list_models().await {
            Ok(models) if has_model(&models, model) => {
                debug!("Model {model} already available");
                Ok(())
            }
            Ok(_) => {
                info!("Model {model} not found on {}", self.ollama.host());
                self.ollama.pull_model(model).await
            }
            Err(e) => {
                warn!("Failed to query models from Ollama: {e}. Continuing anyway");
                Ok(())
            }
        }
    }

    async fn invoke(&self, prompt: &str) -> Result<String, GatewayError> {
        let payload = RunnerPayload {
            provider: PROVIDER,
            model: self.ollama.model(),
            base_url: self.ollama.host(),
            input: prompt,
        };
        let payload_json = serde_json::to_string(&payload).map_err(|e| {
            GatewayError::RunnerFailed(format!("Serialize runner payload failed: {e}"))
        })?;

        debug!("Invoking agent runner {} {:?}", self.bin, self.args);

        let mut child = Command::new(&self.bin)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    error!("Agent runner '{}' not found", self.bin);
                    GatewayError::RunnerNotFound(self.bin.clone())
                } else {
                    error!("Failed to start agent runner '{}': {e}", self.bin);
                    GatewayError::BackendUnreachable(format!(
                        "Failed to start agent runner '{}': {e}",
                        self.bin
                    ))
                }
            })?;

        // Feeding stdin runs alongside draining stdout/stderr, and both sit
        // under the timeout: a runner that never reads its input, or fills
        // its output pipe first, cannot stall the request.
        let stdin = child.stdin.take();
        let line = format!("{payload_json}\n");
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A runner that exits early closes its end; its exit status tells the story
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    warn!("Writing payload to agent runner failed: {e}");
                }
                // stdin drops here, so the runner sees EOF
            }
        };
        let run = async move {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        // On timeout `run` is dropped with the child, which kills it
        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(GatewayError::RunnerFailed(format!(
                    "Wait for agent runner failed: {e}"
                )))
            }
            Err(_) => {
                error!("Agent runner timed out after {}s", self.timeout.as_secs());
                return Err(GatewayError::RunnerFailed(format!(
                    "Agent runner timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("Agent runner exited with {}: {stderr}", output.status);
            return Err(GatewayError::RunnerFailed(if stderr.is_empty() {
                format!("Agent runner exited with {}", output.status)
            } else {
                stderr
            }));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("Agent runner response: {} chars", stdout.len());
        Ok(stdout)
    }
}

#[async_trait]
impl Backend for RunnerBackend {
    async fn generate(&self, prompt: &str) -> Result<String, GatewayError> {
        self.ensure_model().await?;
        self.invoke(prompt).await
    }

    fn description(&self) -> String {
        format!("runner '{}' ({PROVIDER} {})", self.bin, self.ollama.model())
    }

    fn applies_local_effects(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunnerConfig;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer, bin: &str, args: &[&str]) -> RunnerBackend {
        backend_with_timeout(server, bin, args, 10)
    }

    fn backend_with_timeout(
        server: &MockServer,
        bin: &str,
        args: &[&str],
        timeout_secs: u64,
    ) -> RunnerBackend {
        RunnerBackend::new(&BackendConfig {
            base_url: server.uri(),
            model: "llama3.2".to_string(),
            request_timeout_secs: timeout_secs,
            runner: RunnerConfig {
                bin: bin.to_string(),
                args: args.iter().map(|a| a.to_string()).collect(),
            },
            ..BackendConfig::default()
        })
    }

    async fn mount_tags(server: &MockServer, names: &[&str]) {
        let models: Vec<_> = names
            .iter()
            .map(|n| serde_json::json!({"name": n}))
            .collect();
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": models})),
            )
            .mount(server)
            .await;
    }

    async fn expect_pulls(server: &MockServer, status: u16, times: u64) {
        Mock::given(method("POST"))
            .and(path("/api/pull"))
            .respond_with(
                ResponseTemplate::new(status).set_body_json(serde_json::json!({"status": "success"})),
            )
            .expect(times)
            .mount(server)
            .await;
    }

    // ── Model availability ──────────────────────────────

    #[tokio::test]
    async fn test_available_model_skips_pull_and_sends_payload() {
        let server = MockServer::start().await;
        mount_tags(&server, &["llama3.2:latest"]).await;
        expect_pulls(&server, 200, 0).await;

        // `cat` echoes the payload back as the runner output
        let output = backend(&server, "cat", &[])
            .generate("write a controller")
            .await
            .unwrap();

        let payload: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({
                "provider": "ollama",
                "model": "llama3.2",
                "base_url": server.uri(),
                "input": "write a controller"
            })
        );
    }

    #[tokio::test]
    async fn test_missing_model_is_pulled_before_runner() {
        let server = MockServer::start().await;
        mount_tags(&server, &["qwen2.5-coder:7b"]).await;
        expect_pulls(&server, 200, 1).await;

        let output = backend(&server, "cat", &[]).generate("hi").await.unwrap();
        assert!(output.contains("\"input\":\"hi\""));
    }

    #[tokio::test]
    async fn test_listing_failure_proceeds_without_pull() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        expect_pulls(&server, 200, 0).await;

        let output = backend(&server, "cat", &[]).generate("hi").await.unwrap();
        assert!(output.starts_with('{'));
    }

    #[tokio::test]
    async fn test_pull_failure_never_spawns_runner() {
        let server = MockServer::start().await;
        mount_tags(&server, &[]).await;
        expect_pulls(&server, 500, 1).await;

        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let script = format!("touch '{}'", marker.display());

        let err = backend(&server, "sh", &["-c", &script])
            .generate("hi")
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::ModelProvisionFailed { .. }));
        assert!(!marker.exists());
    }

    // ── Runner process ──────────────────────────────────

    #[tokio::test]
    async fn test_output_is_trimmed() {
        let server = MockServer::start().await;
        mount_tags(&server, &["llama3.2"]).await;

        let output = backend(&server, "sh", &["-c", "printf '\\n  done  \\n\\n'"])
            .generate("hi")
            .await
            .unwrap();
        assert_eq!(output, "done");
    }

    #[tokio::test]
    async fn test_runner_not_found() {
        let server = MockServer::start().await;
        mount_tags(&server, &["llama3.2"]).await;

        let err = backend(&server, "no-such-agent-runner-bin", &[])
            .generate("hi")
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::RunnerNotFound(ref bin) if bin == "no-such-agent-runner-bin"));
    }

    #[tokio::test]
    async fn test_runner_failure_carries_stderr() {
        let server = MockServer::start().await;
        mount_tags(&server, &["llama3.2"]).await;

        let err = backend(&server, "sh", &["-c", "echo 'model exploded' >&2; exit 3"])
            .generate("hi")
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::RunnerFailed(_)));
        assert_eq!(err.to_string(), "model exploded");
    }

    #[tokio::test]
    async fn test_runner_failure_without_stderr() {
        let server = MockServer::start().await;
        mount_tags(&server, &["llama3.2"]).await;

        let err = backend(&server, "sh", &["-c", "exit 4"])
            .generate("hi")
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("Agent runner exited with"));
    }

    #[tokio::test]
    async fn test_runner_ignoring_stdin_times_out() {
        let server = MockServer::start().await;
        mount_tags(&server, &["llama3.2"]).await;

        // Far larger than a pipe buffer, and the runner never reads it
        let prompt = "x".repeat(1024 * 1024);
        let started = std::time::Instant::now();

        let err = backend_with_timeout(&server, "sh", &["-c", "sleep 6"], 1)
            .generate(&prompt)
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::RunnerFailed(_)));
        assert_eq!(err.to_string(), "Agent runner timed out after 1s");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_large_payload_with_chatty_runner() {
        let server = MockServer::start().await;
        mount_tags(&server, &["llama3.2"]).await;

        // Writes well past a pipe buffer before reading stdin
        let script = "head -c 200000 /dev/zero | tr '\\0' 'y'; cat > /dev/null; echo done";
        let prompt = "x".repeat(512 * 1024);

        let output = backend(&server, "sh", &["-c", script])
            .generate(&prompt)
            .await
            .unwrap();

        assert!(output.ends_with("done"));
        assert!(output.starts_with("yyyy"));
    }

    #[test]
    fn test_does_not_apply_local_effects() {
        let backend = RunnerBackend::new(&BackendConfig::default());
        assert!(!backend.applies_local_effects());
        assert_eq!(
            backend.description(),
            "runner 'agent-runner' (ollama qwen2.5-coder:7b)"
        );
    }
}
