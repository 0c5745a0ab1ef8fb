//! `Backend` trait: abstraction over the generation step.
//!
//! Two strategies implement it: [`OllamaClient`](super::OllamaClient)
//! calls the model directly, [`RunnerBackend`](super::RunnerBackend)
//! makes sure the model is available and hands the prompt to an external
//! agent runner. Exactly one is active per process, chosen by the
//! `[backend] strategy` config field.

use async_trait::async_trait;

use crate::error::GatewayError;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Turns a prompt into output text.
    async fn generate(&self, prompt: &str) -> Result<String, GatewayError>;

    /// Human-readable description of the provider and model.
    ///
    /// Used in startup logs, e.g. `"ollama (qwen2.5-coder:7b)"`.
    fn description(&self) -> String;

    /// Whether the gateway applies `write_files` and `run_shell` itself.
    ///
    /// When false, file and command handling belongs to the backend: the
    /// gateway neither writes nor runs anything, and the response carries
    /// only `output` (no `files` or `shell`).
    fn applies_local_effects(&self) -> bool {
        true
    }
}
