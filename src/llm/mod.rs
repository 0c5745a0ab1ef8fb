pub mod client;
pub mod ollama;
pub mod runner;

use crate::config::{BackendConfig, BackendStrategy};

pub use client::Backend;
pub use ollama::OllamaClient;
pub use runner::RunnerBackend;

/// Builds the backend selected by `[backend] strategy`.
pub fn from_config(config: &BackendConfig) -> Box<dyn Backend> {
    match config.strategy {
        BackendStrategy::Ollama => Box::new(OllamaClient::new(config)),
        BackendStrategy::Runner => Box::new(RunnerBackend::new(config)),
    }
}
