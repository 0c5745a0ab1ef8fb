use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Empty disables authentication. Supports ${ENV_VAR} substitution
    #[serde(default)]
    pub api_token: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendStrategy {
    /// Direct `/api/generate` call
    #[default]
    Ollama,
    /// Ensure the model is pulled, then delegate to the runner binary
    Runner,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default)]
    pub strategy: BackendStrategy,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_generate_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_secs: u64,
    #[serde(default)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunnerConfig {
    #[serde(default = "default_runner_bin")]
    pub bin: String,
    #[serde(default = "default_runner_args")]
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommandsConfig {
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6969
}

fn default_model() -> String {
    "qwen2.5-coder:7b".to_string()
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_generate_timeout() -> u64 {
    600
}

fn default_pull_timeout() -> u64 {
    1800
}

fn default_runner_bin() -> String {
    "agent-runner".to_string()
}

fn default_runner_args() -> Vec<String> {
    vec!["run".to_string(), "--json".to_string()]
}

fn default_command_timeout() -> u64 {
    600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_token: String::new(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            strategy: BackendStrategy::default(),
            model: default_model(),
            base_url: default_base_url(),
            request_timeout_secs: default_generate_timeout(),
            pull_timeout_secs: default_pull_timeout(),
            runner: RunnerConfig::default(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            bin: default_runner_bin(),
            args: default_runner_args(),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_command_timeout(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }

    /// Human-readable description of the active strategy
    pub fn strategy_description(&self) -> String {
        match self.strategy {
            BackendStrategy::Ollama => format!("ollama generate ({})", self.model),
            BackendStrategy::Runner => {
                format!("runner '{}' via ollama ({})", self.runner.bin, self.model)
            }
        }
    }
}

impl CommandsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Loads a TOML config file, expanding `${VAR}` references first.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file {path}"))?;
        // Expand environment variables like ${API_TOKEN}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        config.validated()
    }

    /// Builds the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(token) = lookup("API_TOKEN") {
            config.server.api_token = token;
        }
        if let Some(host) = lookup("AGENT_HOST") {
            config.server.host = host;
        }
        if let Some(port) = lookup("AGENT_PORT") {
            config.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid AGENT_PORT: {port}"))?;
        }
        if let Some(model) = lookup("MODEL_NAME") {
            config.backend.model = model;
        }
        if let Some(url) = lookup("OLLAMA_BASE_URL") {
            config.backend.base_url = url;
        }
        if let Some(strategy) = lookup("AGENT_BACKEND") {
            config.backend.strategy = match strategy.trim().to_ascii_lowercase().as_str() {
                "ollama" | "generate" => BackendStrategy::Ollama,
                "runner" => BackendStrategy::Runner,
                other => bail!("Unknown AGENT_BACKEND '{other}' (expected 'ollama' or 'runner')"),
            };
        }
        if let Some(bin) = lookup("AGENT_RUNNER_BIN") {
            config.backend.runner.bin = bin;
        }
        if let Some(args) = lookup("AGENT_RUNNER_ARGS") {
            config.backend.runner.args = shlex::split(&args)
                .ok_or_else(|| anyhow!("Invalid AGENT_RUNNER_ARGS: {args}"))?;
        }
        if let Some(secs) = lookup_secs(&lookup, "GENERATE_TIMEOUT_SECS")? {
            config.backend.request_timeout_secs = secs;
        }
        if let Some(secs) = lookup_secs(&lookup, "PULL_TIMEOUT_SECS")? {
            config.backend.pull_timeout_secs = secs;
        }
        if let Some(secs) = lookup_secs(&lookup, "COMMAND_TIMEOUT_SECS")? {
            config.commands.timeout_secs = secs;
        }

        config.validated()
    }

    fn validated(mut self) -> Result<Self> {
        let url = url::Url::parse(&self.backend.base_url)
            .with_context(|| format!("Invalid backend base URL: {}", self.backend.base_url))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            bail!(
                "Backend base URL must be http or https (got {}://)",
                url.scheme()
            );
        }
        // Strip trailing slash for consistent URL construction
        self.backend.base_url = self.backend.base_url.trim_end_matches('/').to_string();

        if self.backend.model.trim().is_empty() {
            bail!("Model name must not be empty");
        }
        if self.commands.timeout_secs == 0 {
            bail!("Command timeout must be at least one second");
        }
        Ok(self)
    }

    /// Checks the `X-API-KEY` header value against the configured token.
    ///
    /// With no token configured every request is allowed.
    pub fn is_authorized(&self, presented: Option<&str>) -> bool {
        let expected = &self.server.api_token;
        if expected.is_empty() {
            return true;
        }
        presented.is_some_and(|key| {
            constant_time_eq::constant_time_eq(key.as_bytes(), expected.as_bytes())
        })
    }
}

fn lookup_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid {key}: {raw}"))
        })
        .transpose()
}
