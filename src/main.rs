mod config;
mod error;
mod gateway;
mod llm;
mod sandbox;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::gateway::Gateway;
use crate::sandbox::CommandPolicy;

fn print_help() {
    println!(
        "\
agent-proxy v{}

HTTP gateway that writes files, runs allowlisted commands and forwards
prompts to a local Ollama model (or to an external agent runner).

USAGE:
    agent-proxy [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Optional TOML configuration file. Without it, settings
                   are read from the environment variables below.

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    In a config file, variables are referenced via ${{VAR_NAME}} syntax.

    RUST_LOG                Log level filter for tracing
                            (e.g. debug, agent_proxy=debug,warn)
    API_TOKEN               Required X-API-KEY value (empty disables auth)
    MODEL_NAME              Model identifier [default: qwen2.5-coder:7b]
    OLLAMA_BASE_URL         Ollama server [default: http://localhost:11434]
    AGENT_HOST              Listen address [default: 0.0.0.0]
    AGENT_PORT              Listen port [default: 6969]
    AGENT_BACKEND           ollama | runner [default: ollama]
    AGENT_RUNNER_BIN        Runner binary for the runner backend
                            [default: agent-runner]
    AGENT_RUNNER_ARGS       Runner arguments [default: run --json]
    GENERATE_TIMEOUT_SECS   Backend request timeout [default: 600]
    PULL_TIMEOUT_SECS       Model pull timeout [default: 1800]
    COMMAND_TIMEOUT_SECS    Per-command timeout [default: 600]

EXAMPLES:
    agent-proxy                            # configured from environment
    agent-proxy /etc/agent-proxy.toml      # custom config file
    RUST_LOG=debug agent-proxy             # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("agent-proxy v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("agent_proxy=info")),
        )
        .init();

    info!("agent-proxy v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from {path}");
            Config::load(&path)?
        }
        None => {
            info!("Loading configuration from environment");
            Config::from_env()?
        }
    };

    info!("Backend: {}", config.backend.strategy_description());
    info!("Ollama: {}", config.backend.base_url);
    info!(
        "Allowed commands: {}",
        CommandPolicy::default().allowed().collect::<Vec<_>>().join(", ")
    );
    info!("Command timeout: {}s", config.commands.timeout_secs);
    if config.server.api_token.is_empty() {
        warn!("API_TOKEN is empty, authentication is disabled");
    }

    let listen: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let backend = llm::from_config(&config.backend);
    info!("LLM: {}", backend.description());

    let gateway = Arc::new(Gateway::new(config, backend));
    gateway::server::serve(gateway, listen).await
}
