//! Promwise Daemon - LLM-assisted analysis over a Prometheus backend

use anyhow::{Context, Result};
use clap::Parser;
use promwise_common::config::{Config, CONFIG_PATH};
use promwise_common::{logging, OpenAiBackend, PrometheusGateway, ReasoningClient};
use promwised::agent::Agent;
use promwised::metrics::AgentMetrics;
use promwised::server::{self, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "promwised", version, about = "Prometheus analysis agent")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;
    logging::init(&config.logging)?;
    config.validate()?;

    info!("Promwise daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let gateway = Arc::new(PrometheusGateway::new(
        &config.prometheus.url,
        config.prometheus_timeout(),
    )?);
    let backend = Arc::new(OpenAiBackend::new(
        &config.reasoning.endpoint,
        &config.reasoning.model,
        config.reasoning.api_key.clone(),
        config.reasoning_timeout(),
    )?);
    let reasoning = ReasoningClient::new(backend)
        .with_max_tokens(config.reasoning.max_tokens)
        .with_history_turns(config.agent.history_turns_in_prompt);

    let shutdown = CancellationToken::new();
    let metrics = AgentMetrics::new().context("Failed to register self-metrics")?;
    let agent = Agent::new(gateway, reasoning, config.agent.clone(), metrics)
        .with_retry_policy(config.retry_policy())
        .with_shutdown(shutdown.clone());

    info!(
        prometheus = %config.prometheus.url,
        model = %config.reasoning.model,
        "Backends configured"
    );

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down gracefully");
        }
        signal.cancel();
    });

    server::run(
        AppState::new(Arc::new(agent)),
        &config.server.host,
        config.server.port,
        shutdown,
    )
    .await
}
