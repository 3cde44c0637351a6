use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use ah_domain::config::Config;
use ah_gateway::cli::{Cli, Command, ConfigCommand};
use ah_gateway::{api, bootstrap};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, source) = ah_gateway::cli::load_config(config_path)?;
            tracing::info!(config = %source, "configuration loaded");
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, source) = ah_gateway::cli::load_config(config_path)?;
            if !ah_gateway::cli::validate(&config, &source) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _source) = ah_gateway::cli::load_config(config_path)?;
            ah_gateway::cli::show(&config);
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let state = bootstrap::build_app_state(config.clone())?;
    let _cleanup = bootstrap::spawn_background(&state);

    let app = api::router(state)
        .layer(bootstrap::build_cors(&config.server.cors))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "AI Hub gateway listening");

    axum::serve(listener, app).await.context("serving HTTP")
}
