use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use voicedesk::{routes, AppState, BridgeConfig};

/// voicedesk - telephone AI support bridge
#[derive(Parser, Debug)]
#[command(name = "voicedesk")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to an env file to load before reading configuration
    #[arg(short = 'e', long = "env-file", value_name = "FILE")]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Env file first, so LOG_LEVEL and credentials are visible below.
    match cli.env_file {
        Some(path) => {
            dotenvy::from_path(&path)
                .with_context(|| format!("failed to load env file {}", path.display()))?;
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }

    let config = BridgeConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    EnvFilter::new(format!(
                        "voicedesk={level},tower_http={level}",
                        level = config.log_level
                    ))
                }),
        )
        .init();

    info!(
        environment = %config.environment,
        address = %config.address(),
        "starting voicedesk bridge"
    );

    let address: SocketAddr = config
        .address()
        .parse()
        .map_err(|e| anyhow!("invalid server address '{}': {}", config.address(), e))?;
    let state = AppState::new(config);
    let app = routes::create_router(state);

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(%address, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    Ok(())
}
