use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use routewise::{ConfigProvider, Engine, StaticConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Relays local connections to the lowest-latency reachable node")]
struct Args {
    /// Local address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    listen_host: String,

    /// Local port to listen on.
    #[arg(long, default_value_t = 1080)]
    listen_port: u16,

    /// URL serving the JSON node directory.
    #[arg(long, default_value = "https://example.invalid/nodes")]
    remote_nodes_api: String,

    /// Seconds between automatic probe rounds.
    #[arg(long, default_value_t = 60)]
    detect_interval_seconds: u64,

    /// Enable the background probe scheduler.
    #[arg(long, default_value_t = false)]
    auto_detect: bool,
}

impl From<Args> for StaticConfig {
    fn from(args: Args) -> Self {
        StaticConfig {
            listen_host: args.listen_host,
            listen_port: args.listen_port,
            remote_nodes_api: args.remote_nodes_api,
            detect_interval_seconds: args.detect_interval_seconds,
            auto_detect_enabled: args.auto_detect,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();
    let config: StaticConfig = args.into();
    let listen_host = config.listen_host().to_string();
    let listen_port = config.listen_port();

    let engine = Engine::new(Arc::new(config));

    match engine.refresh_nodes().await {
        Ok(count) => tracing::info!(count, "fetched node directory"),
        Err(err) => tracing::warn!(error = %err, "initial node refresh failed, starting empty"),
    }

    engine
        .start_proxy()
        .await
        .with_context(|| format!("failed to start proxy on {listen_host}:{listen_port}"))?;

    tracing::info!(%listen_host, listen_port, "routewised running, press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;

    tracing::info!("shutting down");
    engine.stop_proxy();

    Ok(())
}
