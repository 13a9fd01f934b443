use anyhow::{Context, Result};
use chunkswarm::constants::DEFAULT_CONFIG_PATH;
use chunkswarm::{Config, TrackerServer};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chunkswarm-tracker", version, about = "Swarm tracker for chunkswarm nodes")]
struct Args {
    /// YAML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Address to listen on, overriding the configured host
    #[arg(long)]
    host: Option<String>,

    /// TCP port to listen on, overriding the configuration
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let host = args.host.unwrap_or(config.tracker.host);
    let port = args.port.unwrap_or(config.tracker.port);

    let addr = format!("{}:{}", host, port);
    let server = TrackerServer::bind(addr.as_str())
        .await
        .with_context(|| format!("binding tracker on {}", addr))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(server.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("Interrupted, shutting down");
    let _ = shutdown_tx.send(true);

    task.await.context("tracker task panicked")??;
    Ok(())
}
