use anyhow::{Context, Result};
use chunkswarm::constants::DEFAULT_CONFIG_PATH;
use chunkswarm::{Config, Node};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "chunkswarm-node",
    version,
    about = "Publish and download files through a chunkswarm tracker"
)]
struct Args {
    /// YAML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Tracker address as host:port
    #[arg(long)]
    tracker: Option<String>,

    /// UDP port for chunk traffic
    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Address announced to the tracker
    #[arg(long)]
    identity: Option<String>,

    /// Files or directories to publish
    #[arg(long, num_args = 1..)]
    publish: Vec<PathBuf>,

    /// File names to download
    #[arg(long, num_args = 1..)]
    request: Vec<String>,
}

const STATUS_INTERVAL: Duration = Duration::from_secs(10);

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
    let mut config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if let Some(port) = args.port {
        config.node.port = port;
    }
    if let Some(dir) = args.download_dir {
        config.node.download_dir = dir;
    }
    if args.identity.is_some() {
        config.node.identity = args.identity;
    }
    let tracker = args.tracker.unwrap_or_else(|| config.tracker.address());

    let node = Node::new(config.node)
        .start(tracker.as_str())
        .await
        .with_context(|| format!("connecting to tracker {}", tracker))?;

    for path in &args.publish {
        match node.publish(path).await {
            Ok(names) => info!("Publishing {} file(s) from {}", names.len(), path.display()),
            Err(e) => warn!("Cannot publish {}: {}", path.display(), e),
        }
    }
    for name in &args.request {
        if let Err(e) = node.request(name).await {
            warn!("Cannot request {}: {}", name, e);
        }
    }

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for ctrl-c")?;
                break;
            }
            _ = status.tick() => {
                let current = node.status();
                let stats = node.statistics();
                info!(
                    "{} published, {} downloading, {} bytes up, {} bytes down",
                    current.published.len(),
                    current.downloading.len(),
                    stats.uploaded,
                    stats.downloaded
                );
                for download in current.downloading {
                    info!(
                        "  {}: {}/{} chunks from {} peers",
                        download.name, download.downloaded, download.total, download.peers
                    );
                }
            }
        }
    }

    info!("Interrupted, shutting down");
    node.shutdown().await;
    Ok(())
}
