//! Super-peer binary: index server for its attached leaves and one vertex of
//! the static peer graph. Runs until killed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use filemesh::{logging, OverlayConfig, SuperPeer};

#[derive(Parser)]
#[command(name = "super_peer", about = "Filemesh indexing super-peer")]
struct Args {
    /// Member id from the configuration file
    id: i32,

    /// Path to the overlay configuration file
    config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = OverlayConfig::load(&args.config_path)
        .with_context(|| format!("loading {}", args.config_path.display()))?;
    let peer = Arc::new(SuperPeer::new(args.id, &config).context("resolving member record")?);

    logging::init_super_peer(peer.port).context("starting logs")?;

    let listener = peer.bind().await.context("binding indexing server")?;
    tracing::info!(port = peer.port, "starting indexing server");
    println!("starting indexing server on port {}", peer.port);

    peer.run(listener).await;
    Ok(())
}
