//! Logging pipeline
//!
//! Every process writes plain-text logs under `logs/`: super-peers to
//! `logs/super_peers/<port>.log` (mirrored to stdout), leaves to
//! `logs/leaf_nodes/<port>_server.log` for the inbound request handlers and
//! `logs/leaf_nodes/<port>_client.log` for everything else. The subscriber's
//! writer lock keeps lines from interleaving across tasks.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Install the super-peer subscriber: one log file plus stdout.
pub fn init_super_peer(port: i32) -> Result<()> {
    let file = open_log(Path::new("logs/super_peers"), &format!("{port}.log"))?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .with(fmt::layer().with_writer(std::io::stdout))
        .init();
    Ok(())
}

/// Install the leaf subscriber: separate server and client log files, nothing
/// on stdout (the terminal belongs to the interactive driver).
pub fn init_leaf(port: i32) -> Result<()> {
    let dir = Path::new("logs/leaf_nodes");
    let server = open_log(dir, &format!("{port}_server.log"))?;
    let client = open_log(dir, &format!("{port}_client.log"))?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(server))
                .with_filter(filter_fn(|meta| is_server_target(meta.target()))),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(client))
                .with_filter(filter_fn(|meta| !is_server_target(meta.target()))),
        )
        .init();
    Ok(())
}

fn is_server_target(target: &str) -> bool {
    target.starts_with("filemesh::leaf::server")
}

fn open_log(dir: &Path, name: &str) -> Result<File> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(name);
    File::create(&path).with_context(|| format!("creating {}", path.display()))
}

/// Emit an analysis line for post-hoc measurement. These are grep-friendly:
/// prefixed with `!`, keyed by a per-request counter, and stamped with
/// microsecond precision independent of the subscriber's own timestamps.
pub fn eval(key: u64, kind: &str, phase: &str) {
    tracing::info!(
        target: "eval",
        "!{key} [{}] [{kind}] [{phase}]",
        chrono::Utc::now().timestamp_micros()
    );
}
