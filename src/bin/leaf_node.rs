//! Leaf node binary: the interactive terminal driving one leaf.
//!
//! Commands: `s` search, `o` obtain, `r` refresh (alias for obtain), `f`
//! print catalogs, `l`/`m`/`d` super-peer inspector dumps, `q` quit.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use filemesh::leaf::link::SuperPeerLink;
use filemesh::leaf::store::DiskStore;
use filemesh::leaf::{obtain, ObtainOutcome};
use filemesh::wire::SessionRequest;
use filemesh::{logging, LeafNode, MeshError, OverlayConfig};

static SEARCH_REQUESTS: AtomicU64 = AtomicU64::new(0);
static OBTAIN_REQUESTS: AtomicU64 = AtomicU64::new(0);

#[derive(Parser)]
#[command(name = "leaf_node", about = "Filemesh leaf node")]
struct Args {
    /// Member id from the configuration file
    id: i32,

    /// Path to the overlay configuration file
    config_path: PathBuf,

    /// Directory containing the local/ and remote/ subdirectories
    directory: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = OverlayConfig::load(&args.config_path)
        .with_context(|| format!("loading {}", args.config_path.display()))?;
    let store = DiskStore::new(&args.directory)
        .with_context(|| format!("validating {}", args.directory.display()))?;
    let node = Arc::new(
        LeafNode::new(args.id, &config, Arc::new(store)).context("resolving member record")?,
    );

    logging::init_leaf(node.port).context("starting logs")?;

    let listener = node.bind().await.context("starting node server")?;
    node.rescan_local()
        .await
        .context("scanning local directory")?;
    let link = SuperPeerLink::connect(node.super_peer_port, node.port)
        .await
        .context("connecting to super-peer")?;
    let link = Arc::new(Mutex::new(link));

    tokio::spawn(Arc::clone(&node).run_server(listener));
    tokio::spawn(Arc::clone(&node).registration_loop(Arc::clone(&link)));

    println!("current node id: {}\n", node.port);
    repl(node, link).await
}

async fn repl(node: Arc<LeafNode>, link: Arc<Mutex<SuperPeerLink>>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let Some(request) = prompt(&mut lines, "request [(s)earch|(o)btain|(q)uit]: ").await?
        else {
            return Ok(());
        };

        match request.chars().next() {
            Some('s' | 'S') => search_request(&node, &link, &mut lines).await?,
            Some('o' | 'O' | 'r' | 'R') => obtain_request(&node, &mut lines).await?,
            Some('q' | 'Q') => {
                link.lock().await.disconnect().await;
                return Ok(());
            }
            Some('f' | 'F') => println!("\n{}", node.catalogs_display().await),
            Some('l' | 'L') => inspect(&link, SessionRequest::DumpIndex).await,
            Some('m' | 'M') => inspect(&link, SessionRequest::DumpMessageIds).await,
            Some('d' | 'D') => inspect(&link, SessionRequest::DumpPending).await,
            None => {}
            _ => println!("\nunexpected request\n"),
        }
    }
}

async fn search_request(
    node: &LeafNode,
    link: &Mutex<SuperPeerLink>,
    lines: &mut Lines<BufReader<Stdin>>,
) -> anyhow::Result<()> {
    let Some(filename) = prompt(lines, "filename: ").await? else {
        return Ok(());
    };

    let key = SEARCH_REQUESTS.fetch_add(1, Ordering::Relaxed);
    logging::eval(key, "search request", "start");
    match node.search(link, &filename).await {
        Ok(hits) if hits.is_empty() => println!("\nfile {filename:?} not found\n"),
        Ok(hits) => {
            let list = hits
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(",");
            println!("\nnode(s) with file {filename:?}: {list}\n");
        }
        Err(e) => {
            tracing::warn!(error = %e, "search failed");
            println!("\nunexpected connection issue: no search performed\n");
        }
    }
    logging::eval(key, "search request", "end");
    Ok(())
}

async fn obtain_request(
    node: &Arc<LeafNode>,
    lines: &mut Lines<BufReader<Stdin>>,
) -> anyhow::Result<()> {
    let Some(target) = prompt(lines, "node: ").await? else {
        return Ok(());
    };
    let key = OBTAIN_REQUESTS.fetch_add(1, Ordering::Relaxed);
    logging::eval(key, "retrieve request", "start");

    let Ok(target) = target.parse::<i32>() else {
        println!("\nnode '{target}' is not valid: no retrieval performed\n");
        logging::eval(key, "retrieve request", "end");
        return Ok(());
    };
    if node.is_self(target) {
        println!("\nnode '{target}' is current client: no retrieval performed\n");
        logging::eval(key, "retrieve request", "end");
        return Ok(());
    }

    logging::eval(key, "retrieve request", "pause");
    let Some(filename) = prompt(lines, "filename: ").await? else {
        return Ok(());
    };
    logging::eval(key, "retrieve request", "unpause");

    match obtain(node, target, &filename).await {
        Ok(ObtainOutcome::Downloaded { local_name, .. }) => {
            println!("\nfile {filename:?} downloaded as {local_name:?}\n");
        }
        Ok(ObtainOutcome::Updated {
            local_name,
            version,
        }) => {
            println!("\nfile {local_name:?} updated to version {version}\n");
        }
        Err(MeshError::FileNotFound { .. }) => {
            println!("\nnode '{target}' does not have file {filename:?}: no retrieval performed\n");
        }
        Err(MeshError::StatFailed { .. }) => {
            println!("\ncould not read file {filename:?}'s stats: no retrieval performed\n");
        }
        Err(MeshError::Connect { .. }) => {
            println!("\nnode '{target}' is not valid: no retrieval performed\n");
        }
        Err(e) => {
            tracing::warn!(error = %e, "obtain failed");
            println!("\nunexpected connection issue: no retrieval performed\n");
        }
    }
    logging::eval(key, "retrieve request", "end");
    Ok(())
}

async fn inspect(link: &Mutex<SuperPeerLink>, request: SessionRequest) {
    if let Err(e) = link.lock().await.inspect(request).await {
        tracing::warn!(error = %e, "inspector request failed");
        println!("\nunexpected connection issue: no dump requested\n");
    }
}

/// Print a prompt and read one trimmed line; `None` means stdin closed.
async fn prompt(
    lines: &mut Lines<BufReader<Stdin>>,
    label: &str,
) -> anyhow::Result<Option<String>> {
    print!("{label}");
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?.map(|l| l.trim().to_owned()))
}
