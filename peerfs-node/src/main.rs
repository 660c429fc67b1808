// PeerFS node: LAN discovery, TCP transport, HTTP control plane, and the CLI that drives it.

mod benchmark;
mod client;
mod config;
mod control;
mod discovery;
mod transport;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use peerfs_core::{index_directory, Catalog, Node, PeerId, Transport};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use client::ApiClient;
use config::Config;
use control::ControlPlane;
use transport::TcpHost;

/// PeerFS - share a directory with peers on the LAN and fetch files from them
#[derive(Parser)]
#[command(name = "peerfs")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Control plane port (overrides config)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node: index the shared directory, join the LAN and serve the control plane
    Start,

    /// Search the network for files whose name contains QUERY
    Search {
        #[arg(required = true)]
        query: Vec<String>,
    },

    /// Download a file by fingerprint from one or more peers
    Download {
        hash: String,
        #[arg(required = true)]
        peers: Vec<String>,
        /// Fetch the whole file from a single peer instead of chunks
        #[arg(long)]
        whole: bool,
    },

    /// Download a file and log timing to benchmarks.txt
    Benchmark {
        hash: String,
        #[arg(required = true)]
        peers: Vec<String>,
        /// Fetch the whole file from a single peer instead of chunks
        #[arg(long)]
        whole: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let mut cfg = config::load();
    if let Some(port) = cli.port {
        cfg.api_port = port;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match cli.command {
            Commands::Start => start(cfg).await,
            Commands::Search { query } => search(&cfg, &query.join(" ")).await,
            Commands::Download { hash, peers, whole } => download(&cfg, &hash, peers, whole, false).await,
            Commands::Benchmark { hash, peers, whole } => download(&cfg, &hash, peers, whole, true).await,
        }
    })
}

async fn build_catalog(shared_dir: &Path) -> Result<Catalog> {
    tokio::fs::create_dir_all(shared_dir)
        .await
        .with_context(|| format!("cannot create shared directory {}", shared_dir.display()))?;
    let root = shared_dir.to_path_buf();
    let files = tokio::task::spawn_blocking(move || index_directory(&root)).await??;
    Ok(Catalog::new(files))
}

async fn start(cfg: Config) -> Result<()> {
    let catalog = build_catalog(&cfg.shared_dir).await?;
    tracing::info!(dir = %cfg.shared_dir.display(), files = catalog.len(), "indexed shared directory");

    let host = Arc::new(TcpHost::new(PeerId::generate()));
    let local_id = host.local_peer_id();
    let node = Arc::new(
        Node::new(host.clone(), Arc::new(catalog))
            .with_chunk_timeout(cfg.chunk_timeout())
            .with_search_timeout(cfg.search_timeout()),
    );

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, cfg.transport_port))
        .await
        .with_context(|| format!("cannot bind transport port {}", cfg.transport_port))?;
    tracing::info!(peer = %local_id, port = cfg.transport_port, "node started");

    let transport_node = node.clone();
    tokio::spawn(async move {
        if let Err(e) = transport::run_transport(listener, transport_node).await {
            tracing::error!(error = %e, "transport stopped");
        }
    });

    let discovery_host = host.clone();
    let (discovery_port, transport_port) = (cfg.discovery_port, cfg.transport_port);
    tokio::spawn(async move {
        if let Err(e) = discovery::run_discovery(discovery_host, discovery_port, transport_port).await {
            tracing::error!(error = %e, "discovery stopped");
        }
    });

    let plane = Arc::new(ControlPlane::new(node, cfg.download_dir.clone()));
    let bind = SocketAddr::from((Ipv4Addr::LOCALHOST, cfg.api_port));
    tokio::spawn(async move {
        if let Err(e) = control::run_control(bind, plane).await {
            tracing::error!(error = %e, "control plane stopped");
        }
    });

    shutdown_signal().await?;
    tracing::info!("shutting down");
    if let Err(e) = discovery::send_leave(local_id, cfg.discovery_port).await {
        tracing::debug!(error = %e, "leave announcement failed");
    }
    Ok(())
}

async fn search(cfg: &Config, query: &str) -> Result<()> {
    let results = ApiClient::new(cfg.api_port).search(query).await?;
    if results.is_empty() {
        println!("No files found matching '{query}'");
        return Ok(());
    }
    println!("Found {} file(s):", results.len());
    for r in results {
        println!("  {}  ({} bytes)", r.name, r.size);
        println!("    hash: {}", r.file_fingerprint);
        println!("    peer: {}", r.peer_id);
    }
    Ok(())
}

async fn download(cfg: &Config, hash: &str, peers: Vec<String>, whole: bool, benchmark: bool) -> Result<()> {
    let client = ApiClient::new(cfg.api_port);
    let meta = client
        .file_meta(hash)
        .await
        .with_context(|| format!("cannot resolve metadata for {hash}"))?;
    println!("Requesting '{}' from {} peer(s)...", meta.name, peers.len());
    let answer = if benchmark {
        client.benchmark(meta, peers, whole).await?
    } else {
        client.download(meta, peers, whole).await?
    };
    match answer["message"].as_str() {
        Some(message) => println!("{message}"),
        None => println!("{answer}"),
    }
    if benchmark {
        println!(
            "Duration: {} ms, throughput: {:.2} MB/s",
            answer["durationMs"],
            answer["throughputMBps"].as_f64().unwrap_or(0.0)
        );
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
