// mesh-node: run a super-peer or weak-peer, or issue one-shot weak-peer requests.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use mesh_node::{download, Download, PeerClient, SuperPeer, SuperPeerConfig, WeakPeer, WeakPeerConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mesh-node", version, about = "Super-peer flood-search file-sharing overlay")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a super-peer daemon.
    SuperPeer { config: PathBuf },
    /// Run a weak-peer daemon sharing its configured directory.
    WeakPeer { config: PathBuf },
    /// Search the overlay through the configured super-peer.
    Search {
        config: PathBuf,
        filename: String,
        #[arg(long)]
        ttl: Option<u32>,
    },
    /// Download a file from a weak-peer into the configured directory.
    Download {
        config: PathBuf,
        peer: SocketAddr,
        filename: String,
    },
    /// List filenames known to the configured super-peer.
    List { config: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli.command))
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::SuperPeer { config } => {
            let cfg = SuperPeerConfig::load(&config)?;
            let node = SuperPeer::bind(cfg).await.context("binding super-peer")?;
            node.run(shutdown_signal()).await?;
        }
        Command::WeakPeer { config } => {
            let cfg = WeakPeerConfig::load(&config)?;
            let node = WeakPeer::bind(cfg).await.context("binding weak-peer")?;
            node.run(shutdown_signal()).await?;
        }
        Command::Search {
            config,
            filename,
            ttl,
        } => {
            let client = client_for(&config)?;
            let started = std::time::Instant::now();
            match client.search(&filename, ttl).await? {
                Some(peer) => println!("{filename}: found at {peer}"),
                None => println!("{filename}: not found"),
            }
            println!("response time: {:.2?}", started.elapsed());
        }
        Command::Download {
            config,
            peer,
            filename,
        } => {
            let cfg = WeakPeerConfig::load(&config)?;
            match download(peer, &filename, cfg.request_timeout()).await? {
                Download::Found(bytes) => {
                    let dest = cfg.files_dir.join(&filename);
                    tokio::fs::write(&dest, &bytes)
                        .await
                        .with_context(|| format!("writing {}", dest.display()))?;
                    println!("{filename}: {} bytes saved to {}", bytes.len(), dest.display());
                }
                Download::NotFound => println!("{filename}: not found at {peer}"),
            }
        }
        Command::List { config } => {
            for f in client_for(&config)?.list().await? {
                println!(" - {f}");
            }
        }
    }
    Ok(())
}

fn client_for(config: &Path) -> anyhow::Result<PeerClient> {
    let cfg = WeakPeerConfig::load(config)?;
    Ok(PeerClient::new(
        cfg.addr().resolve()?,
        cfg.super_peer.resolve()?,
        cfg.request_timeout(),
    ))
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
