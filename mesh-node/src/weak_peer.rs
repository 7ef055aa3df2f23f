//! Weak-peer daemon: keeps the super-peer's registry in sync with a shared directory and
//! serves downloads of the files in it.

use std::collections::BTreeSet;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use mesh_core::{is_plain_filename, FileInventory, Message};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::client::PeerClient;
use crate::config::WeakPeerConfig;
use crate::error::{NodeError, Result};
use crate::transport;

struct Shared {
    config: WeakPeerConfig,
    client: PeerClient,
    inventory: Mutex<FileInventory>,
}

pub struct WeakPeer {
    shared: Arc<Shared>,
    listener: TcpListener,
}

impl WeakPeer {
    pub async fn bind(config: WeakPeerConfig) -> Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        Self::from_listener(config, listener)
    }

    /// Use an already-bound listener; a configured port of 0 takes the listener's port.
    pub fn from_listener(config: WeakPeerConfig, listener: TcpListener) -> Result<Self> {
        let mut addr = config.addr().resolve()?;
        addr.set_port(listener.local_addr()?.port());
        let super_peer = config.super_peer.resolve()?;
        let client = PeerClient::new(addr, super_peer, config.request_timeout());
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                client,
                inventory: Mutex::new(FileInventory::default()),
            }),
            listener,
        })
    }

    /// Listening address other peers download from.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.client.peer()
    }

    /// Client bound to this peer's identity and super-peer.
    pub fn client(&self) -> PeerClient {
        self.shared.client.clone()
    }

    /// Register, then serve downloads and sync the directory until `shutdown` completes.
    /// Unregisters on the way out.
    pub async fn run<S>(self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let Self { shared, listener } = self;
        let addr = shared.client.peer();
        info!(%addr, super_peer = %shared.client.super_peer(), dir = %shared.config.files_dir.display(), "weak-peer listening");

        register(&shared).await;

        let sync_shared = shared.clone();
        let syncer = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sync_shared.config.sync_interval());
            interval.tick().await;
            loop {
                interval.tick().await;
                sync_once(&sync_shared).await;
            }
        });

        let limiter = Arc::new(Semaphore::new(shared.config.max_connections.max(1)));
        tokio::pin!(shutdown);
        let result = loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break Ok(()),
                permit = limiter.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break Ok(()),
                },
            };
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                },
            };
            let shared = shared.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(&shared, stream).await {
                    warn!(%peer, "connection dropped: {e}");
                }
                drop(permit);
            });
        };
        syncer.abort();
        if let Err(e) = shared.client.unregister().await {
            warn!("unregister failed: {e}");
        }
        info!(%addr, "weak-peer stopped");
        result
    }
}

/// Top-level regular files of `dir`.
pub async fn scan_dir(dir: &Path) -> std::io::Result<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            out.insert(name);
        }
    }
    Ok(out)
}

async fn register(shared: &Shared) {
    let files = match scan_dir(&shared.config.files_dir).await {
        Ok(f) => f,
        Err(e) => {
            warn!(dir = %shared.config.files_dir.display(), "scan failed, registering empty set: {e}");
            BTreeSet::new()
        }
    };
    let count = files.len();
    let msg = {
        let mut inventory = shared.inventory.lock().await;
        inventory.refresh(files);
        inventory.register_message(shared.client.peer())
    };
    match shared.client.mutate(msg).await {
        Ok(()) => {
            shared.inventory.lock().await.mark_registered();
            info!(files = count, "registered with super-peer");
        }
        Err(e) => warn!("register failed, will sync deltas later: {e}"),
    }
}

/// One sync cycle: rescan, push add/delete deltas. An unreadable directory skips the cycle;
/// a failed push is retried on the next cycle.
async fn sync_once(shared: &Shared) {
    let current = match scan_dir(&shared.config.files_dir).await {
        Ok(c) => c,
        Err(e) => {
            warn!(dir = %shared.config.files_dir.display(), "scan failed, skipping sync: {e}");
            return;
        }
    };
    let delta = shared.inventory.lock().await.refresh(current);
    if delta.is_empty() {
        return;
    }
    debug!(added = delta.added.len(), removed = delta.removed.len(), "directory changed");
    for msg in delta.messages(shared.client.peer()) {
        if let Err(e) = shared.client.mutate(msg).await {
            warn!("sync push failed: {e}");
            return;
        }
    }
    shared.inventory.lock().await.mark_synced(&delta);
}

async fn handle_connection(shared: &Shared, mut stream: TcpStream) -> Result<()> {
    let read = transport::read_message(&mut stream);
    let Some(msg) = transport::with_deadline(shared.config.request_timeout(), read).await? else {
        return Ok(());
    };
    match msg {
        Message::Download { filename } => serve_download(shared, &mut stream, &filename).await,
        Message::QueryHit { query_id, peer } => {
            info!(%query_id, %peer, "late query hit");
            Ok(())
        }
        other => Err(NodeError::Unexpected(other.action())),
    }
}

/// Reply with a `file` header, then the raw bytes when the file is offered and readable.
async fn serve_download(shared: &Shared, stream: &mut TcpStream, filename: &str) -> Result<()> {
    let offered = is_plain_filename(filename) && shared.inventory.lock().await.contains(filename);
    let file = if offered {
        tokio::fs::File::open(shared.config.files_dir.join(filename)).await.ok()
    } else {
        None
    };
    let Some(file) = file else {
        debug!(filename, "download miss");
        return transport::write_message(stream, &Message::File { found: false, size: 0 }).await;
    };
    let size = file.metadata().await?.len();
    transport::write_message(stream, &Message::File { found: true, size }).await?;
    let sent = tokio::io::copy(&mut file.take(size), stream).await?;
    stream.shutdown().await?;
    debug!(filename, bytes = sent, "download served");
    Ok(())
}
