//! Super-peer daemon: accept loop, per-connection handling, and execution of router actions.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};
use std::time::Duration;

use mesh_core::{Message, OutboundAction, QueryId, QueryRouter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::config::SuperPeerConfig;
use crate::error::Result;
use crate::scheduler::RebroadcastScheduler;
use crate::transport;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

type Waiters = SyncMutex<HashMap<QueryId, oneshot::Sender<Option<SocketAddr>>>>;

struct Shared {
    config: SuperPeerConfig,
    router: Mutex<QueryRouter>,
    scheduler: RebroadcastScheduler,
    /// Local weak-peer connections waiting for the answer to their fresh query.
    waiters: Waiters,
}

pub struct SuperPeer {
    shared: Arc<Shared>,
    listener: TcpListener,
    addr: SocketAddr,
}

impl SuperPeer {
    pub async fn bind(config: SuperPeerConfig) -> Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        Self::from_listener(config, listener)
    }

    /// Use an already-bound listener; a configured port of 0 takes the listener's port.
    pub fn from_listener(config: SuperPeerConfig, listener: TcpListener) -> Result<Self> {
        let mut addr = config.addr().resolve()?;
        addr.set_port(listener.local_addr()?.port());
        let neighbors = config
            .neighbors
            .iter()
            .map(|n| n.resolve())
            .collect::<Result<Vec<_>>>()?;

        let mut router = QueryRouter::new(addr, neighbors);
        router.set_rebroadcast_delay(config.rebroadcast_delay());
        router.set_query_retention(config.query_retention_secs / TICK_INTERVAL.as_secs().max(1));
        router.set_max_ttl(config.max_ttl);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                router: Mutex::new(router),
                scheduler: RebroadcastScheduler::new(),
                waiters: SyncMutex::new(HashMap::new()),
            }),
            listener,
            addr,
        })
    }

    /// Listening address as advertised to neighbors.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until `shutdown` completes.
    pub async fn run<S>(self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let Self {
            shared,
            listener,
            addr,
        } = self;
        {
            let router = shared.router.lock().await;
            info!(
                %addr,
                neighbors = router.neighbors().len(),
                weak_peers = shared.config.weak_peers.len(),
                "super-peer listening"
            );
        }

        let tick_shared = shared.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                interval.tick().await;
                tick_shared.router.lock().await.tick();
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
                if let Err(e) = handle_connection(&shared, stream, permit).await {
                    warn!(%peer, "connection dropped: {e}");
                }
            });
        };
        ticker.abort();
        info!(%addr, "super-peer stopped");
        result
    }
}

/// `permit` covers reading and routing the request. A fresh query gives it back before waiting
/// for its answer, so the hits and relays it depends on can still be accepted.
async fn handle_connection(
    shared: &Arc<Shared>,
    mut stream: TcpStream,
    permit: OwnedSemaphorePermit,
) -> Result<()> {
    let read = transport::read_message(&mut stream);
    let Some(msg) = transport::with_deadline(shared.config.read_timeout(), read).await? else {
        return Ok(());
    };
    debug!(action = msg.action(), "inbound");
    if let Message::Register { peer, files } = &msg {
        info!(%peer, files = files.len(), "weak-peer registered");
    }

    let (outcome, answer) = {
        let mut router = shared.router.lock().await;
        let outcome = router.on_message(msg)?;
        // Registered before any action runs, so a Resolve in this batch finds it.
        let answer = outcome.awaiting.map(|query_id| {
            let (tx, rx) = oneshot::channel();
            lock(&shared.waiters).insert(query_id, tx);
            (query_id, rx)
        });
        (outcome, answer)
    };
    dispatch(shared, outcome.actions);

    let reply = match answer {
        Some((query_id, rx)) => {
            drop(permit);
            let window = shared.config.search_timeout();
            match tokio::time::timeout(window, rx).await {
                Ok(Ok(Some(peer))) => Message::QueryHit { query_id, peer },
                Ok(_) => Message::NotFound {
                    query_id: Some(query_id),
                },
                Err(_) => {
                    lock(&shared.waiters).remove(&query_id);
                    debug!(%query_id, "search window elapsed");
                    Message::NotFound {
                        query_id: Some(query_id),
                    }
                }
            }
        }
        None => match outcome.reply {
            Some(reply) => reply,
            None => return Ok(()),
        },
    };
    transport::write_message(&mut stream, &reply).await
}

/// Execute router actions. Each outbound message is its own task so one unreachable
/// peer cannot hold up the others or the inbound connection.
fn dispatch(shared: &Arc<Shared>, actions: Vec<OutboundAction>) {
    for action in actions {
        match action {
            OutboundAction::SendMessage(to, msg) => {
                let deadline = shared.config.send_timeout();
                tokio::spawn(async move {
                    if let Err(e) = transport::send(to, &msg, deadline).await {
                        warn!(%to, action = msg.action(), "delivery failed: {e}");
                    }
                });
            }
            OutboundAction::Schedule {
                query_id,
                step,
                delay,
            } => {
                let s = shared.clone();
                shared
                    .scheduler
                    .schedule(query_id, delay, async move { rebroadcast(s, query_id, step).await });
            }
            OutboundAction::Cancel(query_id) => {
                shared.scheduler.cancel(&query_id);
            }
            OutboundAction::Resolve {
                query_id,
                reply_to,
                hit,
            } => resolve(shared, query_id, reply_to, hit),
        }
    }
}

async fn rebroadcast(shared: Arc<Shared>, query_id: QueryId, step: u32) {
    let actions = shared.router.lock().await.on_rebroadcast(query_id, step);
    debug!(%query_id, step, actions = actions.len(), "rebroadcast step");
    dispatch(&shared, actions);
}

fn resolve(shared: &Arc<Shared>, query_id: QueryId, reply_to: Option<SocketAddr>, hit: Option<SocketAddr>) {
    let waiter = lock(&shared.waiters).remove(&query_id);
    let delivered = match waiter {
        Some(tx) => tx.send(hit).is_ok(),
        None => false,
    };
    if delivered {
        return;
    }
    match (hit, reply_to) {
        (Some(peer), Some(to)) => {
            debug!(%query_id, %to, "origin stopped waiting; sending hit out of band");
            dispatch(
                shared,
                vec![OutboundAction::SendMessage(
                    to,
                    Message::QueryHit { query_id, peer },
                )],
            );
        }
        (Some(peer), None) => info!(%query_id, %peer, "dropping hit: origin no longer waiting"),
        (None, _) => {}
    }
}

fn lock<T>(m: &SyncMutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
