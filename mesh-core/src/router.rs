//! Super-peer query router: registry mutations, TTL-bounded flood search, hit routing.
//! Host-driven: the host passes inbound messages, timer firings and ticks; the router returns actions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::{Message, Query, QueryId, DEFAULT_TTL};
use crate::registry::FileRegistry;

/// Default delay between rebroadcast steps of one query.
pub const DEFAULT_REBROADCAST_DELAY: Duration = Duration::from_secs(1);

/// Default number of ticks a terminal query is remembered for dedup.
pub const DEFAULT_QUERY_RETENTION_TICKS: u64 = 300;

/// Default cap on the hop budget of any query this router accepts.
pub const DEFAULT_MAX_TTL: u32 = 16;

/// Where hits for a query are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    /// Fresh query from an attached weak-peer whose connection is waiting for the answer.
    Local { reply_to: Option<SocketAddr> },
    /// Query relayed by this neighbor super-peer (its listening address).
    Neighbor(SocketAddr),
}

/// Lifecycle of one query id on this super-peer. `Hit` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Propagating,
    Hit,
    Expired,
}

struct QueryState {
    filename: String,
    upstream: Upstream,
    /// Remaining hop budget of the next flood step.
    ttl: u32,
    phase: QueryPhase,
    /// Step number a scheduled rebroadcast must carry to be honoured.
    next_step: u32,
    /// Tick when the query became terminal (for retention).
    terminal_tick: Option<u64>,
}

/// Result of handling one inbound message.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Written back on the inbound connection before it is closed.
    pub reply: Option<Message>,
    /// Fresh query whose answer arrives later through [`OutboundAction::Resolve`].
    pub awaiting: Option<QueryId>,
    pub actions: Vec<OutboundAction>,
}

/// Action for host to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    /// Open a connection to this listening address and send one message.
    SendMessage(SocketAddr, Message),
    /// Call [`QueryRouter::on_rebroadcast`] with `query_id` and `step` after `delay`.
    Schedule {
        query_id: QueryId,
        step: u32,
        delay: Duration,
    },
    /// Drop any pending scheduled step of this query.
    Cancel(QueryId),
    /// Answer the local weak-peer waiting on this query; `hit` is None when the query expired.
    Resolve {
        query_id: QueryId,
        reply_to: Option<SocketAddr>,
        hit: Option<SocketAddr>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("relayed query {0} is missing `{1}`")]
    MissingField(QueryId, &'static str),
    #[error("unexpected `{0}` message")]
    Unexpected(&'static str),
}

/// One super-peer's routing state: its registry and the query-id table.
pub struct QueryRouter {
    self_addr: SocketAddr,
    neighbors: Vec<SocketAddr>,
    registry: FileRegistry,
    queries: HashMap<QueryId, QueryState>,
    rebroadcast_delay: Duration,
    retention_ticks: u64,
    max_ttl: u32,
    tick_count: u64,
}

impl QueryRouter {
    /// `self_addr` is this super-peer's listening address as neighbors know it.
    pub fn new(self_addr: SocketAddr, neighbors: Vec<SocketAddr>) -> Self {
        Self {
            self_addr,
            neighbors: neighbors.into_iter().filter(|n| *n != self_addr).collect(),
            registry: FileRegistry::new(),
            queries: HashMap::new(),
            rebroadcast_delay: DEFAULT_REBROADCAST_DELAY,
            retention_ticks: DEFAULT_QUERY_RETENTION_TICKS,
            max_ttl: DEFAULT_MAX_TTL,
            tick_count: 0,
        }
    }

    pub fn set_rebroadcast_delay(&mut self, delay: Duration) {
        self.rebroadcast_delay = delay;
    }

    /// Set how many ticks a terminal query stays in the dedup table.
    pub fn set_query_retention(&mut self, ticks: u64) {
        self.retention_ticks = ticks;
    }

    /// Cap the hop budget of fresh and relayed queries handled by [`Self::on_message`].
    pub fn set_max_ttl(&mut self, max_ttl: u32) {
        self.max_ttl = max_ttl;
    }

    pub fn neighbors(&self) -> &[SocketAddr] {
        &self.neighbors
    }

    pub fn query_phase(&self, query_id: &QueryId) -> Option<QueryPhase> {
        self.queries.get(query_id).map(|q| q.phase)
    }

    /// Number of query ids currently remembered.
    pub fn tracked_queries(&self) -> usize {
        self.queries.len()
    }

    /// Handle one decoded inbound message.
    pub fn on_message(&mut self, msg: Message) -> Result<Outcome, RouterError> {
        let mut out = Outcome::default();
        match msg {
            Message::Register { peer, files } => {
                self.registry.register(peer, files);
                out.reply = Some(Message::Ack);
            }
            Message::Unregister { peer } => {
                self.registry.unregister(&peer);
                out.reply = Some(Message::Ack);
            }
            Message::Add { peer, files } => {
                self.registry.add(peer, files);
                out.reply = Some(Message::Ack);
            }
            Message::Delete { peer, files } => {
                self.registry.delete(&peer, &files);
                out.reply = Some(Message::Ack);
            }
            Message::List => {
                out.reply = Some(Message::Files {
                    files: self.registry.list(),
                });
            }
            Message::Query(q) => match q.query_id {
                Some(query_id) => {
                    let from = q.from.ok_or(RouterError::MissingField(query_id, "from"))?;
                    let ttl = q.ttl.ok_or(RouterError::MissingField(query_id, "ttl"))?;
                    let ttl = ttl.min(self.max_ttl);
                    out.actions = self.on_relayed_query(query_id, from, q.query, ttl);
                }
                None => {
                    let ttl = q.ttl.unwrap_or(DEFAULT_TTL).min(self.max_ttl);
                    let (query_id, actions) = self.on_query(q.query, ttl, q.reply_to);
                    out.awaiting = Some(query_id);
                    out.actions = actions;
                }
            },
            Message::QueryHit { query_id, peer } => {
                out.actions = self.on_hit(query_id, peer);
            }
            other => return Err(RouterError::Unexpected(other.action())),
        }
        Ok(out)
    }

    /// Fresh query from an attached weak-peer: allocate an id and start flooding.
    pub fn on_query(
        &mut self,
        filename: String,
        ttl: u32,
        reply_to: Option<SocketAddr>,
    ) -> (QueryId, Vec<OutboundAction>) {
        let mut query_id = QueryId::generate();
        while self.queries.contains_key(&query_id) {
            query_id = QueryId::generate();
        }
        self.track(query_id, filename, ttl, Upstream::Local { reply_to });
        (query_id, self.flood(query_id))
    }

    /// Query relayed by a neighbor. Already-seen ids are dropped; the TTL is taken as given.
    pub fn on_relayed_query(
        &mut self,
        query_id: QueryId,
        from: SocketAddr,
        filename: String,
        ttl: u32,
    ) -> Vec<OutboundAction> {
        if self.queries.contains_key(&query_id) {
            return vec![];
        }
        self.track(query_id, filename, ttl, Upstream::Neighbor(from));
        self.flood(query_id)
    }

    /// Scheduled rebroadcast fired. Stale steps and terminal queries are no-ops.
    pub fn on_rebroadcast(&mut self, query_id: QueryId, step: u32) -> Vec<OutboundAction> {
        let due = matches!(
            self.queries.get(&query_id),
            Some(q) if q.phase == QueryPhase::Propagating && q.next_step == step
        );
        if !due {
            return vec![];
        }
        self.flood(query_id)
    }

    /// A peer holding the file was found (locally or by a neighbor). Routed one hop toward
    /// upstream, at most once per query id.
    pub fn on_hit(&mut self, query_id: QueryId, peer: SocketAddr) -> Vec<OutboundAction> {
        let tick = self.tick_count;
        let q = match self.queries.get_mut(&query_id) {
            Some(q) if q.phase != QueryPhase::Hit => q,
            _ => return vec![],
        };
        let mut actions = Vec::new();
        if q.phase == QueryPhase::Propagating {
            actions.push(OutboundAction::Cancel(query_id));
        }
        q.phase = QueryPhase::Hit;
        q.terminal_tick = Some(tick);
        actions.push(match q.upstream {
            Upstream::Neighbor(addr) => {
                OutboundAction::SendMessage(addr, Message::QueryHit { query_id, peer })
            }
            Upstream::Local { reply_to } => OutboundAction::Resolve {
                query_id,
                reply_to,
                hit: Some(peer),
            },
        });
        actions
    }

    /// Periodic tick: forget terminal queries older than the retention window.
    pub fn tick(&mut self) {
        self.tick_count = self.tick_count.saturating_add(1);
        let now = self.tick_count;
        let retention = self.retention_ticks;
        self.queries.retain(|_, q| match q.terminal_tick {
            Some(t) => now.saturating_sub(t) <= retention,
            None => true,
        });
    }

    fn track(&mut self, query_id: QueryId, filename: String, ttl: u32, upstream: Upstream) {
        self.queries.insert(
            query_id,
            QueryState {
                filename,
                upstream,
                ttl,
                phase: QueryPhase::Propagating,
                next_step: 0,
                terminal_tick: None,
            },
        );
    }

    /// One flood step: match locally, else relay with ttl-1 and schedule the next step,
    /// or expire once ttl is spent.
    fn flood(&mut self, query_id: QueryId) -> Vec<OutboundAction> {
        let Some(q) = self.queries.get(&query_id) else {
            return vec![];
        };
        if let Some(holder) = self.registry.find(&q.filename) {
            return self.on_hit(query_id, holder);
        }
        if q.ttl == 0 {
            return self.expire(query_id);
        }

        let self_addr = self.self_addr;
        let delay = self.rebroadcast_delay;
        let Some(q) = self.queries.get_mut(&query_id) else {
            return vec![];
        };
        q.ttl -= 1;
        q.next_step += 1;
        let skip = match q.upstream {
            Upstream::Neighbor(addr) => Some(addr),
            Upstream::Local { .. } => None,
        };
        let relay = Query::relayed(query_id, q.filename.clone(), q.ttl, self_addr);
        let step = q.next_step;

        let mut actions: Vec<OutboundAction> = self
            .neighbors
            .iter()
            .filter(|n| Some(**n) != skip)
            .map(|n| OutboundAction::SendMessage(*n, Message::Query(relay.clone())))
            .collect();
        actions.push(OutboundAction::Schedule {
            query_id,
            step,
            delay,
        });
        actions
    }

    fn expire(&mut self, query_id: QueryId) -> Vec<OutboundAction> {
        let tick = self.tick_count;
        let Some(q) = self.queries.get_mut(&query_id) else {
            return vec![];
        };
        q.phase = QueryPhase::Expired;
        q.terminal_tick = Some(tick);
        let mut actions = vec![OutboundAction::Cancel(query_id)];
        if let Upstream::Local { reply_to } = q.upstream {
            actions.push(OutboundAction::Resolve {
                query_id,
                reply_to,
                hit: None,
            });
        }
        actions
    }
}
