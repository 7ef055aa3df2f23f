//! Overlay wire protocol: action-tagged messages and query identifiers.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Hop budget applied to a fresh query that does not carry one.
pub const DEFAULT_TTL: u32 = 3;

/// Search identifier, assigned once by the super-peer that first receives a fresh query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(pub uuid::Uuid);

impl QueryId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Search request body. A weak-peer sends it without `query_id`; super-peers relay it with
/// `query_id`, `ttl` and `from` filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<QueryId>,
    /// Requested filename.
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    /// Listening address of the super-peer that relayed this query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<SocketAddr>,
    /// Listening address of the issuing weak-peer, for hits that arrive after it stopped waiting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<SocketAddr>,
}

impl Query {
    pub fn fresh(filename: impl Into<String>, ttl: Option<u32>, reply_to: Option<SocketAddr>) -> Self {
        Self {
            query_id: None,
            query: filename.into(),
            ttl,
            from: None,
            reply_to,
        }
    }

    pub fn relayed(query_id: QueryId, filename: impl Into<String>, ttl: u32, from: SocketAddr) -> Self {
        Self {
            query_id: Some(query_id),
            query: filename.into(),
            ttl: Some(ttl),
            from: Some(from),
            reply_to: None,
        }
    }
}

/// All wire messages. Encoding is JSON tagged by `action`; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Message {
    /// Weak-peer announces (or re-announces) its full file set.
    Register { peer: SocketAddr, files: Vec<String> },
    /// Weak-peer leaves the super-peer's index.
    Unregister { peer: SocketAddr },
    /// Files that appeared on the weak-peer since the last sync.
    Add { peer: SocketAddr, files: Vec<String> },
    /// Files that disappeared from the weak-peer since the last sync.
    Delete { peer: SocketAddr, files: Vec<String> },
    /// Acknowledges a registry mutation.
    Ack,
    /// Request every filename known to the super-peer.
    List,
    /// Reply to `List`: deduplicated filenames.
    Files { files: Vec<String> },
    /// Fresh (weak→super) or relayed (super→super) search.
    Query(Query),
    /// A peer holding the requested file, routed back toward the query's origin.
    QueryHit { query_id: QueryId, peer: SocketAddr },
    /// No hit arrived within the search window.
    NotFound {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query_id: Option<QueryId>,
    },
    /// Weak-peer asks another weak-peer for a file.
    Download { filename: String },
    /// Download reply header; `size` raw bytes follow when `found`.
    File { found: bool, size: u64 },
}

impl Message {
    /// Wire `action` tag, for logs and errors.
    pub fn action(&self) -> &'static str {
        match self {
            Message::Register { .. } => "register",
            Message::Unregister { .. } => "unregister",
            Message::Add { .. } => "add",
            Message::Delete { .. } => "delete",
            Message::Ack => "ack",
            Message::List => "list",
            Message::Files { .. } => "files",
            Message::Query(_) => "query",
            Message::QueryHit { .. } => "queryhit",
            Message::NotFound { .. } => "notfound",
            Message::Download { .. } => "download",
            Message::File { .. } => "file",
        }
    }
}
