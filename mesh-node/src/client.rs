//! Weak-peer requests: registry updates, search and list against the attached super-peer,
//! and direct downloads from other weak-peers.

use std::net::SocketAddr;
use std::time::Duration;

use mesh_core::{is_plain_filename, Message, Query};
use tokio::io::AsyncReadExt;

use crate::error::{NodeError, Result};
use crate::transport;

/// Outcome of a direct download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Download {
    Found(Vec<u8>),
    NotFound,
}

/// Talks to one super-peer on behalf of the weak-peer listening at `peer`.
#[derive(Debug, Clone)]
pub struct PeerClient {
    peer: SocketAddr,
    super_peer: SocketAddr,
    timeout: Duration,
}

impl PeerClient {
    pub fn new(peer: SocketAddr, super_peer: SocketAddr, timeout: Duration) -> Self {
        Self {
            peer,
            super_peer,
            timeout,
        }
    }

    /// Listening address this client identifies as.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn super_peer(&self) -> SocketAddr {
        self.super_peer
    }

    pub async fn register(&self, files: Vec<String>) -> Result<()> {
        self.mutate(Message::Register {
            peer: self.peer,
            files,
        })
        .await
    }

    pub async fn unregister(&self) -> Result<()> {
        self.mutate(Message::Unregister { peer: self.peer }).await
    }

    pub async fn add(&self, files: Vec<String>) -> Result<()> {
        self.mutate(Message::Add {
            peer: self.peer,
            files,
        })
        .await
    }

    pub async fn delete(&self, files: Vec<String>) -> Result<()> {
        self.mutate(Message::Delete {
            peer: self.peer,
            files,
        })
        .await
    }

    /// Send a registry mutation (`register`/`unregister`/`add`/`delete`) and wait for its ack.
    pub async fn mutate(&self, msg: Message) -> Result<()> {
        match transport::request(self.super_peer, &msg, self.timeout).await? {
            Message::Ack => Ok(()),
            other => Err(NodeError::Unexpected(other.action())),
        }
    }

    /// Flood-search for `filename`. None means no hit arrived within the super-peer's search
    /// window; a later hit may still be delivered to this peer's listener.
    pub async fn search(&self, filename: &str, ttl: Option<u32>) -> Result<Option<SocketAddr>> {
        let msg = Message::Query(Query::fresh(filename, ttl, Some(self.peer)));
        match transport::request(self.super_peer, &msg, self.timeout).await {
            Ok(Message::QueryHit { peer, .. }) => Ok(Some(peer)),
            Ok(Message::NotFound { .. }) | Err(NodeError::Closed) | Err(NodeError::Timeout(_)) => {
                Ok(None)
            }
            Ok(other) => Err(NodeError::Unexpected(other.action())),
            Err(e) => Err(e),
        }
    }

    /// Every filename registered at the attached super-peer (not a network-wide view).
    pub async fn list(&self) -> Result<Vec<String>> {
        match transport::request(self.super_peer, &Message::List, self.timeout).await? {
            Message::Files { files } => Ok(files),
            other => Err(NodeError::Unexpected(other.action())),
        }
    }
}

/// Fetch `filename` from the weak-peer at `holder`. The body is read until the holder closes.
/// No deadline: a stalled holder blocks only this task.
pub async fn download(holder: SocketAddr, filename: &str, connect_timeout: Duration) -> Result<Download> {
    if !is_plain_filename(filename) {
        return Err(NodeError::InvalidFilename(filename.to_string()));
    }
    let msg = Message::Download {
        filename: filename.to_string(),
    };
    let mut stream = transport::connect_and_send(holder, &msg, connect_timeout).await?;
    let header = transport::read_message(&mut stream)
        .await?
        .ok_or(NodeError::Closed)?;
    let size = match header {
        Message::File { found: false, .. } => return Ok(Download::NotFound),
        Message::File { found: true, size } => size,
        other => return Err(NodeError::Unexpected(other.action())),
    };
    let mut body = Vec::with_capacity(size.min(16 * 1024 * 1024) as usize);
    stream.read_to_end(&mut body).await?;
    if body.len() as u64 != size {
        return Err(NodeError::Truncated {
            expected: size,
            got: body.len() as u64,
        });
    }
    Ok(Download::Found(body))
}
