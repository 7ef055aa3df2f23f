//! Super-peer and weak-peer daemons for the flood-search overlay, built on `mesh-core`.

pub mod client;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod super_peer;
pub mod transport;
pub mod weak_peer;

pub use client::{download, Download, PeerClient};
pub use config::{NodeAddr, SuperPeerConfig, WeakPeerConfig};
pub use error::{NodeError, Result};
pub use super_peer::SuperPeer;
pub use weak_peer::WeakPeer;
