//! Load node config from a TOML file, then apply environment overrides.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{NodeError, Result};

/// A host/port pair as written in config files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolve to the first socket address for this host.
    pub fn resolve(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| NodeError::Config(format!("{}:{} did not resolve", self.host, self.port)))
    }
}

/// Super-peer configuration.
/// Env overrides: MESH_HOST, MESH_PORT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuperPeerConfig {
    pub host: String,
    pub port: u16,
    /// Static overlay links to other super-peers.
    #[serde(default)]
    pub neighbors: Vec<NodeAddr>,
    /// Weak-peers expected to attach here (informational).
    #[serde(default)]
    pub weak_peers: Vec<NodeAddr>,
    #[serde(default = "default_rebroadcast_delay_ms")]
    pub rebroadcast_delay_ms: u64,
    /// Upper bound on how long a fresh query's connection waits for an answer.
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
    /// Connect + write budget for one outbound relay or hit.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// How long an inbound connection may take to deliver its request.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Hop budgets above this are lowered to it.
    #[serde(default = "default_max_ttl")]
    pub max_ttl: u32,
    #[serde(default = "default_super_max_connections")]
    pub max_connections: usize,
    /// How long a finished query id is remembered for dedup.
    #[serde(default = "default_query_retention_secs")]
    pub query_retention_secs: u64,
}

fn default_rebroadcast_delay_ms() -> u64 {
    1000
}
fn default_search_timeout_ms() -> u64 {
    5000
}
fn default_send_timeout_ms() -> u64 {
    2000
}
fn default_read_timeout_ms() -> u64 {
    2000
}
fn default_max_ttl() -> u32 {
    mesh_core::DEFAULT_MAX_TTL
}
fn default_super_max_connections() -> usize {
    256
}
fn default_query_retention_secs() -> u64 {
    300
}

impl SuperPeerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            neighbors: Vec::new(),
            weak_peers: Vec::new(),
            rebroadcast_delay_ms: default_rebroadcast_delay_ms(),
            search_timeout_ms: default_search_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            max_ttl: default_max_ttl(),
            max_connections: default_super_max_connections(),
            query_retention_secs: default_query_retention_secs(),
        }
    }

    /// Load config: parse the file, then apply env vars.
    pub fn load(path: &Path) -> Result<Self> {
        let mut c: Self = parse_file(path)?;
        apply_env(&mut c.host, &mut c.port);
        Ok(c)
    }

    pub fn addr(&self) -> NodeAddr {
        NodeAddr::new(self.host.clone(), self.port)
    }

    pub fn rebroadcast_delay(&self) -> Duration {
        Duration::from_millis(self.rebroadcast_delay_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Weak-peer configuration.
/// Env overrides: MESH_HOST, MESH_PORT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeakPeerConfig {
    pub host: String,
    pub port: u16,
    /// Shared directory; its top-level regular files are offered to the overlay.
    pub files_dir: PathBuf,
    pub super_peer: NodeAddr,
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    /// Budget for one request/response exchange with a super-peer or weak-peer.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_weak_max_connections")]
    pub max_connections: usize,
}

fn default_sync_interval_ms() -> u64 {
    5000
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_weak_max_connections() -> usize {
    64
}

impl WeakPeerConfig {
    pub fn new(host: impl Into<String>, port: u16, files_dir: PathBuf, super_peer: NodeAddr) -> Self {
        Self {
            host: host.into(),
            port,
            files_dir,
            super_peer,
            sync_interval_ms: default_sync_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_connections: default_weak_max_connections(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut c: Self = parse_file(path)?;
        apply_env(&mut c.host, &mut c.port);
        Ok(c)
    }

    pub fn addr(&self) -> NodeAddr {
        NodeAddr::new(self.host.clone(), self.port)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let s = std::fs::read_to_string(path)
        .map_err(|e| NodeError::Config(format!("{}: {e}", path.display())))?;
    toml::from_str(&s).map_err(|e| NodeError::Config(format!("{}: {e}", path.display())))
}

fn apply_env(host: &mut String, port: &mut u16) {
    if let Ok(h) = std::env::var("MESH_HOST") {
        if !h.is_empty() {
            *host = h;
        }
    }
    if let Ok(s) = std::env::var("MESH_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            *port = p;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn super_peer_defaults_fill_in() {
        let c: SuperPeerConfig = toml::from_str(
            r#"
            host = "127.0.0.1"
            port = 10000

            [[neighbors]]
            host = "127.0.0.1"
            port = 10001
            "#,
        )
        .unwrap();
        assert_eq!(c.neighbors, vec![NodeAddr::new("127.0.0.1", 10001)]);
        assert!(c.weak_peers.is_empty());
        assert_eq!(c.rebroadcast_delay(), Duration::from_secs(1));
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.read_timeout(), Duration::from_secs(2));
        assert_eq!(c.max_ttl, mesh_core::DEFAULT_MAX_TTL);
    }

    #[test]
    fn weak_peer_parses() {
        let c: WeakPeerConfig = toml::from_str(
            r#"
            host = "127.0.0.1"
            port = 11000
            files_dir = "/srv/shared"
            sync_interval_ms = 250

            [super_peer]
            host = "127.0.0.1"
            port = 10000
            "#,
        )
        .unwrap();
        assert_eq!(c.files_dir, PathBuf::from("/srv/shared"));
        assert_eq!(c.super_peer.port, 10000);
        assert_eq!(c.sync_interval(), Duration::from_millis(250));
    }

    #[test]
    fn unknown_fields_rejected() {
        let r = toml::from_str::<SuperPeerConfig>("host = \"a\"\nport = 1\nbogus = true\n");
        assert!(r.is_err());
    }

    #[test]
    fn missing_file_is_config_error() {
        let r = SuperPeerConfig::load(Path::new("/definitely/not/here.toml"));
        assert!(matches!(r, Err(NodeError::Config(_))));
    }

    #[test]
    fn resolve_literal_address() {
        let a = NodeAddr::new("127.0.0.1", 4242).resolve().unwrap();
        assert_eq!(a, "127.0.0.1:4242".parse().unwrap());
    }
}
