//! Cluster configuration and the static peer directory.
//!
//! The configuration file lists every participant once. JSON is the default
//! format; files ending in `.toml` are read as TOML. `driver` and `transport`
//! sections are optional and fall back to their defaults.

use crate::error::{RamutexError, RamutexResult};
use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

/// One participant as listed in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
}

/// Timing of the periodic request driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Number of critical-section requests each node issues.
    pub rounds: u32,
    /// Pause before the first round, giving every listener time to bind.
    pub startup_delay_ms: u64,
    /// Pause before each round.
    pub request_interval_ms: u64,
    /// How long the shared resource is held once entered.
    pub hold_ms: u64,
    /// Carried in every REQUEST; the requester warns once it has waited this
    /// long. 0 disables the warning.
    pub request_deadline_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            rounds: 5,
            startup_delay_ms: 1_000,
            request_interval_ms: 5_000,
            hold_ms: 2_000,
            request_deadline_ms: 0,
        }
    }
}

/// Limits applied by the TCP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum number of inbound connections served concurrently.
    pub max_connections: usize,
    /// Longest frame accepted; longer frames are skipped.
    pub max_frame_bytes: usize,
    /// Bound on each outbound connect, so an unreachable peer cannot stall
    /// the sends queued behind it.
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_connections: 64,
            max_frame_bytes: 64 * 1024,
            connect_timeout_ms: 2_000,
        }
    }
}

/// The whole cluster as read from the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Total participant count; must match `nodes.len()`.
    pub num_nodes: usize,
    pub nodes: Vec<NodeEntry>,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl ClusterConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> RamutexResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RamutexError::Config(format!("cannot read {}: {e}", path.display()))
        })?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let parsed = if is_toml {
            Self::from_toml_str(&contents)
        } else {
            Self::from_json_str(&contents)
        };

        parsed.map_err(|e| match e {
            RamutexError::Config(msg) => RamutexError::Config(format!("{}: {msg}", path.display())),
            other => RamutexError::Config(format!("{}: {other}", path.display())),
        })
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(contents: &str) -> RamutexResult<Self> {
        let config: Self = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> RamutexResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the structural invariants of the participant list.
    pub fn validate(&self) -> RamutexResult<()> {
        if self.num_nodes == 0 {
            return Err(RamutexError::Config("num_nodes must be at least 1".into()));
        }
        if self.num_nodes != self.nodes.len() {
            return Err(RamutexError::Config(format!(
                "num_nodes is {} but {} nodes are listed",
                self.num_nodes,
                self.nodes.len()
            )));
        }
        if self.transport.max_connections == 0 {
            return Err(RamutexError::Config(
                "transport.max_connections must be at least 1".into(),
            ));
        }
        if self.transport.connect_timeout_ms == 0 {
            return Err(RamutexError::Config(
                "transport.connect_timeout_ms must be at least 1".into(),
            ));
        }

        let mut ids = HashSet::new();
        let mut addrs = HashSet::new();
        for node in &self.nodes {
            if node.host.trim().is_empty() {
                return Err(RamutexError::Config(format!("node {} has an empty host", node.id)));
            }
            if node.port == 0 {
                return Err(RamutexError::Config(format!("node {} has port 0", node.id)));
            }
            if !ids.insert(node.id) {
                return Err(RamutexError::Config(format!("duplicate node id {}", node.id)));
            }
            if !addrs.insert((node.host.as_str(), node.port)) {
                return Err(RamutexError::Config(format!(
                    "duplicate address {}:{}",
                    node.host, node.port
                )));
            }
        }
        Ok(())
    }

    /// Find a participant by id.
    pub fn node(&self, id: NodeId) -> Option<&NodeEntry> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Build the directory of every participant except `self_id`.
    pub fn peer_directory(&self, self_id: NodeId) -> RamutexResult<PeerDirectory> {
        if self.node(self_id).is_none() {
            return Err(RamutexError::Config(format!(
                "node {self_id} is not listed in the configuration"
            )));
        }
        Ok(PeerDirectory::new(
            self.nodes
                .iter()
                .filter(|n| n.id != self_id)
                .map(|n| (n.id, PeerAddr::new(n.host.clone(), n.port))),
        ))
    }
}

/// Network address of a peer. The host may be a name; it is resolved when a
/// connection is opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl From<std::net::SocketAddr> for PeerAddr {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Immutable id → address map of the other participants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerDirectory {
    peers: BTreeMap<NodeId, PeerAddr>,
}

impl PeerDirectory {
    /// Build a directory from `(id, address)` pairs.
    pub fn new(entries: impl IntoIterator<Item = (NodeId, PeerAddr)>) -> Self {
        Self {
            peers: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&PeerAddr> {
        self.peers.get(&id)
    }

    /// Peer ids in ascending order.
    pub fn ids(&self) -> Vec<NodeId> {
        self.peers.keys().copied().collect()
    }
}
