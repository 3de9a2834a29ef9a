//! Node configuration, loaded from a TOML file (default: `docmesh.toml`).

use docmesh_core::MergePolicy;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for a node.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Identity.
    pub node: NodeSection,
    /// Sync server listener.
    #[serde(default)]
    pub server: ServerSection,
    /// Cluster authentication.
    #[serde(default)]
    pub auth: AuthSection,
    /// Channel security and compression.
    #[serde(default)]
    pub channel: ChannelSection,
    /// Pull synchronization.
    #[serde(default)]
    pub sync: SyncSection,
    /// Gossip fan-out.
    #[serde(default)]
    pub gossip: GossipSection,
    /// LAN discovery.
    #[serde(default)]
    pub discovery: DiscoverySection,
    /// Gateway election.
    #[serde(default)]
    pub election: ElectionSection,
}

/// Identity section.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    /// This node's unique id. Required.
    #[serde(default)]
    pub id: String,
}

/// Sync server listener section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    /// Bind address (default: 0.0.0.0).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Listen port (default: 4455).
    #[serde(default = "default_server_port")]
    pub port: u16,
}

/// Cluster authentication section.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    /// Shared cluster secret presented and validated in handshakes.
    #[serde(default)]
    pub shared_secret: String,
}

/// Channel security section.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSection {
    /// Encrypt connections with the key exchange prolog (default: true).
    #[serde(default = "default_true")]
    pub encryption: bool,
    /// Offer brotli compression (default: true).
    #[serde(default = "default_true")]
    pub compression: bool,
}

/// Pull synchronization section.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSection {
    /// Milliseconds between sync rounds (default: 5000).
    #[serde(default = "default_sync_interval_ms")]
    pub interval_ms: u64,
    /// Pull batch size (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// `lww` or `merge` (default: lww).
    #[serde(default)]
    pub merge_policy: MergePolicySetting,
}

/// Gossip section.
#[derive(Debug, Clone, Deserialize)]
pub struct GossipSection {
    /// Whether writes fan out via gossip (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Propagation stops at this hop count (default: 3).
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,
    /// Damping delay before each fan-out, in milliseconds (default: 100).
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,
}

/// LAN discovery section.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverySection {
    /// Whether LAN discovery runs (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// UDP port announcements broadcast on (default: 4456).
    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u16,
    /// Milliseconds between announcements (default: 5000).
    #[serde(default = "default_discovery_interval_ms")]
    pub interval_ms: u64,
    /// Address advertised to peers (default: 127.0.0.1).
    #[serde(default = "default_advertise_host")]
    pub advertise_host: String,
}

/// Gateway election section.
#[derive(Debug, Clone, Deserialize)]
pub struct ElectionSection {
    /// Milliseconds between elections (default: 5000).
    #[serde(default = "default_election_interval_ms")]
    pub interval_ms: u64,
}

/// Conflict resolution policy spelling used in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicySetting {
    /// Last-write-wins at document granularity.
    #[default]
    Lww,
    /// Recursive JSON merge.
    Merge,
}

impl From<MergePolicySetting> for MergePolicy {
    fn from(setting: MergePolicySetting) -> Self {
        match setting {
            MergePolicySetting::Lww => MergePolicy::LastWriteWins,
            MergePolicySetting::Merge => MergePolicy::RecursiveMerge,
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    4455
}

fn default_true() -> bool {
    true
}

fn default_sync_interval_ms() -> u64 {
    5000
}

fn default_batch_size() -> usize {
    100
}

fn default_max_hops() -> u32 {
    3
}

fn default_send_delay_ms() -> u64 {
    100
}

fn default_broadcast_port() -> u16 {
    4456
}

fn default_discovery_interval_ms() -> u64 {
    5000
}

fn default_advertise_host() -> String {
    "127.0.0.1".to_string()
}

fn default_election_interval_ms() -> u64 {
    5000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_server_port(),
        }
    }
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            shared_secret: String::new(),
        }
    }
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            encryption: true,
            compression: true,
        }
    }
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            interval_ms: default_sync_interval_ms(),
            batch_size: default_batch_size(),
            merge_policy: MergePolicySetting::default(),
        }
    }
}

impl Default for GossipSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_hops: default_max_hops(),
            send_delay_ms: default_send_delay_ms(),
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            enabled: true,
            broadcast_port: default_broadcast_port(),
            interval_ms: default_discovery_interval_ms(),
            advertise_host: default_advertise_host(),
        }
    }
}

impl Default for ElectionSection {
    fn default() -> Self {
        Self {
            interval_ms: default_election_interval_ms(),
        }
    }
}

impl Config {
    /// A config with all defaults for the given node id.
    pub fn for_node(node_id: impl Into<String>) -> Self {
        Self {
            node: NodeSection {
                id: node_id.into(),
            },
            server: ServerSection::default(),
            auth: AuthSection::default(),
            channel: ChannelSection::default(),
            sync: SyncSection::default(),
            gossip: GossipSection::default(),
            discovery: DiscoverySection::default(),
            election: ElectionSection::default(),
        }
    }

    /// Load and validate a configuration file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants a running node depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.id.trim().is_empty() {
            return Err(ConfigError::MissingNodeId);
        }
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }
        Ok(())
    }

    /// Sync round interval as a [`Duration`].
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync.interval_ms)
    }

    /// Gossip send delay as a [`Duration`].
    pub fn gossip_send_delay(&self) -> Duration {
        Duration::from_millis(self.gossip.send_delay_ms)
    }

    /// Discovery announcement interval as a [`Duration`].
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery.interval_ms)
    }

    /// Election interval as a [`Duration`].
    pub fn election_interval(&self) -> Duration {
        Duration::from_millis(self.election.interval_ms)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse the configuration file.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// `node.id` is missing or blank.
    #[error("node.id is required")]
    MissingNodeId,
    /// The server port is unusable.
    #[error("invalid server port: {0}")]
    InvalidPort(u16),
}
