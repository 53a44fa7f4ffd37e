//! Node configuration with TOML file support.

use std::path::Path;

use serde::{Deserialize, Serialize};

use lcap_poller::PollerConfig;
use lcap_types::PeerId;

use crate::{LogFormat, NodeError};

/// Configuration for a polling node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). Protocol parameters live under
/// the `[poller]` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's peer identity.
    #[serde(default = "default_peer_id")]
    pub peer_id: String,

    /// Log output format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter (overridden by `RUST_LOG`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Collect Prometheus metrics.
    #[serde(default)]
    pub enable_metrics: bool,

    /// Leading one-bits a hashcash effort proof must reach; 0 accepts any proof.
    #[serde(default = "default_effort_bits")]
    pub effort_bits: u32,

    /// Assumed hashing throughput used for poll duration estimates.
    #[serde(default = "default_hash_bytes_per_ms")]
    pub hash_bytes_per_ms: u64,

    /// Peers whose repair requests are honoured when `repair_any_trusted_peer` is set.
    #[serde(default)]
    pub trusted_peers: Vec<String>,

    /// Capacity of the inbound message queue.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,

    /// Protocol parameters.
    #[serde(default)]
    pub poller: PollerConfig,
}

// ── Defaults ───────────────────────────────────────────────────────────

fn default_peer_id() -> String {
    "lcap-node".to_string()
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_effort_bits() -> u32 {
    10
}

fn default_hash_bytes_per_ms() -> u64 {
    50_000
}

fn default_inbox_capacity() -> usize {
    lcap_network::DEFAULT_INBOX_CAPACITY
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            NodeError::Config(format!("{}: {e}", path.as_ref().display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        let config: Self = toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        self.peer()?;
        self.format()?;
        self.trusted()?;
        if self.inbox_capacity == 0 {
            return Err(NodeError::Config("inbox_capacity must be positive".into()));
        }
        self.poller.validate()?;
        Ok(())
    }

    pub fn peer(&self) -> Result<PeerId, NodeError> {
        Ok(PeerId::parse(&self.peer_id)?)
    }

    pub fn format(&self) -> Result<LogFormat, NodeError> {
        self.log_format.parse()
    }

    /// The hashcash difficulty threshold for `effort_bits`.
    pub fn effort_difficulty(&self) -> u64 {
        match self.effort_bits {
            0 => 0,
            bits if bits >= 64 => u64::MAX,
            bits => !(u64::MAX >> bits),
        }
    }

    pub fn trusted(&self) -> Result<Vec<PeerId>, NodeError> {
        self.trusted_peers
            .iter()
            .map(|raw| PeerId::parse(raw).map_err(NodeError::from))
            .collect()
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_id: default_peer_id(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            enable_metrics: false,
            effort_bits: default_effort_bits(),
            hash_bytes_per_ms: default_hash_bytes_per_ms(),
            trusted_peers: Vec::new(),
            inbox_capacity: default_inbox_capacity(),
            poller: PollerConfig::default(),
        }
    }
}
