//! Configuration for fedcoord components

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator replica config
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from an optional `fedcoord.toml` and `FEDCOORD__*` environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from("fedcoord")
    }

    pub fn load_from(name: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(name).required(false))
            .add_source(
                config::Environment::with_prefix("FEDCOORD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}

/// Another coordinator replica in the raft group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: u64,
    /// gRPC address of the peer (`host:port` or URL)
    pub addr: String,
}

/// Coordinator replica configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Raft id of this replica (non-zero)
    pub replica_id: u64,

    /// Bind address for the node-facing HTTP API
    pub bind_addr: SocketAddr,

    /// Bind address for internal gRPC (raft traffic)
    pub raft_addr: SocketAddr,

    /// Other replicas
    pub peers: Vec<PeerConfig>,

    /// Raft logical clock period
    pub tick_interval_ms: u64,

    /// Ticks without leader contact before an election
    pub election_tick: usize,

    /// Ticks between leader heartbeats
    pub heartbeat_tick: usize,

    pub max_size_per_msg: u64,
    pub max_inflight_msgs: usize,

    /// Campaign immediately instead of waiting for an election timeout
    pub campaign_on_start: bool,

    /// A model is promoted once validated on more than this fraction of the
    /// largest validated row count seen for any model
    pub promotion_ratio: f64,

    /// Depth of the aggregation engine's input queue
    pub result_queue_capacity: usize,

    /// Depth of the consensus driver's command queue
    pub command_queue_capacity: usize,

    /// Request body limit for the node-facing API (models can be large)
    pub max_body_bytes: usize,

    /// Timeout for outbound calls to nodes
    pub node_timeout_ms: u64,

    pub status_log_interval_ms: u64,

    pub proposal: ProposalConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            replica_id: 1,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7000)),
            raft_addr: SocketAddr::from(([0, 0, 0, 0], 7001)),
            peers: Vec::new(),
            tick_interval_ms: 100,
            election_tick: 50,
            heartbeat_tick: 5,
            max_size_per_msg: u16::MAX as u64,
            max_inflight_msgs: 1024,
            campaign_on_start: false,
            promotion_ratio: 0.6,
            result_queue_capacity: 64,
            command_queue_capacity: 256,
            max_body_bytes: 64 * 1024 * 1024,
            node_timeout_ms: 5_000,
            status_log_interval_ms: 5_000,
            proposal: ProposalConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.replica_id == 0 {
            return Err(Error::InvalidConfig("replica_id must be non-zero".into()));
        }
        if self.peers.iter().any(|p| p.id == self.replica_id || p.id == 0) {
            return Err(Error::InvalidConfig(format!(
                "peer ids must be non-zero and differ from replica_id {}",
                self.replica_id
            )));
        }
        if !(self.promotion_ratio > 0.0 && self.promotion_ratio <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "promotion_ratio must be in (0, 1], got {}",
                self.promotion_ratio
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::InvalidConfig("tick_interval_ms must be non-zero".into()));
        }
        if self.proposal.apply_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "proposal.apply_timeout_ms must be non-zero".into(),
            ));
        }
        if self.heartbeat_tick == 0 || self.heartbeat_tick >= self.election_tick {
            return Err(Error::InvalidConfig(
                "heartbeat_tick must be non-zero and below election_tick".into(),
            ));
        }
        if self.result_queue_capacity == 0
            || self.command_queue_capacity == 0
            || self.proposal.max_in_flight == 0
            || self.proposal.max_attempts == 0
        {
            return Err(Error::InvalidConfig("queue sizes must be non-zero".into()));
        }
        Ok(())
    }

    /// Ids of every voter, this replica included, sorted.
    pub fn voters(&self) -> Vec<u64> {
        let mut voters: Vec<u64> = self.peers.iter().map(|p| p.id).collect();
        voters.push(self.replica_id);
        voters.sort_unstable();
        voters.dedup();
        voters
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    /// Status line period expressed in ticks (at least one).
    pub fn status_log_ticks(&self) -> u64 {
        (self.status_log_interval_ms / self.tick_interval_ms.max(1)).max(1)
    }
}

/// Bounded wait for a proposal to be applied
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposalConfig {
    /// Submissions attempted while raft drops the proposal (no leader yet)
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,

    /// Wait for the applied notification once raft accepted the entry
    pub apply_timeout_ms: u64,

    /// Proposals awaiting application on this replica
    pub max_in_flight: usize,
}

impl Default for ProposalConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 1_000,
            apply_timeout_ms: 10_000,
            max_in_flight: 1024,
        }
    }
}
