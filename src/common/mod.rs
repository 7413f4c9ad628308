//! Common utilities and types shared across fedcoord

pub mod config;
pub mod error;
pub mod message;
pub mod utils;

pub use config::{Config, CoordinatorConfig, PeerConfig, ProposalConfig};
pub use error::{Error, Result};
pub use message::{
    CommitRequest, GlobalGrant, GlobalModel, GlobalRequest, JoinRequest, LocalModel, Reply,
    ReplyStatus, TestComplete, TestRequest,
};
pub use utils::{http_url, parse_peer};

/// Numeric node id, assigned on first join and never recycled
pub type NodeId = u64;

/// Monotonic commit number, bound to exactly one node
pub type CommitNumber = u64;
