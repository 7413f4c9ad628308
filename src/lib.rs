//! # fedcoord
//!
//! Coordination tier for cross-validated federated training:
//! - Nodes join, commit locally trained models and validate each other's
//! - Every commit is tested by every other node before the next one is taken
//! - Models validated on enough data are promoted into the global model
//! - The coordinator is a raft group; any replica serves any request
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!        nodes (HTTP: join / commit / test_complete / global)
//!   ┌──────────┬──────────┬──────────┐
//!   │          │          │          │
//! ┌─▼────────┐ ┌▼─────────┐ ┌▼─────────┐
//! │ Replica 1│ │ Replica 2│ │ Replica 3│
//! │ state    │ │ state    │ │ state    │
//! │ + engine │ │ + engine │ │ + engine │
//! └────┬─────┘ └────┬─────┘ └────┬─────┘
//!      └────── raft (gRPC) ──────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! fedcoord-coord serve \
//!   --id 1 \
//!   --bind 0.0.0.0:7000 \
//!   --raft 0.0.0.0:7001 \
//!   --peers 2=coord-2:7001,3=coord-3:7001
//! ```

pub mod client;
pub mod common;
pub mod coordinator;

// Re-export commonly used types
pub use client::CoordinatorClient;
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("fedcoord");
}

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("CARGO_PKG_NAME"),
    ")"
);
