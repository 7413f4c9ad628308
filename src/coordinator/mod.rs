//! Replicated coordinator
//!
//! Each replica:
//! - keeps the node registry, commit ledger and test obligations in a
//!   raft-replicated state machine
//! - feeds validated test results to its own aggregation engine
//! - synthesizes the global model on request
//! - serves the node-facing HTTP API and raft traffic over gRPC

pub mod aggregation;
pub mod grpc;
pub mod http;
pub mod ledger;
pub mod node_client;
pub mod obligations;
pub mod proposal;
pub mod raft_node;
pub mod raft_rpc_client;
pub mod registry;
pub mod server;
pub mod state;
pub mod synthesis;
pub mod transport;

pub use raft_node::{start_replica, Replica, ReplicaHandle, ReplicaStatus};
pub use server::Coordinator;
pub use state::{CoordinatorState, Event, Outcome};
pub use synthesis::{ErrorMatrix, RankWeighting, Synthesizer, WeightingFunction};
pub use transport::{GrpcTransport, LocalRouter, RaftTransport};
