//! Delivery of raft messages between coordinator replicas

use crate::common::{PeerConfig, Result};
use crate::coordinator::raft_node::ReplicaHandle;
use crate::coordinator::raft_rpc_client::{connect_lazy, send_raft_message};
use crate::proto::coordinator_internal_client::CoordinatorInternalClient;
use raft::prelude::Message;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tonic::transport::Channel;

/// Outbound side of the raft network.
///
/// `send` must not block the consensus driver. Delivery is best effort:
/// raft retransmits whatever gets lost.
pub trait RaftTransport: Send + Sync + 'static {
    fn send(&self, messages: Vec<Message>);
}

/// gRPC transport used by deployed replicas
pub struct GrpcTransport {
    from: u64,
    peers: HashMap<u64, CoordinatorInternalClient<Channel>>,
}

impl GrpcTransport {
    /// Channels connect lazily; must be called inside a tokio runtime.
    pub fn new(from: u64, peers: &[PeerConfig], timeout: Duration) -> Result<Self> {
        let mut clients = HashMap::new();
        for peer in peers {
            clients.insert(peer.id, connect_lazy(&peer.addr, timeout)?);
        }
        Ok(Self {
            from,
            peers: clients,
        })
    }
}

impl RaftTransport for GrpcTransport {
    fn send(&self, messages: Vec<Message>) {
        for message in messages {
            let to = message.get_to();
            let Some(client) = self.peers.get(&to) else {
                tracing::warn!(from = self.from, to, "no address for raft peer");
                continue;
            };
            let mut client = client.clone();
            let from = self.from;
            tokio::spawn(async move {
                if let Err(e) = send_raft_message(&mut client, from, &message).await {
                    tracing::debug!(from, to, error = %e, "raft message not delivered");
                }
            });
        }
    }
}

#[derive(Default)]
struct RouterInner {
    replicas: HashMap<u64, ReplicaHandle>,
    isolated: HashSet<u64>,
}

/// In-process transport connecting replicas of one test cluster.
///
/// Isolating a replica drops every message it sends or should receive,
/// which simulates a network partition.
#[derive(Clone, Default)]
pub struct LocalRouter {
    inner: Arc<RwLock<RouterInner>>,
}

impl LocalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: ReplicaHandle) {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        inner.replicas.insert(handle.id(), handle);
    }

    pub fn isolate(&self, id: u64) {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        inner.isolated.insert(id);
        tracing::info!(replica = id, "replica isolated");
    }

    pub fn heal(&self, id: u64) {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        inner.isolated.remove(&id);
        tracing::info!(replica = id, "replica healed");
    }
}

impl RaftTransport for LocalRouter {
    fn send(&self, messages: Vec<Message>) {
        let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
        for message in messages {
            let (from, to) = (message.get_from(), message.get_to());
            if inner.isolated.contains(&from) || inner.isolated.contains(&to) {
                continue;
            }
            match inner.replicas.get(&to) {
                Some(handle) => {
                    if let Err(e) = handle.try_step(message) {
                        tracing::debug!(from, to, error = %e, "dropped raft message");
                    }
                }
                None => tracing::debug!(from, to, "unknown raft peer"),
            }
        }
    }
}
