//! In-process three-replica cluster shared by the raft tests
#![allow(dead_code)]

use fedcoord::common::{CoordinatorConfig, PeerConfig, ProposalConfig};
use fedcoord::coordinator::{start_replica, LocalRouter, Replica, ReplicaHandle};
use fedcoord::coordinator::{Event, Outcome};
use std::time::Duration;
use tokio::sync::watch;

pub const REPLICAS: [u64; 3] = [1, 2, 3];

pub fn replica_config(id: u64, apply_timeout_ms: u64) -> CoordinatorConfig {
    CoordinatorConfig {
        replica_id: id,
        peers: REPLICAS
            .iter()
            .filter(|&&peer| peer != id)
            .map(|&peer| PeerConfig {
                id: peer,
                addr: format!("local-{}", peer),
            })
            .collect(),
        tick_interval_ms: 10,
        election_tick: 10,
        heartbeat_tick: 2,
        status_log_interval_ms: 60_000,
        proposal: ProposalConfig {
            max_attempts: 30,
            initial_backoff_ms: 20,
            max_backoff_ms: 100,
            apply_timeout_ms,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub struct Cluster {
    pub router: LocalRouter,
    pub replicas: Vec<Replica>,
    shutdown: watch::Sender<bool>,
}

impl Cluster {
    pub fn start(apply_timeout_ms: u64) -> Self {
        let router = LocalRouter::new();
        let (shutdown, rx) = watch::channel(false);
        let replicas = REPLICAS
            .iter()
            .map(|&id| {
                let replica =
                    start_replica(&replica_config(id, apply_timeout_ms), router.clone(), rx.clone())
                        .unwrap();
                router.register(replica.handle.clone());
                replica
            })
            .collect();
        Self {
            router,
            replicas,
            shutdown,
        }
    }

    pub fn handle(&self, id: u64) -> &ReplicaHandle {
        &self.replicas[(id - 1) as usize].handle
    }

    pub fn handles(&self) -> Vec<ReplicaHandle> {
        self.replicas.iter().map(|r| r.handle.clone()).collect()
    }

    /// Wait until some replica other than `excluded` leads and the other
    /// non-excluded replicas follow it.
    pub async fn wait_for_leader(&self, excluded: &[u64]) -> u64 {
        for _ in 0..500 {
            let mut leader = None;
            let mut agreed = true;
            for handle in self.handles() {
                if excluded.contains(&handle.id()) {
                    continue;
                }
                let status = handle.status().await.unwrap();
                if status.leader == 0 || excluded.contains(&status.leader) {
                    agreed = false;
                    break;
                }
                match leader {
                    None => leader = Some(status.leader),
                    Some(l) if l != status.leader => agreed = false,
                    _ => {}
                }
            }
            if agreed {
                if let Some(leader) = leader {
                    return leader;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no stable leader elected");
    }

    /// Wait until every listed replica has registered `count` nodes.
    pub async fn wait_for_nodes(&self, ids: &[u64], count: usize) {
        for _ in 0..500 {
            let mut done = true;
            for &id in ids {
                let nodes = self.handle(id).read(|s| s.registry().len()).await.unwrap();
                if nodes != count {
                    done = false;
                }
            }
            if done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("replicas {:?} never reached {} nodes", ids, count);
    }

    pub fn follower_of(&self, leader: u64, excluded: &[u64]) -> u64 {
        REPLICAS
            .iter()
            .copied()
            .find(|id| *id != leader && !excluded.contains(id))
            .unwrap()
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

pub async fn join(handle: &ReplicaHandle, name: &str) -> Outcome {
    handle
        .propose(Event::Join {
            name: name.into(),
            address: format!("{}:9000", name),
        })
        .await
        .into_result()
        .unwrap()
}
