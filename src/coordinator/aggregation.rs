//! Aggregation engine
//!
//! Validated test results arrive one at a time, in log order, over a bounded
//! channel. The single consumer tracks the largest validated row count seen
//! for any model and promotes an aggregate into the committed-models
//! collection once it has been validated on more than `ratio × max` rows.

use crate::common::{Error, NodeId, Result};
use crate::coordinator::ledger::PendingAggregate;
use crate::coordinator::state::AggregateUpdate;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};

/// Committed models keyed by owning node
pub type CommittedModels = BTreeMap<NodeId, PendingAggregate>;

#[derive(Debug, Clone)]
pub struct Aggregator {
    ratio: f64,
    system_max: f64,
    committed: CommittedModels,
}

impl Aggregator {
    pub fn new(ratio: f64) -> Self {
        Self {
            ratio,
            system_max: 0.0,
            committed: BTreeMap::new(),
        }
    }

    /// Fold one validated result. Returns true if the aggregate was
    /// (re)published into the committed collection.
    pub fn absorb(&mut self, update: AggregateUpdate) -> bool {
        let aggregate = update.aggregate;
        if aggregate.total_validated_size > self.system_max {
            self.system_max = aggregate.total_validated_size;
        }

        if aggregate.total_validated_size > self.system_max * self.ratio {
            tracing::info!(
                owner = aggregate.owner,
                commit = aggregate.commit,
                validator = update.validator,
                validated = aggregate.total_validated_size,
                system_max = self.system_max,
                "committed model"
            );
            self.committed.insert(aggregate.owner, aggregate);
            true
        } else {
            tracing::debug!(
                owner = aggregate.owner,
                commit = aggregate.commit,
                validated = aggregate.total_validated_size,
                system_max = self.system_max,
                "model below promotion threshold"
            );
            false
        }
    }

    pub fn system_max(&self) -> f64 {
        self.system_max
    }

    pub fn committed(&self) -> &CommittedModels {
        &self.committed
    }
}

enum EngineMessage {
    Result(AggregateUpdate),
    Snapshot(oneshot::Sender<CommittedModels>),
}

/// Sending side of the aggregation engine
#[derive(Clone)]
pub struct AggregationHandle {
    tx: mpsc::Sender<EngineMessage>,
}

impl AggregationHandle {
    /// Deliver a validated result. Waits while the engine lags behind.
    pub async fn submit(&self, update: AggregateUpdate) -> Result<()> {
        self.tx
            .send(EngineMessage::Result(update))
            .await
            .map_err(|_| Error::Shutdown)
    }

    /// Copy of the committed models, consistent with every result submitted
    /// before this call.
    pub async fn committed(&self) -> Result<CommittedModels> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineMessage::Snapshot(reply))
            .await
            .map_err(|_| Error::Shutdown)?;
        rx.await.map_err(|_| Error::Shutdown)
    }
}

/// Start the single-consumer engine task.
pub fn spawn_engine(
    mut aggregator: Aggregator,
    capacity: usize,
) -> (AggregationHandle, tokio::task::JoinHandle<Aggregator>) {
    let (tx, mut rx) = mpsc::channel(capacity);
    let task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message {
                EngineMessage::Result(update) => {
                    aggregator.absorb(update);
                }
                EngineMessage::Snapshot(reply) => {
                    let _ = reply.send(aggregator.committed().clone());
                }
            }
        }
        tracing::debug!("aggregation engine stopped");
        aggregator
    });
    (AggregationHandle { tx }, task)
}
