//! Replicated coordinator state machine
//!
//! [`CoordinatorState`] owns the registry, the commit ledger and the
//! obligation tracker. It is mutated only by [`CoordinatorState::apply`],
//! which the consensus driver calls for each committed log entry, in log
//! order, on every replica. `apply` is deterministic: identical logs give
//! identical states and identical [`Outcome`]s.

use crate::common::{CommitNumber, Error, LocalModel, NodeId};
use crate::coordinator::ledger::{Ledger, PendingAggregate};
use crate::coordinator::obligations::ObligationTracker;
use crate::coordinator::registry::{Membership, Registry};
use serde::{Deserialize, Serialize};

/// State-mutating request carried by a raft log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Join {
        name: String,
        address: String,
    },
    Rejoin {
        name: String,
        address: String,
    },
    Commit {
        name: String,
        model: LocalModel,
    },
    TestComplete {
        name: String,
        commit: CommitNumber,
        error: f64,
        size: f64,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Join { .. } => "join",
            Event::Rejoin { .. } => "rejoin",
            Event::Commit { .. } => "commit",
            Event::TestComplete { .. } => "test_complete",
        }
    }

    pub fn node_name(&self) -> &str {
        match self {
            Event::Join { name, .. }
            | Event::Rejoin { name, .. }
            | Event::Commit { name, .. }
            | Event::TestComplete { name, .. } => name,
        }
    }
}

/// A test request the originating replica must send once the event applied
#[derive(Debug, Clone, PartialEq)]
pub struct TestAssignment {
    pub node: NodeId,
    pub node_name: String,
    pub address: String,
    pub commit: CommitNumber,
    /// Sanitized model
    pub model: LocalModel,
}

/// Validated result handed to the aggregation engine
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateUpdate {
    pub validator: NodeId,
    pub aggregate: PendingAggregate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    PendingTests,
    DuplicateTest,
    UnknownNode,
}

impl Rejection {
    pub fn into_error(self, name: &str) -> Error {
        match self {
            Rejection::PendingTests => Error::PendingTests,
            Rejection::DuplicateTest => Error::DuplicateTest,
            Rejection::UnknownNode => Error::UnknownNode(name.to_string()),
        }
    }
}

/// Result of applying one event
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Joined {
        node: NodeId,
        membership: Membership,
        fan_out: Vec<TestAssignment>,
    },
    Committed {
        node: NodeId,
        commit: CommitNumber,
        fan_out: Vec<TestAssignment>,
    },
    TestAccepted {
        update: AggregateUpdate,
    },
    Rejected(Rejection),
}

#[derive(Debug, Clone, Default)]
pub struct CoordinatorState {
    registry: Registry,
    ledger: Ledger,
    obligations: ObligationTracker,
}

impl CoordinatorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn obligations(&self) -> &ObligationTracker {
        &self.obligations
    }

    pub fn apply(&mut self, event: Event) -> Outcome {
        match event {
            Event::Join { name, address } => self.apply_join(&name, &address),
            Event::Rejoin { name, address } => self.apply_rejoin(&name, &address),
            Event::Commit { name, model } => self.apply_commit(&name, &model),
            Event::TestComplete {
                name,
                commit,
                error,
                size,
            } => self.apply_test_complete(&name, commit, error, size),
        }
    }

    fn apply_join(&mut self, name: &str, address: &str) -> Outcome {
        let (node, membership) = self.registry.join(name, address);
        if membership == Membership::Rejoined {
            return self.rejoined(node);
        }

        // a brand-new node has validated none of the in-flight models
        let pending: Vec<CommitNumber> = self.ledger.pending_models().map(|a| a.commit).collect();
        for &commit in &pending {
            self.obligations.assign(node, commit);
        }
        tracing::debug!(node, name, owed = pending.len(), "applied join");

        Outcome::Joined {
            node,
            membership,
            fan_out: self.assignments_for(node),
        }
    }

    fn apply_rejoin(&mut self, name: &str, address: &str) -> Outcome {
        match self.registry.rejoin(name, address) {
            Some(node) => self.rejoined(node),
            None => Outcome::Rejected(Rejection::UnknownNode),
        }
    }

    fn rejoined(&self, node: NodeId) -> Outcome {
        tracing::debug!(node, "applied rejoin");
        Outcome::Joined {
            node,
            membership: Membership::Rejoined,
            fan_out: self.assignments_for(node),
        }
    }

    fn apply_commit(&mut self, name: &str, model: &LocalModel) -> Outcome {
        let node = match self.check_commit(name) {
            Ok(node) => node,
            Err(rejection) => return Outcome::Rejected(rejection),
        };

        let (commit, superseded) = self.ledger.commit(node, model);
        if let Some(old) = superseded {
            self.obligations.supersede(old);
        }

        let mut fan_out = Vec::new();
        let sanitized = model.sanitized();
        for peer in self.registry.iter().filter(|n| n.id != node) {
            self.obligations.assign(peer.id, commit);
            fan_out.push(TestAssignment {
                node: peer.id,
                node_name: peer.name.clone(),
                address: peer.address.clone(),
                commit,
                model: sanitized.clone(),
            });
        }
        tracing::debug!(node, commit, peers = fan_out.len(), "applied commit");

        Outcome::Committed {
            node,
            commit,
            fan_out,
        }
    }

    fn apply_test_complete(
        &mut self,
        name: &str,
        commit: CommitNumber,
        error: f64,
        size: f64,
    ) -> Outcome {
        let validator = match self.check_test(name, commit) {
            Ok(node) => node,
            Err(rejection) => return Outcome::Rejected(rejection),
        };

        self.obligations.clear(validator, commit);
        match self.ledger.accumulate(commit, validator, error, size) {
            Some(aggregate) => Outcome::TestAccepted {
                update: AggregateUpdate {
                    validator,
                    aggregate: aggregate.clone(),
                },
            },
            // an owed, non-outdated commit always has its aggregate
            None => Outcome::Rejected(Rejection::DuplicateTest),
        }
    }

    /// Commit precondition: the node is known and owes no validation.
    pub fn check_commit(&self, name: &str) -> Result<NodeId, Rejection> {
        let node = self.registry.id_of(name).ok_or(Rejection::UnknownNode)?;
        if self.obligations.has_outstanding(node) {
            return Err(Rejection::PendingTests);
        }
        Ok(node)
    }

    /// Test-result validity: commit not outdated, then obligation still owed.
    pub fn check_test(&self, name: &str, commit: CommitNumber) -> Result<NodeId, Rejection> {
        let node = self.registry.id_of(name).ok_or(Rejection::UnknownNode)?;
        if self.ledger.is_outdated(commit) || !self.obligations.is_owed(node, commit) {
            return Err(Rejection::DuplicateTest);
        }
        Ok(node)
    }

    /// Test requests for everything `node` still owes.
    pub fn assignments_for(&self, node: NodeId) -> Vec<TestAssignment> {
        let Some(target) = self.registry.node(node) else {
            return Vec::new();
        };

        self.obligations
            .outstanding(node)
            .into_iter()
            .filter_map(|commit| self.ledger.pending_for_commit(commit))
            .map(|aggregate| TestAssignment {
                node,
                node_name: target.name.clone(),
                address: target.address.clone(),
                commit: aggregate.commit,
                model: aggregate.sanitized_model(),
            })
            .collect()
    }
}
