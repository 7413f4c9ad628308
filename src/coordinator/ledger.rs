//! Commit ledger
//!
//! Assigns commit numbers, keeps the permanent commit → node history and the
//! latest pending aggregate per node.

use crate::common::{CommitNumber, LocalModel, NodeId};
use std::collections::BTreeMap;

/// Latest model of a node and the validation evidence collected for it
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAggregate {
    pub owner: NodeId,
    pub commit: CommitNumber,
    pub model: String,
    /// Validator node → accumulated error
    pub errors: BTreeMap<NodeId, f64>,
    /// Rows the model has been validated on, seeded with its training size
    pub total_validated_size: f64,
    pub train_size: f64,
}

impl PendingAggregate {
    fn seed(owner: NodeId, commit: CommitNumber, model: &LocalModel) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(owner, model.error);
        Self {
            owner,
            commit,
            model: model.model.clone(),
            errors,
            total_validated_size: model.size,
            train_size: model.size,
        }
    }

    /// Model as sent to validators
    pub fn sanitized_model(&self) -> LocalModel {
        LocalModel::new(self.model.clone(), 0.0, 0.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    /// Index = commit number
    history: Vec<NodeId>,
    pending: BTreeMap<NodeId, PendingAggregate>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the next commit number to `owner` and reset its aggregate.
    ///
    /// Returns the new commit number and the commit it superseded, if any.
    pub fn commit(
        &mut self,
        owner: NodeId,
        model: &LocalModel,
    ) -> (CommitNumber, Option<CommitNumber>) {
        let commit = self.history.len() as CommitNumber;
        self.history.push(owner);
        let previous = self
            .pending
            .insert(owner, PendingAggregate::seed(owner, commit, model))
            .map(|old| old.commit);
        (commit, previous)
    }

    pub fn owner_of(&self, commit: CommitNumber) -> Option<NodeId> {
        self.history.get(commit as usize).copied()
    }

    /// A commit is outdated once a later commit exists for the same node.
    /// Unknown commit numbers are reported as outdated too.
    pub fn is_outdated(&self, commit: CommitNumber) -> bool {
        let Some(owner) = self.owner_of(commit) else {
            return true;
        };
        self.history[commit as usize + 1..]
            .iter()
            .any(|&later| later == owner)
    }

    /// Fold a validation result into the aggregate that owns `commit`.
    ///
    /// Errors from the same validator are summed, not overwritten.
    pub fn accumulate(
        &mut self,
        commit: CommitNumber,
        validator: NodeId,
        error: f64,
        size: f64,
    ) -> Option<&PendingAggregate> {
        let owner = self.owner_of(commit)?;
        let aggregate = self.pending.get_mut(&owner)?;
        if aggregate.commit != commit {
            return None;
        }
        aggregate.total_validated_size += size;
        *aggregate.errors.entry(validator).or_insert(0.0) += error;
        Some(aggregate)
    }

    pub fn pending(&self, owner: NodeId) -> Option<&PendingAggregate> {
        self.pending.get(&owner)
    }

    /// Aggregate currently holding `commit`, if it is still the latest.
    pub fn pending_for_commit(&self, commit: CommitNumber) -> Option<&PendingAggregate> {
        let owner = self.owner_of(commit)?;
        self.pending.get(&owner).filter(|a| a.commit == commit)
    }

    pub fn pending_models(&self) -> impl Iterator<Item = &PendingAggregate> {
        self.pending.values()
    }

    /// Number of commits ever accepted
    pub fn commit_count(&self) -> u64 {
        self.history.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(size: f64, error: f64) -> LocalModel {
        LocalModel::new("m", size, error)
    }

    #[test]
    fn test_commit_numbers_are_monotonic_and_bound() {
        let mut ledger = Ledger::new();
        assert_eq!(ledger.commit(0, &model(100.0, 0.1)), (0, None));
        assert_eq!(ledger.commit(1, &model(50.0, 0.2)), (1, None));
        assert_eq!(ledger.commit(0, &model(120.0, 0.1)), (2, Some(0)));

        assert_eq!(ledger.owner_of(0), Some(0));
        assert_eq!(ledger.owner_of(1), Some(1));
        assert_eq!(ledger.owner_of(2), Some(0));
        assert_eq!(ledger.commit_count(), 3);
    }

    #[test]
    fn test_outdated() {
        let mut ledger = Ledger::new();
        ledger.commit(0, &model(1.0, 0.0));
        ledger.commit(1, &model(1.0, 0.0));
        assert!(!ledger.is_outdated(0));

        ledger.commit(0, &model(1.0, 0.0));
        assert!(ledger.is_outdated(0));
        assert!(!ledger.is_outdated(1));
        assert!(!ledger.is_outdated(2));
        assert!(ledger.is_outdated(99));
    }

    #[test]
    fn test_seeded_aggregate() {
        let mut ledger = Ledger::new();
        ledger.commit(3, &model(100.0, 0.1));
        let aggregate = ledger.pending(3).unwrap();
        assert_eq!(aggregate.total_validated_size, 100.0);
        assert_eq!(aggregate.train_size, 100.0);
        assert_eq!(aggregate.errors.get(&3), Some(&0.1));
    }

    #[test]
    fn test_accumulate_sums_repeated_validator() {
        let mut ledger = Ledger::new();
        ledger.commit(0, &model(100.0, 0.1));

        ledger.accumulate(0, 1, 0.2, 40.0).unwrap();
        let aggregate = ledger.accumulate(0, 1, 0.3, 10.0).unwrap();

        // running-sum policy: repeated reports add up
        assert!((aggregate.errors[&1] - 0.5).abs() < 1e-12);
        assert_eq!(aggregate.total_validated_size, 150.0);
    }

    #[test]
    fn test_accumulate_ignores_superseded_commit() {
        let mut ledger = Ledger::new();
        ledger.commit(0, &model(100.0, 0.1));
        ledger.commit(0, &model(90.0, 0.1));
        assert!(ledger.accumulate(0, 1, 0.2, 40.0).is_none());
        assert!(ledger.pending_for_commit(0).is_none());
        assert!(ledger.pending_for_commit(1).is_some());
    }
}
