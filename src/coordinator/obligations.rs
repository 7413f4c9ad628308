//! Test obligation tracker
//!
//! Per node, a map from commit number to "validation still owed".

use crate::common::{CommitNumber, NodeId};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct ObligationTracker {
    owed: BTreeMap<NodeId, BTreeMap<CommitNumber, bool>>,
}

impl ObligationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `node` now owes a validation result for `commit`.
    pub fn assign(&mut self, node: NodeId, commit: CommitNumber) {
        self.owed.entry(node).or_default().insert(commit, true);
    }

    pub fn is_owed(&self, node: NodeId, commit: CommitNumber) -> bool {
        self.owed
            .get(&node)
            .and_then(|set| set.get(&commit))
            .copied()
            .unwrap_or(false)
    }

    /// Any obligation of `node` still owed?
    pub fn has_outstanding(&self, node: NodeId) -> bool {
        self.owed
            .get(&node)
            .is_some_and(|set| set.values().any(|&owed| owed))
    }

    /// Accept `node`'s result for `commit`. Returns false if nothing was owed.
    pub fn clear(&mut self, node: NodeId, commit: CommitNumber) -> bool {
        match self.owed.get_mut(&node).and_then(|set| set.get_mut(&commit)) {
            Some(owed) if *owed => {
                *owed = false;
                true
            }
            _ => false,
        }
    }

    /// Forget every obligation on a superseded commit.
    pub fn supersede(&mut self, commit: CommitNumber) {
        for set in self.owed.values_mut() {
            set.remove(&commit);
        }
    }

    /// Commits `node` still owes, ascending
    pub fn outstanding(&self, node: NodeId) -> Vec<CommitNumber> {
        self.owed
            .get(&node)
            .map(|set| {
                set.iter()
                    .filter(|(_, owed)| **owed)
                    .map(|(&commit, _)| commit)
                    .collect()
            })
            .unwrap_or_default()
    }
}
