//! Global model synthesis
//!
//! The coordinator assembles committed models and their cross-validation
//! errors; turning those into weights is delegated to a [`WeightingFunction`].

use crate::common::{Error, GlobalModel, NodeId, Result};
use crate::coordinator::aggregation::CommittedModels;
use std::collections::HashMap;
use std::sync::Arc;

/// Marks "no such observation" in an [`ErrorMatrix`].
pub const MISSING_ERROR: f64 = f64::NEG_INFINITY;

/// Dense `n × n` matrix, `get(i, j)` = error of node i's model on node j's data
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMatrix {
    n: usize,
    values: Vec<f64>,
}

impl ErrorMatrix {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            values: vec![MISSING_ERROR; n * n],
        }
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn get(&self, model: usize, validator: usize) -> f64 {
        self.values[model * self.n + validator]
    }

    pub fn set(&mut self, model: usize, validator: usize, error: f64) {
        self.values[model * self.n + validator] = error;
    }

    pub fn row(&self, model: usize) -> &[f64] {
        &self.values[model * self.n..(model + 1) * self.n]
    }
}

/// `(errors, sizes) -> weights`
///
/// A size of 0 marks a placeholder row that must receive weight 0.
pub trait WeightingFunction: Send + Sync {
    fn weights(&self, errors: &ErrorMatrix, sizes: &[f64]) -> Result<Vec<f64>>;
}

/// Rank-based weighting
///
/// Each model's errors are ranked densely (lowest error = rank 1, missing
/// observations rank 0 and are skipped). A model scores
/// `size × Σ 2^-rank`; scores below the median are dropped and the rest are
/// normalised to sum to one.
#[derive(Debug, Clone, Copy, Default)]
pub struct RankWeighting;

impl WeightingFunction for RankWeighting {
    fn weights(&self, errors: &ErrorMatrix, sizes: &[f64]) -> Result<Vec<f64>> {
        let n = errors.dim();
        if sizes.len() != n {
            return Err(Error::Weighting(format!(
                "{} sizes for a {}x{} error matrix",
                sizes.len(),
                n,
                n
            )));
        }

        let mut scores: Vec<f64> = (0..n)
            .map(|i| {
                if sizes[i] == 0.0 {
                    return 0.0;
                }
                let ranks = dense_ranks(errors.row(i));
                let score: f64 = ranks
                    .iter()
                    .filter(|&&rank| rank != 0)
                    .map(|&rank| 2f64.powi(-(rank as i32)))
                    .sum();
                score * sizes[i]
            })
            .collect();

        let cutoff = median(&scores);
        for score in scores.iter_mut() {
            if *score < cutoff {
                *score = 0.0;
            }
        }

        let total: f64 = scores.iter().sum();
        if total > 0.0 {
            for score in scores.iter_mut() {
                *score /= total;
            }
        }
        Ok(scores)
    }
}

/// Dense ranks in ascending order; ranks start at 0 when the row holds a
/// missing observation, at 1 otherwise.
fn dense_ranks(row: &[f64]) -> Vec<u32> {
    let mut sorted = row.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut next = match sorted.first() {
        Some(first) if *first == MISSING_ERROR => 0,
        _ => 1,
    };
    let mut ranks: HashMap<u64, u32> = HashMap::new();
    for value in sorted {
        ranks.entry(value.to_bits()).or_insert_with(|| {
            let rank = next;
            next += 1;
            rank
        });
    }

    row.iter().map(|value| ranks[&value.to_bits()]).collect()
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

pub struct Synthesizer {
    weighting: Arc<dyn WeightingFunction>,
}

impl Synthesizer {
    pub fn new(weighting: Arc<dyn WeightingFunction>) -> Self {
        Self { weighting }
    }

    /// Build the global model over nodes `0..node_count`.
    pub fn synthesize(
        &self,
        node_count: usize,
        committed: &CommittedModels,
    ) -> Result<GlobalModel> {
        let mut models = Vec::with_capacity(node_count);
        let mut sizes = Vec::with_capacity(node_count);
        let mut errors = ErrorMatrix::new(node_count);

        for i in 0..node_count {
            match committed.get(&(i as NodeId)) {
                Some(aggregate) => {
                    models.push(aggregate.model.clone());
                    sizes.push(aggregate.train_size);
                    for (&validator, &error) in &aggregate.errors {
                        if (validator as usize) < node_count {
                            errors.set(i, validator as usize, error);
                        }
                    }
                }
                None => {
                    models.push(String::new());
                    sizes.push(0.0);
                }
            }
        }

        let weights = self.weighting.weights(&errors, &sizes)?;
        if weights.len() != node_count {
            return Err(Error::Weighting(format!(
                "expected {} weights, got {}",
                node_count,
                weights.len()
            )));
        }

        tracing::debug!(
            nodes = node_count,
            committed = committed.len(),
            "synthesized global model"
        );
        Ok(GlobalModel { models, weights })
    }
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new(Arc::new(RankWeighting))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::ledger::PendingAggregate;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn aggregate(owner: NodeId, errors: &[(NodeId, f64)], train: f64) -> PendingAggregate {
        PendingAggregate {
            owner,
            commit: owner,
            model: format!("model-{}", owner),
            errors: errors.iter().copied().collect(),
            total_validated_size: train,
            train_size: train,
        }
    }

    #[test]
    fn test_dense_ranks() {
        assert_eq!(dense_ranks(&[0.3, 0.1, 0.3, 0.2]), vec![3, 1, 3, 2]);
        assert_eq!(
            dense_ranks(&[MISSING_ERROR, 0.5, MISSING_ERROR, 0.1]),
            vec![0, 2, 0, 1]
        );
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_rank_weighting() {
        let mut errors = ErrorMatrix::new(2);
        errors.set(0, 0, 0.1);
        errors.set(0, 1, 0.2);
        errors.set(1, 0, 0.3);
        errors.set(1, 1, 0.3);

        let weights = RankWeighting.weights(&errors, &[100.0, 100.0]).unwrap();
        // row 0: 2^-1 + 2^-2 = 0.75 ; row 1: 2^-1 + 2^-1 = 1.0 ; median 0.875
        assert_eq!(weights, vec![0.0, 1.0]);
    }

    #[test]
    fn test_placeholders_get_zero_weight() {
        let mut errors = ErrorMatrix::new(3);
        errors.set(0, 0, 0.1);
        errors.set(2, 2, 0.1);
        errors.set(2, 0, 0.2);

        let weights = RankWeighting.weights(&errors, &[50.0, 0.0, 50.0]).unwrap();
        assert_eq!(weights[1], 0.0);
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_all_zero_weights_stay_zero() {
        let errors = ErrorMatrix::new(2);
        let weights = RankWeighting.weights(&errors, &[0.0, 0.0]).unwrap();
        assert_eq!(weights, vec![0.0, 0.0]);
    }

    #[test]
    fn test_size_mismatch() {
        let errors = ErrorMatrix::new(2);
        assert!(RankWeighting.weights(&errors, &[1.0]).is_err());
    }

    /// Records what the synthesizer passes across the boundary.
    struct Recording(Mutex<Option<(ErrorMatrix, Vec<f64>)>>);

    impl WeightingFunction for Recording {
        fn weights(&self, errors: &ErrorMatrix, sizes: &[f64]) -> Result<Vec<f64>> {
            *self.0.lock().unwrap() = Some((errors.clone(), sizes.to_vec()));
            Ok(vec![1.0 / sizes.len() as f64; sizes.len()])
        }
    }

    #[test]
    fn test_synthesize_layout_and_sentinel() {
        let recording = Arc::new(Recording(Mutex::new(None)));
        let synthesizer = Synthesizer::new(recording.clone());

        let mut committed = BTreeMap::new();
        committed.insert(0, aggregate(0, &[(0, 0.1), (2, 0.15)], 100.0));

        let global = synthesizer.synthesize(3, &committed).unwrap();
        assert_eq!(global.models, vec!["model-0".to_string(), String::new(), String::new()]);
        assert_eq!(global.weights.len(), 3);

        let (errors, sizes) = recording.0.lock().unwrap().clone().unwrap();
        assert_eq!(sizes, vec![100.0, 0.0, 0.0]);
        assert_eq!(errors.get(0, 0), 0.1);
        assert_eq!(errors.get(0, 1), f64::NEG_INFINITY);
        assert_eq!(errors.get(0, 2), 0.15);
        assert!(errors.row(1).iter().all(|e| *e == f64::NEG_INFINITY));
    }

    #[test]
    fn test_synthesize_is_deterministic() {
        let synthesizer = Synthesizer::default();
        let mut committed = BTreeMap::new();
        committed.insert(0, aggregate(0, &[(0, 0.1), (1, 0.2)], 100.0));
        committed.insert(1, aggregate(1, &[(0, 0.3), (1, 0.05)], 40.0));

        let first = synthesizer.synthesize(2, &committed).unwrap();
        let second = synthesizer.synthesize(2, &committed).unwrap();
        assert_eq!(first, second);
    }
}
