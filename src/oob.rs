//! Out-of-bag
//!
//! Bookkeeping run once per finished tree: out-of-bag votes or sums for the
//! ensemble error, and the impurity and permutation based variable importance.
//! All accumulators are updated online, one tree at a time.
use crate::data::Matrix;
use crate::ensemble::Task;
use crate::tree::encode::{EncodedTree, TreeAux};
use crate::utils::{argmax, RunningStats};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Prediction of a tree table for the leaf in row `leaf`.
#[inline]
fn leaf_prediction(tree: &EncodedTree, leaf: usize, task: Task) -> f64 {
    let node = &tree.nodes[leaf];
    match task {
        Task::Classification { .. } => node.left_child_or_class as f64,
        Task::Regression => node.value,
    }
}

#[inline]
fn row_error(prediction: f64, y: f64, task: Task) -> f64 {
    match task {
        Task::Classification { .. } => {
            if prediction == y {
                0.0
            } else {
                1.0
            }
        }
        Task::Regression => (prediction - y) * (prediction - y),
    }
}

/// Error of a single tree over `rows`, with the features given by `value(row, feature)`.
fn tree_error<F: Fn(usize, usize, usize) -> f64>(
    tree: &EncodedTree,
    rows: &[usize],
    y: &[f64],
    task: Task,
    value: F,
) -> f64 {
    let total: f64 = rows
        .iter()
        .enumerate()
        .map(|(k, r)| {
            let leaf = tree.leaf_index_by(|f| value(k, *r, f));
            row_error(leaf_prediction(tree, leaf, task), y[*r], task)
        })
        .sum();
    total / rows.len() as f64
}

/// Sum over the splits of a tree of the weighted impurity decrease, per
/// feature, relative to the root's sample count.
pub fn impurity_decrease(tree: &EncodedTree, aux: &TreeAux, n_features: usize) -> Vec<f64> {
    let mut decrease = vec![0.0; n_features];
    let root_count = aux.sample_counts.first().copied().unwrap_or(0);
    if root_count == 0 {
        return decrease;
    }
    for (i, node) in tree.nodes.iter().enumerate() {
        let (feature, (l, r)) = match (node.feature(), tree.children(i)) {
            (Some(f), Some(c)) => (f, c),
            _ => continue,
        };
        let weighted = |j: usize| aux.sample_counts[j] as f64 * aux.impurities[j];
        if let Some(d) = decrease.get_mut(feature) {
            *d += weighted(i) - weighted(l) - weighted(r);
        }
    }
    decrease.iter_mut().for_each(|d| *d /= root_count as f64);
    decrease
}

/// Out-of-bag accumulators of an ensemble under training.
#[derive(Debug, Clone)]
pub struct OobAccumulator {
    task: Task,
    n_rows: usize,
    /// Class votes (`n_rows x n_classes`) or response sums (`n_rows`).
    predictions: Vec<f64>,
    counts: Vec<u32>,
    mdi: Vec<f64>,
    mdi_trees: usize,
    mda: Vec<RunningStats>,
}

impl OobAccumulator {
    pub fn new(task: Task, n_rows: usize, n_features: usize) -> Self {
        let width = task.n_classes().max(1);
        OobAccumulator {
            task,
            n_rows,
            predictions: vec![0.0; n_rows * width],
            counts: vec![0; n_rows],
            mdi: vec![0.0; n_features],
            mdi_trees: 0,
            mda: vec![RunningStats::new(); n_features],
        }
    }

    /// Record the predictions of a finished tree for its out-of-bag rows.
    pub fn add_tree(&mut self, tree: &EncodedTree, oob_rows: &[usize], data: &Matrix<f64>) {
        let width = self.task.n_classes().max(1);
        for r in oob_rows {
            let prediction = leaf_prediction(tree, tree.leaf_index_in(data, *r), self.task);
            match self.task {
                Task::Classification { n_classes } => {
                    let class = prediction as usize;
                    if class < n_classes {
                        self.predictions[r * width + class] += 1.0;
                    }
                }
                Task::Regression => self.predictions[*r] += prediction,
            }
            self.counts[*r] += 1;
        }
    }

    /// Add the impurity decrease of a finished tree.
    pub fn add_impurity_decrease(&mut self, tree: &EncodedTree, aux: &TreeAux) {
        let decrease = impurity_decrease(tree, aux, self.mdi.len());
        self.mdi.iter_mut().zip(decrease).for_each(|(m, d)| *m += d);
        self.mdi_trees += 1;
    }

    /// Add, for every feature, the increase of the tree's out-of-bag error
    /// when the feature's values are shuffled among the out-of-bag rows.
    /// Trees without out-of-bag rows are skipped.
    pub fn add_permutation_importance(
        &mut self,
        tree: &EncodedTree,
        oob_rows: &[usize],
        data: &Matrix<f64>,
        y: &[f64],
        rng: &mut StdRng,
    ) {
        if oob_rows.is_empty() {
            return;
        }
        let task = self.task;
        let base = tree_error(tree, oob_rows, y, task, |_, r, f| *data.get(r, f));
        let mut used = vec![false; self.mda.len()];
        tree.nodes
            .iter()
            .filter_map(|n| n.feature())
            .for_each(|f| {
                if let Some(u) = used.get_mut(f) {
                    *u = true;
                }
            });
        let mut donors = oob_rows.to_vec();
        for (feature, stats) in self.mda.iter_mut().enumerate() {
            if !used[feature] {
                stats.update(0.0);
                continue;
            }
            donors.shuffle(rng);
            let permuted = tree_error(tree, oob_rows, y, task, |k, r, f| {
                if f == feature {
                    *data.get(donors[k], f)
                } else {
                    *data.get(r, f)
                }
            });
            stats.update(permuted - base);
        }
    }

    // Ensemble prediction of a row that was out of bag at least once.
    fn prediction(&self, row: usize) -> Option<f64> {
        if self.counts[row] == 0 {
            return None;
        }
        match self.task {
            Task::Classification { n_classes } => {
                let votes = &self.predictions[row * n_classes..(row + 1) * n_classes];
                Some(argmax(votes) as f64)
            }
            Task::Regression => Some(self.predictions[row] / self.counts[row] as f64),
        }
    }

    /// Misclassification rate or mean squared error over the rows that were
    /// out of bag at least once, `None` if there is no such row.
    pub fn oob_error(&self, y: &[f64]) -> Option<f64> {
        let (total, n) = (0..self.n_rows)
            .filter_map(|r| self.prediction(r).map(|p| row_error(p, y[r], self.task)))
            .fold((0.0, 0usize), |(t, n), e| (t + e, n + 1));
        if n == 0 {
            None
        } else {
            Some(total / n as f64)
        }
    }

    /// Out-of-bag error of every row, `NaN` for rows that were never out of bag.
    pub fn oob_error_per_observation(&self, y: &[f64]) -> Vec<f64> {
        (0..self.n_rows)
            .map(|r| self.prediction(r).map_or(f64::NAN, |p| row_error(p, y[r], self.task)))
            .collect()
    }

    /// Mean decrease of impurity per feature, averaged over the trees added.
    pub fn mdi(&self) -> Vec<f64> {
        if self.mdi_trees == 0 {
            return self.mdi.clone();
        }
        self.mdi.iter().map(|m| m / self.mdi_trees as f64).collect()
    }

    /// Mean decrease of accuracy per feature, divided by its standard error when `scaled`.
    pub fn mda(&self, scaled: bool) -> Vec<f64> {
        self.mda
            .iter()
            .map(|s| {
                if !scaled {
                    return s.mean;
                }
                let var = s.variance();
                if var <= 0.0 {
                    0.0
                } else {
                    s.mean / (var / s.count as f64).sqrt()
                }
            })
            .collect()
    }
}
