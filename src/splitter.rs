//! Splitter
//!
//! Exhaustive best split search over a node histogram. Every (feature, bin)
//! candidate is scored by its impurity decrease; ties are broken on the
//! smaller feature id, then the smaller bin, so the chosen split does not depend
//! on the order in which nodes or features were processed. The features of a
//! node are scanned in parallel and their best splits are reduced in the order
//! of the candidate list.
use crate::constants::{
    MAX_HISTOGRAM_BYTES, MAX_SHARDS, MIN_ROWS_PER_SHARD, SINGLE_PASS_MAX_FEATURES, SINGLE_PASS_MAX_ROWS,
    TIE_TOLERANCE, ZERO_IMPURITY_TOLERANCE,
};
use crate::criterion::SplitCriterion;
use crate::errors::CanopyError;
use crate::histogram::{HistogramStrategy, NodeHistogram};
use crate::utils::validate_positive_float_parameter;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

fn default_tie_tolerance() -> f64 {
    TIE_TOLERANCE
}
fn default_zero_impurity_tolerance() -> f64 {
    ZERO_IMPURITY_TOLERANCE
}
fn default_single_pass_max_rows() -> usize {
    SINGLE_PASS_MAX_ROWS
}
fn default_single_pass_max_features() -> usize {
    SINGLE_PASS_MAX_FEATURES
}
fn default_min_rows_per_shard() -> usize {
    MIN_ROWS_PER_SHARD
}
fn default_max_shards() -> usize {
    MAX_SHARDS
}
fn default_max_histogram_bytes() -> usize {
    MAX_HISTOGRAM_BYTES
}

/// Tolerances of the split search and thresholds of the histogram strategies.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
pub struct SplitterConfig {
    /// Impurity decreases closer than this are tied.
    #[serde(default = "default_tie_tolerance")]
    pub tie_tolerance: f64,
    /// Nodes with an impurity at or below this are not split.
    #[serde(default = "default_zero_impurity_tolerance")]
    pub zero_impurity_tolerance: f64,
    #[serde(default = "default_single_pass_max_rows")]
    pub single_pass_max_rows: usize,
    #[serde(default = "default_single_pass_max_features")]
    pub single_pass_max_features: usize,
    #[serde(default = "default_min_rows_per_shard")]
    pub min_rows_per_shard: usize,
    #[serde(default = "default_max_shards")]
    pub max_shards: usize,
    /// Ceiling on the memory held by the partial histograms of one node.
    #[serde(default = "default_max_histogram_bytes")]
    pub max_histogram_bytes: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        SplitterConfig {
            tie_tolerance: default_tie_tolerance(),
            zero_impurity_tolerance: default_zero_impurity_tolerance(),
            single_pass_max_rows: default_single_pass_max_rows(),
            single_pass_max_features: default_single_pass_max_features(),
            min_rows_per_shard: default_min_rows_per_shard(),
            max_shards: default_max_shards(),
            max_histogram_bytes: default_max_histogram_bytes(),
        }
    }
}

impl SplitterConfig {
    pub fn validate(&self) -> Result<(), CanopyError> {
        validate_positive_float_parameter(self.tie_tolerance, "tie_tolerance")?;
        validate_positive_float_parameter(self.zero_impurity_tolerance, "zero_impurity_tolerance")?;
        crate::utils::validate_min_parameter(self.min_rows_per_shard, 1, "min_rows_per_shard")?;
        crate::utils::validate_min_parameter(self.max_shards, 1, "max_shards")?;
        Ok(())
    }
}

/// Node level limits on splitting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitConstraints {
    pub min_observations_in_leaf: usize,
    pub impurity_threshold: f64,
}

/// The best split found for a node.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitCandidate {
    pub feature: usize,
    /// Last bin routed to the left.
    pub bin: u16,
    pub decrease: f64,
    pub left_count: usize,
    /// Statistics of the left partition.
    pub left_stats: Vec<f64>,
}

/// Whether a split with impurity decrease `decrease` on `(feature, bin)` beats `best`.
#[inline]
pub fn improves(decrease: f64, feature: usize, bin: u16, best: Option<&SplitCandidate>, tolerance: f64) -> bool {
    match best {
        None => true,
        Some(b) => {
            if decrease > b.decrease + tolerance {
                true
            } else if (decrease - b.decrease).abs() <= tolerance {
                (feature, bin) < (b.feature, b.bin)
            } else {
                false
            }
        }
    }
}

/// Find the best split of a node, or `None` when it should become a leaf.
///
/// * `criterion` - Impurity measure.
/// * `hist` - Histogram of the node over `features`.
/// * `features` - Candidate features, in the order of the histogram.
/// * `node_stats` - Statistics of the whole node.
/// * `constraints` - Minimum leaf size and impurity threshold.
/// * `config` - Tolerances.
/// * `strategy` - Single pass histograms only evaluate bins a row landed in.
pub fn find_best_split<C: SplitCriterion + ?Sized>(
    criterion: &C,
    hist: &NodeHistogram,
    features: &[usize],
    node_stats: &[f64],
    constraints: &SplitConstraints,
    config: &SplitterConfig,
    strategy: HistogramStrategy,
) -> Option<SplitCandidate> {
    let node_count = criterion.count(node_stats);
    let node_impurity = criterion.impurity(node_stats);
    let min_leaf = constraints.min_observations_in_leaf.max(1) as f64;
    if node_impurity <= config.zero_impurity_tolerance
        || node_impurity < constraints.impurity_threshold
        || node_count < 2.0 * min_leaf
    {
        return None;
    }
    let only_seen = strategy == HistogramStrategy::SinglePass;
    let width = criterion.stat_width();
    let per_feature: Vec<Option<SplitCandidate>> = features
        .par_iter()
        .enumerate()
        .map(|(k, feature)| {
            let mut left = vec![0.0; width];
            let mut right = vec![0.0; width];
            let mut best: Option<SplitCandidate> = None;
            // The last bin always leaves the right partition empty.
            for bin in 0..hist.n_bins(k).saturating_sub(1) {
                if only_seen && !hist.is_seen(k, bin) {
                    continue;
                }
                left.iter_mut().zip(hist.cell(k, bin)).for_each(|(l, c)| *l += c);
                let left_count = criterion.count(&left);
                let right_count = node_count - left_count;
                if left_count < min_leaf || right_count < min_leaf {
                    continue;
                }
                right
                    .iter_mut()
                    .zip(node_stats.iter().zip(&left))
                    .for_each(|(r, (n, l))| *r = n - l);
                let decrease = node_impurity
                    - (left_count * criterion.impurity(&left) + right_count * criterion.impurity(&right)) / node_count;
                if decrease <= config.tie_tolerance {
                    continue;
                }
                let bin = bin as u16;
                if improves(decrease, *feature, bin, best.as_ref(), config.tie_tolerance) {
                    best = Some(SplitCandidate {
                        feature: *feature,
                        bin,
                        decrease,
                        left_count: left_count as usize,
                        left_stats: left.clone(),
                    });
                }
            }
            best
        })
        .collect();

    let mut best: Option<SplitCandidate> = None;
    for candidate in per_feature.into_iter().flatten() {
        if improves(candidate.decrease, candidate.feature, candidate.bin, best.as_ref(), config.tie_tolerance) {
            best = Some(candidate);
        }
    }
    best
}
