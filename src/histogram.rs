//! Histogram
//!
//! Per node, per candidate feature, per bin statistics. A node's histogram is
//! either built by a single scan over its rows, or in two phases: the rows are
//! cut into shards, each shard fills its own zeroed partial histogram, and the
//! partials are reduced in shard order. Within a histogram the candidate
//! features are filled in parallel, each into its own block of cells.
use crate::criterion::SplitCriterion;
use crate::data::Matrix;
use crate::splitter::SplitterConfig;
use rayon::prelude::*;

/// How a node's histogram is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistogramStrategy {
    SinglePass,
    TwoPhase { shards: usize },
}

/// Pick the histogram strategy of a node.
///
/// * `n_rows` - Rows of the node.
/// * `n_features` - Candidate features of the node.
/// * `histogram_bytes` - Size of one full histogram of the node.
/// * `config` - Thresholds of the strategies.
pub fn select_strategy(
    n_rows: usize,
    n_features: usize,
    histogram_bytes: usize,
    config: &SplitterConfig,
) -> HistogramStrategy {
    if n_rows <= config.single_pass_max_rows && n_features <= config.single_pass_max_features {
        return HistogramStrategy::SinglePass;
    }
    let mut shards = n_rows.div_ceil(config.min_rows_per_shard.max(1)).clamp(1, config.max_shards.max(1));
    while shards > 1 && shards.saturating_mul(histogram_bytes) > config.max_histogram_bytes {
        shards /= 2;
    }
    HistogramStrategy::TwoPhase { shards }
}

/// Statistics of a node, laid out `[feature][bin][stat]`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeHistogram {
    /// Statistics per cell.
    pub width: usize,
    /// First cell of every candidate feature, plus the total number of cells.
    pub offsets: Vec<usize>,
    pub stats: Vec<f64>,
    /// At least one row landed in the cell.
    pub seen: Vec<bool>,
}

impl NodeHistogram {
    /// A zeroed histogram over the candidate `features`.
    pub fn zeros(features: &[usize], n_bins: &[usize], width: usize) -> Self {
        let mut offsets = Vec::with_capacity(features.len() + 1);
        let mut cells = 0;
        offsets.push(0);
        for f in features {
            cells += n_bins[*f];
            offsets.push(cells);
        }
        NodeHistogram {
            width,
            offsets,
            stats: vec![0.0; cells * width],
            seen: vec![false; cells],
        }
    }

    /// Size in bytes of a histogram over `features`.
    pub fn size_in_bytes(features: &[usize], n_bins: &[usize], width: usize) -> usize {
        let cells: usize = features.iter().map(|f| n_bins[*f]).sum();
        cells * (width * std::mem::size_of::<f64>() + std::mem::size_of::<bool>())
    }

    pub fn n_features(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Number of bins of the `k`th candidate feature.
    pub fn n_bins(&self, k: usize) -> usize {
        self.offsets[k + 1] - self.offsets[k]
    }

    /// Statistics of bin `bin` of the `k`th candidate feature.
    #[inline]
    pub fn cell(&self, k: usize, bin: usize) -> &[f64] {
        let start = (self.offsets[k] + bin) * self.width;
        &self.stats[start..start + self.width]
    }

    #[inline]
    pub fn is_seen(&self, k: usize, bin: usize) -> bool {
        self.seen[self.offsets[k] + bin]
    }

    fn accumulate<C: SplitCriterion + ?Sized>(
        &mut self,
        criterion: &C,
        data: &Matrix<u16>,
        features: &[usize],
        rows: &[usize],
    ) {
        let width = self.width;
        let mut stats: &mut [f64] = &mut self.stats;
        let mut seen: &mut [bool] = &mut self.seen;
        let mut blocks = Vec::with_capacity(features.len());
        for (k, f) in features.iter().enumerate() {
            let cells = self.offsets[k + 1] - self.offsets[k];
            let (feature_stats, rest) = std::mem::take(&mut stats).split_at_mut(cells * width);
            stats = rest;
            let (feature_seen, rest) = std::mem::take(&mut seen).split_at_mut(cells);
            seen = rest;
            blocks.push((data.get_col(*f), feature_stats, feature_seen));
        }
        blocks.into_par_iter().for_each(|(col, stats, seen)| {
            for row in rows {
                let bin = usize::from(col[*row]);
                seen[bin] = true;
                criterion.add_row(*row, &mut stats[bin * width..(bin + 1) * width]);
            }
        });
    }

    /// Add another histogram over the same features to this one.
    pub fn merge(&mut self, other: &NodeHistogram) {
        self.stats.iter_mut().zip(&other.stats).for_each(|(a, b)| *a += b);
        self.seen.iter_mut().zip(&other.seen).for_each(|(a, b)| *a |= b);
    }
}

/// Build the histogram of a node.
///
/// * `criterion` - Statistics accumulated per cell.
/// * `data` - Binned training data.
/// * `n_bins` - Number of bins of every feature.
/// * `features` - Candidate features of the node.
/// * `rows` - Rows of the node.
/// * `strategy` - Single pass, or number of shards of the two-phase build.
pub fn build_histogram<C: SplitCriterion + ?Sized>(
    criterion: &C,
    data: &Matrix<u16>,
    n_bins: &[usize],
    features: &[usize],
    rows: &[usize],
    strategy: HistogramStrategy,
) -> NodeHistogram {
    let width = criterion.stat_width();
    match strategy {
        HistogramStrategy::SinglePass => {
            let mut hist = NodeHistogram::zeros(features, n_bins, width);
            hist.accumulate(criterion, data, features, rows);
            hist
        }
        HistogramStrategy::TwoPhase { shards } => {
            let chunk = rows.len().div_ceil(shards.max(1)).max(1);
            let partials: Vec<NodeHistogram> = rows
                .par_chunks(chunk)
                .map(|shard| {
                    let mut partial = NodeHistogram::zeros(features, n_bins, width);
                    partial.accumulate(criterion, data, features, shard);
                    partial
                })
                .collect();
            let mut hist = NodeHistogram::zeros(features, n_bins, width);
            for partial in &partials {
                hist.merge(partial);
            }
            hist
        }
    }
}
