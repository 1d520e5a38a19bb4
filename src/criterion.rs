//! Criterion
//!
//! Node statistics and impurity measures. A criterion describes the statistics
//! accumulated per histogram cell, and how a node's impurity and prediction are
//! derived from them. Statistics are additive, so the statistics of a right
//! partition are the node's minus the left partition's.
use crate::errors::CanopyError;
use crate::utils::{argmax, class_label};

/// Statistics and impurity of a node.
pub trait SplitCriterion: Sync {
    /// Number of `f64` statistics per histogram cell.
    fn stat_width(&self) -> usize;
    /// Add the contribution of a training row.
    fn add_row(&self, row: usize, stats: &mut [f64]);
    /// Number of rows summarized by the statistics.
    fn count(&self, stats: &[f64]) -> f64;
    fn impurity(&self, stats: &[f64]) -> f64;
    /// Prediction of a leaf with these statistics.
    fn leaf_value(&self, stats: &[f64]) -> f64;
    /// Number of classes, `0` for regression criteria.
    fn n_classes(&self) -> usize {
        0
    }
    /// Class histogram, for classification criteria.
    fn class_counts<'s>(&self, _stats: &'s [f64]) -> Option<&'s [f64]> {
        None
    }

    /// Statistics of a set of rows.
    fn node_stats(&self, rows: &[usize]) -> Vec<f64> {
        let mut stats = vec![0.0; self.stat_width()];
        rows.iter().for_each(|r| self.add_row(*r, &mut stats));
        stats
    }
}

/// Gini impurity over class counts.
pub struct Gini<'a> {
    labels: &'a [usize],
    n_classes: usize,
}

impl<'a> Gini<'a> {
    /// * `labels` - Class id of every row, below `n_classes`.
    pub fn new(labels: &'a [usize], n_classes: usize) -> Self {
        Gini { labels, n_classes }
    }
}

/// Turn float labels into class ids, failing on anything that isn't an integral
/// class id below `n_classes`.
pub fn class_ids(y: &[f64], n_classes: usize) -> Result<Vec<usize>, CanopyError> {
    y.iter()
        .map(|v| {
            class_label(*v, n_classes).ok_or_else(|| {
                CanopyError::incorrect_parameter("y", format!("class labels in 0..{}", n_classes), v)
            })
        })
        .collect()
}

impl<'a> SplitCriterion for Gini<'a> {
    fn stat_width(&self) -> usize {
        self.n_classes
    }

    #[inline]
    fn add_row(&self, row: usize, stats: &mut [f64]) {
        stats[self.labels[row]] += 1.0;
    }

    #[inline]
    fn count(&self, stats: &[f64]) -> f64 {
        stats.iter().sum()
    }

    fn impurity(&self, stats: &[f64]) -> f64 {
        let n = self.count(stats);
        if n <= 0.0 {
            return 0.0;
        }
        1.0 - stats.iter().map(|c| (c / n) * (c / n)).sum::<f64>()
    }

    fn leaf_value(&self, stats: &[f64]) -> f64 {
        argmax(stats) as f64
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn class_counts<'s>(&self, stats: &'s [f64]) -> Option<&'s [f64]> {
        Some(stats)
    }
}

/// Response variance, from the count, sum and sum of squares of the responses
/// shifted by the middle of their range. The shift keeps the sums small for
/// targets with a large offset, where raw sums of squares cancel.
pub struct Variance {
    centred: Vec<f64>,
    shift: f64,
}

impl Variance {
    pub fn new(y: &[f64]) -> Self {
        let (min, max) = y
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        let shift = if min.is_finite() && max.is_finite() {
            min + (max - min) / 2.0
        } else {
            0.0
        };
        Variance {
            centred: y.iter().map(|v| v - shift).collect(),
            shift,
        }
    }
}

impl SplitCriterion for Variance {
    fn stat_width(&self) -> usize {
        3
    }

    #[inline]
    fn add_row(&self, row: usize, stats: &mut [f64]) {
        let y = self.centred[row];
        stats[0] += 1.0;
        stats[1] += y;
        stats[2] += y * y;
    }

    #[inline]
    fn count(&self, stats: &[f64]) -> f64 {
        stats[0]
    }

    fn impurity(&self, stats: &[f64]) -> f64 {
        let n = stats[0];
        if n <= 0.0 {
            return 0.0;
        }
        let mean = stats[1] / n;
        (stats[2] / n - mean * mean).max(0.0)
    }

    fn leaf_value(&self, stats: &[f64]) -> f64 {
        if stats[0] <= 0.0 {
            self.shift
        } else {
            stats[1] / stats[0] + self.shift
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::precision_round;

    #[test]
    fn test_gini() {
        let labels = vec![0, 1, 1, 2];
        let g = Gini::new(&labels, 3);
        let stats = g.node_stats(&[0, 1, 2, 3]);
        assert_eq!(stats, vec![1.0, 2.0, 1.0]);
        assert_eq!(g.count(&stats), 4.0);
        assert_eq!(g.impurity(&stats), 1.0 - (0.0625 + 0.25 + 0.0625));
        assert_eq!(g.leaf_value(&stats), 1.0);
        assert_eq!(g.impurity(&[3.0, 0.0, 0.0]), 0.0);
        assert_eq!(g.impurity(&[0.0, 0.0, 0.0]), 0.0);
        assert_eq!(g.class_counts(&stats), Some(stats.as_slice()));
    }

    #[test]
    fn test_variance() {
        let y = vec![1.0, 2.0, 3.0, 4.0];
        let v = Variance::new(&y);
        let stats = v.node_stats(&[0, 1, 2, 3]);
        assert_eq!(stats, vec![4.0, 0.0, 5.0]);
        assert_eq!(precision_round(v.impurity(&stats), 10), 1.25);
        assert_eq!(v.leaf_value(&stats), 2.5);
        assert_eq!(v.impurity(&v.node_stats(&[1, 1])), 0.0);
        assert!(v.class_counts(&stats).is_none());
    }

    #[test]
    fn test_variance_large_offset() {
        for offset in [1e8, 1e9, -1e9] {
            let y = vec![offset, offset, offset + 1.0, offset + 1.0];
            let v = Variance::new(&y);
            let stats = v.node_stats(&[0, 1, 2, 3]);
            assert_eq!(v.impurity(&stats), 0.25);
            assert_eq!(v.leaf_value(&stats), offset + 0.5);
            let left = v.node_stats(&[0, 1]);
            assert_eq!(v.impurity(&left), 0.0);
            assert_eq!(v.leaf_value(&left), offset);
        }
    }

    #[test]
    fn test_class_ids() {
        assert_eq!(class_ids(&[0.0, 1.0, 1.0], 2).unwrap(), vec![0, 1, 1]);
        assert!(matches!(
            class_ids(&[0.0, 2.0], 2),
            Err(CanopyError::IncorrectParameter(..))
        ));
    }
}
