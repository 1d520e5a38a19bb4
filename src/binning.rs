//! Binning
//!
//! Discretize numeric feature columns into a small number of bins. Every bin is
//! described by its right edge: a value `v` lands in the first bin whose edge is
//! `>= v`, so a split "bin <= b" is the same as the raw condition "v <= edge[b]".
use crate::data::{JaggedMatrix, Matrix};
use crate::errors::CanopyError;
use crate::utils::validate_min_parameter;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// How the candidate bin edges of a column are placed.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum BinningStrategy {
    /// Edges at evenly spaced quantiles of the observed values.
    #[default]
    Quantiles,
    /// Edges at evenly spaced values between the minimum and the maximum.
    Averages,
}

fn default_max_bins() -> usize {
    crate::constants::DEFAULT_MAX_BINS
}
fn default_min_bin_size() -> usize {
    5
}

/// Parameters of the feature binner.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
pub struct BinningConfig {
    /// Upper bound on the number of bins of any column.
    #[serde(default = "default_max_bins")]
    pub max_bins: usize,
    /// Bins with fewer rows than this are merged into their neighbour.
    #[serde(default = "default_min_bin_size")]
    pub min_bin_size: usize,
    /// Placement of the candidate edges.
    #[serde(default)]
    pub strategy: BinningStrategy,
}

impl Default for BinningConfig {
    fn default() -> Self {
        BinningConfig {
            max_bins: default_max_bins(),
            min_bin_size: default_min_bin_size(),
            strategy: BinningStrategy::Quantiles,
        }
    }
}

impl BinningConfig {
    pub fn validate(&self) -> Result<(), CanopyError> {
        validate_min_parameter(self.max_bins, 2, "max_bins")?;
        validate_min_parameter(self.min_bin_size, 1, "min_bin_size")?;
        if self.max_bins > usize::from(u16::MAX) {
            return Err(CanopyError::incorrect_parameter(
                "max_bins",
                format!("a value of at most {}", u16::MAX),
                self.max_bins,
            ));
        }
        Ok(())
    }
}

/// The binned version of a single column.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureBins {
    /// Bin id of every value, in `[0, borders.len())`.
    pub bins: Vec<u16>,
    /// Right edge of every bin, strictly increasing.
    pub borders: Vec<f64>,
    /// Smallest non missing value of the column.
    pub min_value: f64,
}

fn candidate_edges(sorted: &[f64], config: &BinningConfig) -> Vec<f64> {
    let n = sorted.len();
    let min = sorted[0];
    let max = sorted[n - 1];
    let mut edges = match config.strategy {
        BinningStrategy::Quantiles => {
            let mut distinct = sorted.to_vec();
            distinct.dedup();
            if distinct.len() <= config.max_bins {
                return distinct;
            }
            (1..=config.max_bins)
                .map(|k| sorted[(k * n).div_ceil(config.max_bins) - 1])
                .collect::<Vec<_>>()
        }
        BinningStrategy::Averages => {
            if min == max {
                return vec![max];
            }
            let width = (max - min) / config.max_bins as f64;
            let mut e: Vec<f64> = (1..config.max_bins).map(|k| min + width * k as f64).collect();
            e.push(max);
            e
        }
    };
    edges.dedup();
    edges
}

/// Merge bins holding fewer than `min_bin_size` values into the following bin,
/// the last undersized bin is merged backwards.
fn merge_small_bins(sorted: &[f64], edges: &[f64], min_bin_size: usize) -> Vec<f64> {
    let mut merged = Vec::with_capacity(edges.len());
    let mut acc = 0;
    let mut i = 0;
    for edge in edges {
        while i < sorted.len() && sorted[i] <= *edge {
            acc += 1;
            i += 1;
        }
        if acc >= min_bin_size {
            merged.push(*edge);
            acc = 0;
        }
    }
    if acc > 0 || merged.is_empty() {
        let last = *edges.last().unwrap_or(&f64::INFINITY);
        match merged.last_mut() {
            Some(e) => *e = last,
            None => merged.push(last),
        }
    }
    merged
}

/// Bin id of a value given the right edges of the bins.
#[inline]
pub fn map_bin(borders: &[f64], v: f64) -> u16 {
    if v.is_nan() {
        return 0;
    }
    let idx = borders.partition_point(|e| *e < v);
    idx.min(borders.len() - 1) as u16
}

/// Bin a single numeric column.
///
/// * `values` - The raw values, NaN is treated as missing and lands in bin 0.
/// * `config` - Binning parameters.
pub fn bin_feature(values: &[f64], config: &BinningConfig) -> Result<FeatureBins, CanopyError> {
    config.validate()?;
    if values.is_empty() {
        return Err(CanopyError::incorrect_parameter("data", "at least one row", 0));
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return Ok(FeatureBins {
            bins: vec![0; values.len()],
            borders: vec![f64::INFINITY],
            min_value: f64::NAN,
        });
    }
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));

    let edges = candidate_edges(&sorted, config);
    let borders = merge_small_bins(&sorted, &edges, config.min_bin_size);
    let bins = values.iter().map(|v| map_bin(&borders, *v)).collect();

    Ok(FeatureBins {
        bins,
        borders,
        min_value: sorted[0],
    })
}

/// A binned column-major matrix, with the edges needed to turn bins back into thresholds.
#[derive(Debug, Clone)]
pub struct BinnedData {
    pub binned_data: Vec<u16>,
    pub borders: JaggedMatrix<f64>,
    pub min_values: Vec<f64>,
    pub rows: usize,
    pub cols: usize,
}

impl BinnedData {
    pub fn as_matrix(&self) -> Matrix<'_, u16> {
        Matrix::new(&self.binned_data, self.rows, self.cols)
    }

    /// Number of bins of a feature.
    pub fn n_bins(&self, feature: usize) -> usize {
        self.borders.col_len(feature)
    }

    /// Number of bins of every feature.
    pub fn n_bins_per_feature(&self) -> Vec<usize> {
        (0..self.cols).map(|f| self.n_bins(f)).collect()
    }

    /// Raw threshold of a split sending bins `0..=bin` to the left.
    pub fn threshold(&self, feature: usize, bin: u16) -> f64 {
        self.borders.get_col(feature)[usize::from(bin)]
    }
}

/// Bin a numeric matrix, one column at a time in parallel.
///
/// * `data` - A numeric matrix, of data to be binned.
/// * `config` - Binning parameters shared by all columns.
pub fn bin_matrix(data: &Matrix<f64>, config: &BinningConfig) -> Result<BinnedData, CanopyError> {
    config.validate()?;
    let columns = (0..data.cols)
        .into_par_iter()
        .map(|col| bin_feature(data.get_col(col), config))
        .collect::<Result<Vec<_>, _>>()?;

    let mut binned_data = Vec::with_capacity(data.rows * data.cols);
    let mut borders = Vec::with_capacity(data.cols);
    let mut min_values = Vec::with_capacity(data.cols);
    for column in columns {
        binned_data.extend_from_slice(&column.bins);
        borders.push(column.borders);
        min_values.push(column.min_value);
    }

    Ok(BinnedData {
        binned_data,
        borders: JaggedMatrix::from_vecs(&borders),
        min_values,
        rows: data.rows,
        cols: data.cols,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_bins: usize, min_bin_size: usize, strategy: BinningStrategy) -> BinningConfig {
        BinningConfig {
            max_bins,
            min_bin_size,
            strategy,
        }
    }

    #[test]
    fn test_bin_distinct_values() {
        let b = bin_feature(&[3.0, 1.0, 0.0, 2.0], &config(4, 1, BinningStrategy::Quantiles)).unwrap();
        assert_eq!(b.borders, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(b.bins, vec![3, 1, 0, 2]);
        assert_eq!(b.min_value, 0.0);
    }

    #[test]
    fn test_bin_quantiles() {
        let v: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let b = bin_feature(&v, &config(2, 1, BinningStrategy::Quantiles)).unwrap();
        assert_eq!(b.borders, vec![4.0, 9.0]);
        assert_eq!(b.bins.iter().filter(|x| **x == 0).count(), 5);
        for (bin, value) in b.bins.iter().zip(v.iter()) {
            let edge = b.borders[usize::from(*bin)];
            assert!(*value <= edge);
            if *bin > 0 {
                assert!(*value > b.borders[usize::from(*bin) - 1]);
            }
        }
    }

    #[test]
    fn test_bin_min_bin_size_merges() {
        let v = vec![0.0, 1.0, 1.0, 1.0, 2.0, 3.0, 3.0, 3.0];
        let b = bin_feature(&v, &config(8, 3, BinningStrategy::Quantiles)).unwrap();
        // {0, 1, 1, 1} then {2, 3, 3, 3}
        assert_eq!(b.borders, vec![1.0, 3.0]);
        assert_eq!(b.bins, vec![0, 0, 0, 0, 1, 1, 1, 1]);
    }

    #[test]
    fn test_bin_last_small_bin_merges_backwards() {
        let v = vec![0.0, 0.0, 1.0, 1.0, 2.0];
        let b = bin_feature(&v, &config(8, 2, BinningStrategy::Quantiles)).unwrap();
        assert_eq!(b.borders, vec![0.0, 2.0]);
    }

    #[test]
    fn test_bin_averages() {
        let v: Vec<f64> = (0..=10).map(|i| i as f64).collect();
        let b = bin_feature(&v, &config(2, 1, BinningStrategy::Averages)).unwrap();
        assert_eq!(b.borders, vec![5.0, 10.0]);
        let b = bin_feature(&[1.0, 1.0], &config(4, 1, BinningStrategy::Averages)).unwrap();
        assert_eq!(b.borders, vec![1.0]);
    }

    #[test]
    fn test_bin_missing() {
        let b = bin_feature(&[f64::NAN, 1.0, 2.0], &config(4, 1, BinningStrategy::Quantiles)).unwrap();
        assert_eq!(b.bins, vec![0, 0, 1]);
        let b = bin_feature(&[f64::NAN, f64::NAN], &config(4, 1, BinningStrategy::Quantiles)).unwrap();
        assert_eq!(b.borders.len(), 1);
        assert!(b.min_value.is_nan());
    }

    #[test]
    fn test_bin_quantiles_with_missing() {
        let mut v = vec![f64::NAN, f64::NAN];
        v.extend((0..10).map(|i| i as f64));
        v.swap(1, 7);
        let b = bin_feature(&v, &config(2, 1, BinningStrategy::Quantiles)).unwrap();
        // Quantiles come from the ten present values only.
        assert_eq!(b.borders, vec![4.0, 9.0]);
        assert_eq!(b.min_value, 0.0);
        for (value, bin) in v.iter().zip(&b.bins) {
            let expected = if value.is_nan() || *value <= 4.0 { 0 } else { 1 };
            assert_eq!(*bin, expected, "value {}", value);
        }
        assert_eq!(b.bins.iter().filter(|x| **x == 0).count(), 7);

        let b = bin_feature(&v, &config(3, 1, BinningStrategy::Quantiles)).unwrap();
        assert_eq!(b.borders, vec![3.0, 6.0, 9.0]);
        assert_eq!(b.bins[0], 0);
        assert_eq!(b.bins[7], 0);
    }

    #[test]
    fn test_bin_invalid_parameters() {
        let v = vec![1.0, 2.0];
        assert!(matches!(
            bin_feature(&v, &config(1, 1, BinningStrategy::Quantiles)),
            Err(CanopyError::IncorrectParameter(..))
        ));
        assert!(matches!(
            bin_feature(&v, &config(4, 0, BinningStrategy::Quantiles)),
            Err(CanopyError::IncorrectParameter(..))
        ));
    }

    #[test]
    fn test_bin_matrix() {
        let data_vec = vec![0.0, 1.0, 2.0, 3.0, 10.0, 10.0, 20.0, 20.0];
        let data = Matrix::new(&data_vec, 4, 2);
        let b = bin_matrix(&data, &config(16, 1, BinningStrategy::Quantiles)).unwrap();
        assert_eq!(b.n_bins_per_feature(), vec![4, 2]);
        assert_eq!(b.as_matrix().get_col(1), &[0, 0, 1, 1]);
        assert_eq!(b.threshold(0, 1), 1.0);
        assert_eq!(b.min_values, vec![0.0, 10.0]);
    }

    #[test]
    fn test_map_bin_out_of_range() {
        let borders = vec![1.0, 4.0, 8.0];
        assert_eq!(map_bin(&borders, -5.0), 0);
        assert_eq!(map_bin(&borders, 4.0), 1);
        assert_eq!(map_bin(&borders, 4.5), 2);
        assert_eq!(map_bin(&borders, 100.0), 2);
    }
}
