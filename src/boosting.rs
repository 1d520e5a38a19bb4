//! Gradient boosting
//!
//! Squared loss gradient boosting over depth limited trees. Every round grows a
//! tree on the residuals of the current predictions with the variance
//! criterion, scales its leaves by the learning rate and stores it with the
//! implicit complete binary tree encoding.
use crate::arena::NodeArena;
use crate::binning::{bin_matrix, BinningConfig};
use crate::config::ModelIO;
use crate::constants::MAX_IMPLICIT_LEVEL;
use crate::criterion::Variance;
use crate::data::Matrix;
use crate::ensemble::{ModelVersion, Task, TreeEnsemble};
use crate::errors::CanopyError;
use crate::grower::{GrowerParams, TreeGrower};
use crate::partition::RowPartitioner;
use crate::splitter::{SplitConstraints, SplitterConfig};
use crate::tree::encode::{encode_implicit, Encoding};
use crate::utils::{validate_float_parameter, validate_min_parameter};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;

fn default_n_trees() -> usize {
    100
}
fn default_max_depth() -> usize {
    3
}
fn default_learning_rate() -> f64 {
    0.1
}
fn default_min_observations_in_leaf() -> usize {
    1
}

/// Configuration of the gradient boosting trainer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BoostingConfig {
    /// Number of boosting rounds.
    #[serde(default = "default_n_trees")]
    pub n_trees: usize,
    /// Depth of the trees, at least 1.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Step size shrinkage applied to the leaves of every tree.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_min_observations_in_leaf")]
    pub min_observations_in_leaf: usize,
    #[serde(default)]
    pub binning: BinningConfig,
    /// Seed for random number generation.
    #[serde(default)]
    pub seed: u64,
    /// Number of threads for parallel tasks.
    #[serde(default)]
    pub num_threads: Option<usize>,
    #[serde(default)]
    pub splitter: SplitterConfig,
    /// Logging frequency (every N trees).
    #[serde(default)]
    pub log_trees: usize,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        BoostingConfig {
            n_trees: default_n_trees(),
            max_depth: default_max_depth(),
            learning_rate: default_learning_rate(),
            min_observations_in_leaf: default_min_observations_in_leaf(),
            binning: BinningConfig::default(),
            seed: 0,
            num_threads: None,
            splitter: SplitterConfig::default(),
            log_trees: 0,
        }
    }
}

impl BoostingConfig {
    pub fn validate(&self) -> Result<(), CanopyError> {
        validate_min_parameter(self.n_trees, 1, "n_trees")?;
        validate_min_parameter(self.max_depth, 1, "max_depth")?;
        if self.max_depth > MAX_IMPLICIT_LEVEL {
            return Err(CanopyError::incorrect_parameter(
                "max_depth",
                format!("a depth of at most {}", MAX_IMPLICIT_LEVEL),
                self.max_depth,
            ));
        }
        validate_float_parameter(self.learning_rate, f64::MIN_POSITIVE, 1.0, "learning_rate")?;
        validate_min_parameter(self.min_observations_in_leaf, 1, "min_observations_in_leaf")?;
        self.binning.validate()?;
        self.splitter.validate()
    }
}

/// Gradient boosted regression trees.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GradientBoostedTrees {
    pub cfg: BoostingConfig,
    /// Initial prediction, the mean response.
    pub base_score: f64,
    ensemble: TreeEnsemble,
}

impl Default for GradientBoostedTrees {
    fn default() -> Self {
        GradientBoostedTrees::new(BoostingConfig::default())
    }
}

impl GradientBoostedTrees {
    pub fn new(cfg: BoostingConfig) -> Self {
        GradientBoostedTrees {
            cfg,
            base_score: 0.0,
            ensemble: TreeEnsemble::new(Task::Regression, 0, Encoding::Implicit, ModelVersion::V2),
        }
    }

    /// Fit the model.
    ///
    /// * `data` - Training features, one row per observation.
    /// * `y` - Training responses.
    pub fn fit(&mut self, data: &Matrix<f64>, y: &[f64]) -> Result<(), CanopyError> {
        let start = Instant::now();
        self.cfg.validate()?;
        Matrix::try_new(data.data, data.rows, data.cols)?;
        if data.rows == 0 || y.len() != data.rows {
            return Err(CanopyError::incorrect_parameter(
                "y",
                format!("one response per row of the {} rows", data.rows),
                y.len(),
            ));
        }
        if let Some(v) = y.iter().find(|v| !v.is_finite()) {
            return Err(CanopyError::incorrect_parameter("y", "finite responses", v));
        }

        let binned = bin_matrix(data, &self.cfg.binning)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.cfg.num_threads.unwrap_or(0))
            .build()
            .map_err(|e| CanopyError::incorrect_parameter("num_threads", "a number of threads rayon can start", e))?;
        let params = GrowerParams {
            max_depth: self.cfg.max_depth,
            constraints: SplitConstraints {
                min_observations_in_leaf: self.cfg.min_observations_in_leaf,
                impurity_threshold: 0.0,
            },
            features_per_node: 0,
            splitter: self.cfg.splitter,
        };

        self.base_score = y.iter().sum::<f64>() / y.len() as f64;
        self.ensemble = TreeEnsemble::new(Task::Regression, data.cols, Encoding::Implicit, ModelVersion::V2);
        self.ensemble.reserve(self.cfg.n_trees);

        let rows: Vec<usize> = (0..data.rows).collect();
        let mut yhat = vec![self.base_score; data.rows];
        let mut residuals = vec![0.0; data.rows];
        let mut rng = StdRng::seed_from_u64(self.cfg.seed);
        let mut arena = NodeArena::new();
        let mut partitioner = RowPartitioner::new();

        for i in 0..self.cfg.n_trees {
            residuals.iter_mut().zip(y.iter().zip(&yhat)).for_each(|(r, (y, p))| *r = y - p);
            let variance = Variance::new(&residuals);
            let grower = TreeGrower::new(&variance, &binned, params);
            let tree = pool.install(|| grower.grow(&rows, &mut rng, arena, &mut partitioner, None))?;
            let (mut encoded, aux) = encode_implicit(&tree)?;
            arena = tree.into_allocator();
            encoded
                .nodes
                .iter_mut()
                .filter(|n| n.is_leaf())
                .for_each(|n| n.value *= self.cfg.learning_rate);

            yhat.par_iter_mut()
                .enumerate()
                .for_each(|(r, p)| *p += encoded.nodes[encoded.leaf_index_in(data, r)].value);
            self.ensemble.push(encoded, Some(aux))?;

            if self.cfg.log_trees > 0 && (i + 1) % self.cfg.log_trees == 0 {
                let loss = y.iter().zip(&yhat).map(|(y, p)| (y - p) * (y - p)).sum::<f64>() / y.len() as f64;
                info!("round {:0?}, tree.nodes: {:1?}, loss: {:2?}", i, self.ensemble.trees()[i].len(), loss);
            }
        }

        if self.cfg.log_trees > 0 {
            info!(
                "Finished training a booster with {0} trees in {1} seconds.",
                self.ensemble.len(),
                start.elapsed().as_secs()
            );
        }
        Ok(())
    }

    /// Predict with the fitted model, the base score plus the sum of the trees.
    ///
    /// * `data` -  Features.
    /// * `parallel` -  Predict in parallel.
    pub fn predict(&self, data: &Matrix<f64>, parallel: bool) -> Result<Vec<f64>, CanopyError> {
        let mut preds = self.ensemble.predict_sum(data, parallel)?;
        preds.iter_mut().for_each(|p| *p += self.base_score);
        Ok(preds)
    }

    pub fn ensemble(&self) -> &TreeEnsemble {
        &self.ensemble
    }

    // Set methods for parameters

    /// Set the number of boosting rounds.
    pub fn set_n_trees(mut self, n_trees: usize) -> Self {
        self.cfg.n_trees = n_trees;
        self
    }

    /// Set the depth of the trees.
    pub fn set_max_depth(mut self, max_depth: usize) -> Self {
        self.cfg.max_depth = max_depth;
        self
    }

    /// Set the learning rate.
    pub fn set_learning_rate(mut self, learning_rate: f64) -> Self {
        self.cfg.learning_rate = learning_rate;
        self
    }

    pub fn set_min_observations_in_leaf(mut self, min_observations_in_leaf: usize) -> Self {
        self.cfg.min_observations_in_leaf = min_observations_in_leaf;
        self
    }

    pub fn set_binning(mut self, binning: BinningConfig) -> Self {
        self.cfg.binning = binning;
        self
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.cfg.seed = seed;
        self
    }

    /// Set the number of threads used during training.
    pub fn set_num_threads(mut self, num_threads: Option<usize>) -> Self {
        self.cfg.num_threads = num_threads;
        self
    }

    pub fn set_splitter(mut self, splitter: SplitterConfig) -> Self {
        self.cfg.splitter = splitter;
        self
    }

    /// Set the logging frequency (every N trees), `0` to disable logging.
    pub fn set_log_trees(mut self, log_trees: usize) -> Self {
        self.cfg.log_trees = log_trees;
        self
    }
}

impl ModelIO for GradientBoostedTrees {
    fn validate_loaded(&self) -> Result<(), CanopyError> {
        self.cfg
            .validate()
            .and_then(|_| self.ensemble.validate())
            .map_err(|e| CanopyError::UnableToRead(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::precision_round;

    fn mse(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(a, b)| (a - b) * (a - b)).sum::<f64>() / a.len() as f64
    }

    // Noiseless two step function of the first feature.
    fn step_data(n: usize) -> (Vec<f64>, Vec<f64>) {
        let mut x: Vec<f64> = (0..n).map(|i| (i % 40) as f64).collect();
        x.extend((0..n).map(|i| (i % 7) as f64));
        let y = x[..n]
            .iter()
            .map(|v| if *v < 10.0 { 1.0 } else if *v < 30.0 { 4.0 } else { 2.0 })
            .collect();
        (x, y)
    }

    #[test]
    fn test_boosting_reduces_loss() {
        let n = 400;
        let (x, y) = step_data(n);
        let m = Matrix::new(&x, n, 2);
        let mut losses = Vec::new();
        for n_trees in 1..=6 {
            let mut model = GradientBoostedTrees::default()
                .set_n_trees(n_trees)
                .set_max_depth(1)
                .set_learning_rate(0.5);
            model.fit(&m, &y).unwrap();
            losses.push(mse(&model.predict(&m, true).unwrap(), &y));
        }
        let base = mse(&vec![y.iter().sum::<f64>() / n as f64; n], &y);
        assert!(losses[0] < base);
        assert!(losses.windows(2).all(|w| w[1] < w[0]), "{:?}", losses);
    }

    #[test]
    fn test_boosting_fits_steps() {
        let n = 400;
        let (x, y) = step_data(n);
        let m = Matrix::new(&x, n, 2);
        let mut model = GradientBoostedTrees::default()
            .set_n_trees(50)
            .set_max_depth(2)
            .set_learning_rate(0.5);
        model.fit(&m, &y).unwrap();
        assert_eq!(model.ensemble().len(), 50);
        assert_eq!(model.ensemble().encoding, Encoding::Implicit);
        assert_eq!(model.ensemble().trees()[0].len(), 7);
        let preds = model.predict(&m, false).unwrap();
        assert!(preds.iter().zip(&y).all(|(p, y)| precision_round(*p, 3) == *y));
    }

    #[test]
    fn test_boosting_config() {
        assert!(BoostingConfig::default().validate().is_ok());
        for cfg in [
            BoostingConfig {
                max_depth: 0,
                ..Default::default()
            },
            BoostingConfig {
                learning_rate: 0.0,
                ..Default::default()
            },
            BoostingConfig {
                learning_rate: 1.5,
                ..Default::default()
            },
            BoostingConfig {
                n_trees: 0,
                ..Default::default()
            },
        ] {
            assert!(matches!(cfg.validate(), Err(CanopyError::IncorrectParameter(..))));
        }
        let (x, y) = step_data(20);
        let mut model = GradientBoostedTrees::default().set_max_depth(0);
        assert!(model.fit(&Matrix::new(&x, 20, 2), &y).is_err());
    }

    #[test]
    fn test_boosting_json() {
        let n = 100;
        let (x, y) = step_data(n);
        let m = Matrix::new(&x, n, 2);
        let mut model = GradientBoostedTrees::default().set_n_trees(5);
        model.fit(&m, &y).unwrap();
        let loaded = GradientBoostedTrees::from_json(&model.json_dump().unwrap()).unwrap();
        assert_eq!(loaded.cfg, model.cfg);
        assert_eq!(loaded.base_score, model.base_score);
        assert_eq!(loaded.predict(&m, true).unwrap(), model.predict(&m, true).unwrap());
    }
}
