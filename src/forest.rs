//! Random forest
//!
//! Trains a forest of fully grown (or depth limited) trees over bootstrapped
//! or subsampled rows. The data is binned once, trees are trained in blocks
//! sized to a memory budget, the trees of a block in parallel, and every
//! finished tree is appended to the ensemble in tree order, after its
//! out-of-bag and importance bookkeeping.
use crate::arena::{HeapAllocator, NodeArena};
use crate::binning::{bin_matrix, BinnedData, BinningConfig};
use crate::config::{ForestConfig, ModelIO, VariableImportanceMode};
use crate::criterion::{class_ids, Gini, SplitCriterion, Variance};
use crate::data::Matrix;
use crate::ensemble::{ModelVersion, Task, TreeEnsemble};
use crate::errors::CanopyError;
use crate::grower::{GrowerParams, TreeGrower};
use crate::histogram::NodeHistogram;
use crate::oob::OobAccumulator;
use crate::partition::RowPartitioner;
use crate::sampler::sampler_for;
use crate::splitter::{SplitConstraints, SplitterConfig};
use crate::tree::encode::{encode_explicit, EncodedTree, Encoding, TreeAux};
use crate::tree::growable::GrowableTree;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::time::Instant;

/// A finished tree with its out-of-bag rows.
struct TrainedTree {
    tree: EncodedTree,
    aux: TreeAux,
    oob_rows: Vec<usize>,
}

/// Random forest classifier or regressor.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RandomForest {
    pub cfg: ForestConfig,
    ensemble: TreeEnsemble,
    #[serde(default)]
    oob_error: Option<f64>,
    #[serde(skip)]
    oob_error_per_observation: Option<Vec<f64>>,
    #[serde(default)]
    variable_importance: Option<Vec<f64>>,
}

impl Default for RandomForest {
    fn default() -> Self {
        RandomForest::new(ForestConfig::default())
    }
}

impl RandomForest {
    pub fn new(cfg: ForestConfig) -> Self {
        RandomForest {
            cfg,
            ensemble: TreeEnsemble::new(Task::Regression, 0, Encoding::Explicit, ModelVersion::V2),
            oob_error: None,
            oob_error_per_observation: None,
            variable_importance: None,
        }
    }

    /// Fit the forest.
    ///
    /// * `data` - Training features, one row per observation.
    /// * `y` - Class ids for classification, responses for regression.
    /// * `task` - Classification with its number of classes, or regression.
    pub fn fit(&mut self, data: &Matrix<f64>, y: &[f64], task: Task) -> Result<(), CanopyError> {
        self.fit_with_cancel(data, y, task, None)
    }

    /// Fit the forest, stopping with [`CanopyError::Cancelled`] once `cancel`
    /// is set. Trees of the blocks finished before stay in the ensemble.
    pub fn fit_with_cancel(
        &mut self,
        data: &Matrix<f64>,
        y: &[f64],
        task: Task,
        cancel: Option<&AtomicBool>,
    ) -> Result<(), CanopyError> {
        let start = Instant::now();
        self.cfg.validate()?;
        Matrix::try_new(data.data, data.rows, data.cols)?;
        if data.rows == 0 || data.cols == 0 {
            return Err(CanopyError::incorrect_parameter(
                "data",
                "at least one row and one column",
                format!("{} x {}", data.rows, data.cols),
            ));
        }
        if y.len() != data.rows {
            return Err(CanopyError::incorrect_parameter(
                "y",
                format!("{} labels", data.rows),
                y.len(),
            ));
        }

        let labels = match task {
            Task::Classification { n_classes } => {
                if n_classes < 2 {
                    return Err(CanopyError::incorrect_parameter("n_classes", "at least 2 classes", n_classes));
                }
                Some(class_ids(y, n_classes)?)
            }
            Task::Regression => {
                if let Some(v) = y.iter().find(|v| !v.is_finite()) {
                    return Err(CanopyError::incorrect_parameter("y", "finite responses", v));
                }
                None
            }
        };
        let gini;
        let variance;
        let criterion: &dyn SplitCriterion = match &labels {
            Some(labels) => {
                gini = Gini::new(labels, task.n_classes());
                &gini
            }
            None => {
                variance = Variance::new(y);
                &variance
            }
        };

        let binned = bin_matrix(data, &self.cfg.binning)?;
        if self.cfg.features_per_node > data.cols {
            warn!(
                "features_per_node of {} is larger than the {} features, using {}.",
                self.cfg.features_per_node, data.cols, data.cols
            );
        }
        let params = GrowerParams {
            max_depth: self.cfg.max_tree_depth,
            constraints: SplitConstraints {
                min_observations_in_leaf: self.cfg.min_observations_in_leaf,
                impurity_threshold: self.cfg.impurity_threshold,
            },
            features_per_node: self.cfg.resolve_features_per_node(data.cols, task.is_classification()),
            splitter: self.cfg.splitter,
        };
        let grower = TreeGrower::new(criterion, &binned, params);
        let block = self.block_size(&binned, criterion.stat_width());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.cfg.num_threads.unwrap_or(0))
            .build()
            .map_err(|e| CanopyError::incorrect_parameter("num_threads", "a number of threads rayon can start", e))?;

        self.ensemble = TreeEnsemble::new(task, data.cols, Encoding::Explicit, ModelVersion::V2);
        self.ensemble.reserve(self.cfg.tree_count);
        self.oob_error = None;
        self.oob_error_per_observation = None;
        self.variable_importance = None;

        let cfg = &self.cfg;
        let rows: Vec<usize> = (0..data.rows).collect();
        let mut oob = OobAccumulator::new(task, data.rows, data.cols);
        let mut permutation_rng = StdRng::seed_from_u64(cfg.seed);
        for block_start in (0..cfg.tree_count).step_by(block) {
            let block_end = (block_start + block).min(cfg.tree_count);
            let trained = pool.install(|| {
                (block_start..block_end)
                    .into_par_iter()
                    .map_init(
                        || (NodeArena::new(), RowPartitioner::new()),
                        |(arena, partitioner), t| train_tree(cfg, &grower, &rows, t, arena, partitioner, cancel),
                    )
                    .collect::<Result<Vec<_>, _>>()
            })?;
            for (t, trained) in (block_start..block_end).zip(trained) {
                match cfg.var_importance {
                    VariableImportanceMode::None => (),
                    VariableImportanceMode::Mdi => oob.add_impurity_decrease(&trained.tree, &trained.aux),
                    VariableImportanceMode::Mda | VariableImportanceMode::MdaScaled => oob.add_permutation_importance(
                        &trained.tree,
                        &trained.oob_rows,
                        data,
                        y,
                        &mut permutation_rng,
                    ),
                }
                if cfg.compute_oob_error || cfg.compute_oob_error_per_observation {
                    oob.add_tree(&trained.tree, &trained.oob_rows, data);
                }
                self.ensemble.push(trained.tree, Some(trained.aux))?;
                if cfg.log_trees > 0 && (t + 1) % cfg.log_trees == 0 {
                    info!("Trained {} of {} trees.", t + 1, cfg.tree_count);
                }
            }
        }

        if cfg.compute_oob_error {
            self.oob_error = oob.oob_error(y);
        }
        if cfg.compute_oob_error_per_observation {
            self.oob_error_per_observation = Some(oob.oob_error_per_observation(y));
        }
        self.variable_importance = match cfg.var_importance {
            VariableImportanceMode::None => None,
            VariableImportanceMode::Mdi => Some(oob.mdi()),
            VariableImportanceMode::Mda => Some(oob.mda(false)),
            VariableImportanceMode::MdaScaled => Some(oob.mda(true)),
        };

        if cfg.log_trees > 0 {
            info!(
                "Finished training a forest with {0} trees in {1} seconds.",
                self.ensemble.len(),
                start.elapsed().as_secs()
            );
        }
        Ok(())
    }

    // Number of trees whose scratch buffers fit the memory budget together.
    fn block_size(&self, binned: &BinnedData, stat_width: usize) -> usize {
        let features: Vec<usize> = (0..binned.cols).collect();
        let per_tree = 3 * binned.rows * std::mem::size_of::<usize>()
            + NodeHistogram::size_in_bytes(&features, &binned.n_bins_per_feature(), stat_width);
        if per_tree > self.cfg.max_block_memory_bytes {
            warn!(
                "A single tree needs about {} bytes of scratch memory, more than the budget of {} bytes. Training one tree at a time.",
                per_tree, self.cfg.max_block_memory_bytes
            );
            return 1;
        }
        (self.cfg.max_block_memory_bytes / per_tree.max(1)).clamp(1, self.cfg.tree_count)
    }

    /// Predict with the fitted forest, the majority vote for classification and
    /// the mean response for regression.
    ///
    /// * `data` -  Features.
    /// * `parallel` -  Predict in parallel.
    pub fn predict(&self, data: &Matrix<f64>, parallel: bool) -> Result<Vec<f64>, CanopyError> {
        self.ensemble.predict(data, parallel)
    }

    /// Mean class probabilities, `rows x n_classes` row major.
    pub fn predict_proba(&self, data: &Matrix<f64>, parallel: bool) -> Result<Vec<f64>, CanopyError> {
        self.ensemble.predict_proba(data, parallel)
    }

    pub fn ensemble(&self) -> &TreeEnsemble {
        &self.ensemble
    }

    /// Out-of-bag error, `None` unless requested or when no row was ever out of bag.
    pub fn oob_error(&self) -> Option<f64> {
        self.oob_error
    }

    /// Out-of-bag error of every training row, `NaN` for rows never out of bag.
    pub fn oob_error_per_observation(&self) -> Option<&[f64]> {
        self.oob_error_per_observation.as_deref()
    }

    /// Importance of every feature, for the configured importance mode.
    pub fn variable_importance(&self) -> Option<&[f64]> {
        self.variable_importance.as_deref()
    }

    // Set methods for parameters

    /// Set the number of trees.
    pub fn set_tree_count(mut self, tree_count: usize) -> Self {
        self.cfg.tree_count = tree_count;
        self
    }

    /// Set the number of candidate features per node, `0` for the default.
    pub fn set_features_per_node(mut self, features_per_node: usize) -> Self {
        self.cfg.features_per_node = features_per_node;
        self
    }

    /// Set the maximum depth of the trees, `0` for no limit.
    pub fn set_max_tree_depth(mut self, max_tree_depth: usize) -> Self {
        self.cfg.max_tree_depth = max_tree_depth;
        self
    }

    pub fn set_min_observations_in_leaf(mut self, min_observations_in_leaf: usize) -> Self {
        self.cfg.min_observations_in_leaf = min_observations_in_leaf;
        self
    }

    pub fn set_impurity_threshold(mut self, impurity_threshold: f64) -> Self {
        self.cfg.impurity_threshold = impurity_threshold;
        self
    }

    /// Set the fraction of the rows drawn for every tree.
    pub fn set_observations_per_tree_fraction(mut self, fraction: f64) -> Self {
        self.cfg.observations_per_tree_fraction = fraction;
        self
    }

    /// Draw the rows of every tree with replacement.
    pub fn set_bootstrap(mut self, bootstrap: bool) -> Self {
        self.cfg.bootstrap = bootstrap;
        self
    }

    pub fn set_var_importance(mut self, var_importance: VariableImportanceMode) -> Self {
        self.cfg.var_importance = var_importance;
        self
    }

    pub fn set_compute_oob_error(mut self, compute_oob_error: bool) -> Self {
        self.cfg.compute_oob_error = compute_oob_error;
        self
    }

    pub fn set_compute_oob_error_per_observation(mut self, compute: bool) -> Self {
        self.cfg.compute_oob_error_per_observation = compute;
        self
    }

    /// Set the binning of the features.
    pub fn set_binning(mut self, binning: BinningConfig) -> Self {
        self.cfg.binning = binning;
        self
    }

    /// Set the seed for random number generation.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.cfg.seed = seed;
        self
    }

    /// Set the number of threads used during training.
    pub fn set_num_threads(mut self, num_threads: Option<usize>) -> Self {
        self.cfg.num_threads = num_threads;
        self
    }

    /// Set the scratch memory budget of a block of trees trained together.
    pub fn set_max_block_memory_bytes(mut self, max_block_memory_bytes: usize) -> Self {
        self.cfg.max_block_memory_bytes = max_block_memory_bytes;
        self
    }

    pub fn set_splitter(mut self, splitter: SplitterConfig) -> Self {
        self.cfg.splitter = splitter;
        self
    }

    /// Collapse splits whose two leaves predict the same value.
    pub fn set_prune_redundant_splits(mut self, prune: bool) -> Self {
        self.cfg.prune_redundant_splits = prune;
        self
    }

    /// Set the logging frequency (every N trees), `0` to disable logging.
    pub fn set_log_trees(mut self, log_trees: usize) -> Self {
        self.cfg.log_trees = log_trees;
        self
    }
}

/// Sample the rows of tree `t`, grow and encode it.
fn train_tree<C: SplitCriterion + ?Sized>(
    cfg: &ForestConfig,
    grower: &TreeGrower<C>,
    rows: &[usize],
    t: usize,
    arena: &mut NodeArena,
    partitioner: &mut RowPartitioner,
    cancel: Option<&AtomicBool>,
) -> Result<TrainedTree, CanopyError> {
    let mut rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(t as u64));
    let (sample, oob_rows) = sampler_for(cfg.bootstrap, cfg.observations_per_tree_fraction).sample(&mut rng, rows);
    let (tree, aux) = if cfg.prune_redundant_splits {
        let mut tree = grower.grow(&sample, &mut rng, HeapAllocator::new(), partitioner, cancel)?;
        tree.collapse_redundant_splits()?;
        encode_explicit(&tree)?
    } else {
        let mut tree = GrowableTree::new(std::mem::take(arena), grower.n_classes());
        let encoded = grower
            .grow_into(&mut tree, &sample, &mut rng, partitioner, cancel)
            .and_then(|_| encode_explicit(&tree));
        *arena = tree.into_allocator();
        encoded?
    };
    Ok(TrainedTree { tree, aux, oob_rows })
}

impl ModelIO for RandomForest {
    fn validate_loaded(&self) -> Result<(), CanopyError> {
        self.cfg
            .validate()
            .and_then(|_| self.ensemble.validate())
            .map_err(|e| CanopyError::UnableToRead(e.to_string()))
    }
}
