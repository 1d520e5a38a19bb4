//! Configuration
//!
//! Training configuration of the forest trainer, and the json IO shared by
//! configurations and models.
use crate::binning::BinningConfig;
use crate::constants::MAX_BLOCK_MEMORY_BYTES;
use crate::errors::CanopyError;
use crate::splitter::SplitterConfig;
use crate::utils::{validate_float_parameter, validate_min_parameter, validate_positive_float_parameter};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Method to calculate variable importance.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum VariableImportanceMode {
    #[default]
    None,
    /// Mean decrease of impurity, from the training splits.
    Mdi,
    /// Mean decrease of accuracy, from permuting features of out-of-bag rows.
    Mda,
    /// Mean decrease of accuracy divided by its standard error.
    MdaScaled,
}

fn default_tree_count() -> usize {
    100
}
fn default_min_observations_in_leaf() -> usize {
    1
}
fn default_observations_per_tree_fraction() -> f64 {
    1.0
}
fn default_bootstrap() -> bool {
    true
}
fn default_max_block_memory_bytes() -> usize {
    MAX_BLOCK_MEMORY_BYTES
}
fn default_log_trees() -> usize {
    0
}

/// Configuration of the random forest trainer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ForestConfig {
    /// Number of trees.
    #[serde(default = "default_tree_count")]
    pub tree_count: usize,
    /// Candidate features per node, `0` picks sqrt(p) for classification and p / 3 for regression.
    #[serde(default)]
    pub features_per_node: usize,
    /// Nodes at this depth are not split, `0` for no limit.
    #[serde(default)]
    pub max_tree_depth: usize,
    /// Smallest number of rows of a leaf.
    #[serde(default = "default_min_observations_in_leaf")]
    pub min_observations_in_leaf: usize,
    /// Nodes with a lower impurity are not split.
    #[serde(default)]
    pub impurity_threshold: f64,
    /// Rows drawn for every tree, as a fraction of the training rows.
    #[serde(default = "default_observations_per_tree_fraction")]
    pub observations_per_tree_fraction: f64,
    /// Draw rows with replacement.
    #[serde(default = "default_bootstrap")]
    pub bootstrap: bool,
    #[serde(default)]
    pub var_importance: VariableImportanceMode,
    /// Compute the out-of-bag error of the forest.
    #[serde(default)]
    pub compute_oob_error: bool,
    /// Compute the out-of-bag error of every training row.
    #[serde(default)]
    pub compute_oob_error_per_observation: bool,
    #[serde(default)]
    pub binning: BinningConfig,
    /// Seed for random number generation.
    #[serde(default)]
    pub seed: u64,
    /// Number of threads for parallel tasks.
    #[serde(default)]
    pub num_threads: Option<usize>,
    /// Memory budget of the scratch buffers of the trees trained together.
    #[serde(default = "default_max_block_memory_bytes")]
    pub max_block_memory_bytes: usize,
    #[serde(default)]
    pub splitter: SplitterConfig,
    /// Collapse splits whose two leaves predict the same value.
    #[serde(default)]
    pub prune_redundant_splits: bool,
    /// Logging frequency (every N trees).
    #[serde(default = "default_log_trees")]
    pub log_trees: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        ForestConfig {
            tree_count: default_tree_count(),
            features_per_node: 0,
            max_tree_depth: 0,
            min_observations_in_leaf: default_min_observations_in_leaf(),
            impurity_threshold: 0.0,
            observations_per_tree_fraction: default_observations_per_tree_fraction(),
            bootstrap: default_bootstrap(),
            var_importance: VariableImportanceMode::None,
            compute_oob_error: false,
            compute_oob_error_per_observation: false,
            binning: BinningConfig::default(),
            seed: 0,
            num_threads: None,
            max_block_memory_bytes: default_max_block_memory_bytes(),
            splitter: SplitterConfig::default(),
            prune_redundant_splits: false,
            log_trees: default_log_trees(),
        }
    }
}

impl ForestConfig {
    pub fn validate(&self) -> Result<(), CanopyError> {
        validate_min_parameter(self.tree_count, 1, "tree_count")?;
        validate_min_parameter(self.min_observations_in_leaf, 1, "min_observations_in_leaf")?;
        validate_positive_float_parameter(self.impurity_threshold, "impurity_threshold")?;
        validate_float_parameter(
            self.observations_per_tree_fraction,
            f64::MIN_POSITIVE,
            1.0,
            "observations_per_tree_fraction",
        )?;
        if let Some(n) = self.num_threads {
            validate_min_parameter(n, 1, "num_threads")?;
        }
        self.binning.validate()?;
        self.splitter.validate()?;
        Ok(())
    }

    /// Candidate features per node for `n_features` features.
    pub fn resolve_features_per_node(&self, n_features: usize, classification: bool) -> usize {
        if self.features_per_node > 0 {
            return self.features_per_node.min(n_features);
        }
        let k = if classification {
            (n_features as f64).sqrt() as usize
        } else {
            n_features / 3
        };
        k.clamp(1, n_features.max(1))
    }
}

/// Json IO of configurations and models.
pub trait ModelIO: Serialize + DeserializeOwned + Sized {
    /// Check a freshly deserialized object.
    fn validate_loaded(&self) -> Result<(), CanopyError> {
        Ok(())
    }

    /// Save as a json object to a file.
    ///
    /// * `path` - Path to save to.
    fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<(), CanopyError> {
        fs::write(path, self.json_dump()?).map_err(|e| CanopyError::UnableToWrite(e.to_string()))
    }

    /// Dump as a json object
    fn json_dump(&self) -> Result<String, CanopyError> {
        serde_json::to_string(self).map_err(|e| CanopyError::UnableToWrite(e.to_string()))
    }

    /// Load from a json string
    ///
    /// * `json_str` - String object, which can be serialized to json.
    fn from_json(json_str: &str) -> Result<Self, CanopyError> {
        let loaded = serde_json::from_str::<Self>(json_str).map_err(|e| CanopyError::UnableToRead(e.to_string()))?;
        loaded.validate_loaded()?;
        Ok(loaded)
    }

    /// Load from a path to a json object.
    ///
    /// * `path` - Path to load from.
    fn load_model<P: AsRef<Path>>(path: P) -> Result<Self, CanopyError> {
        let json_str = fs::read_to_string(path).map_err(|e| CanopyError::UnableToRead(e.to_string()))?;
        Self::from_json(&json_str)
    }
}

impl ModelIO for ForestConfig {
    fn validate_loaded(&self) -> Result<(), CanopyError> {
        self.validate()
            .map_err(|e| CanopyError::UnableToRead(e.to_string()))
    }
}
