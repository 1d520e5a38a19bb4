//! Ensemble
//!
//! An ordered, append only collection of tree tables, with the auxiliary
//! per node tables of every tree when the model version carries them.
use crate::config::ModelIO;
use crate::data::Matrix;
use crate::errors::CanopyError;
use crate::tree::encode::{EncodedTree, Encoding, TreeAux};
use crate::tree::traversal::{traverse_breadth_first, traverse_depth_first, TreeView, TreeVisitor};
use crate::utils::argmax;
use hashbrown::HashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Version tag of a serialized ensemble.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ModelVersion {
    /// Tree tables only.
    V1,
    /// Tree tables and per node impurity, sample count and class probability tables.
    #[default]
    V2,
}

impl ModelVersion {
    pub fn has_aux_tables(&self) -> bool {
        matches!(self, ModelVersion::V2)
    }
}

/// Learning task of an ensemble.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Task {
    Classification { n_classes: usize },
    Regression,
}

impl Task {
    /// Number of classes, `0` for regression.
    pub fn n_classes(&self) -> usize {
        match self {
            Task::Classification { n_classes } => *n_classes,
            Task::Regression => 0,
        }
    }

    pub fn is_classification(&self) -> bool {
        matches!(self, Task::Classification { .. })
    }
}

/// A collection of tree tables sharing a task and an encoding.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TreeEnsemble {
    pub version: ModelVersion,
    pub task: Task,
    /// Number of features of the rows the trees route.
    pub n_features: usize,
    pub encoding: Encoding,
    trees: Vec<EncodedTree>,
    /// One entry per tree for [`ModelVersion::V2`], empty otherwise.
    #[serde(default)]
    aux: Vec<TreeAux>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl TreeEnsemble {
    pub fn new(task: Task, n_features: usize, encoding: Encoding, version: ModelVersion) -> Self {
        TreeEnsemble {
            version,
            task,
            n_features,
            encoding,
            trees: Vec::new(),
            aux: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn n_classes(&self) -> usize {
        self.task.n_classes()
    }

    /// Number of trees.
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.trees.reserve(additional);
        if self.version.has_aux_tables() {
            self.aux.reserve(additional);
        }
    }

    /// Append a finished tree. Auxiliary tables are required by
    /// [`ModelVersion::V2`] and dropped by [`ModelVersion::V1`].
    pub fn push(&mut self, tree: EncodedTree, aux: Option<TreeAux>) -> Result<(), CanopyError> {
        if tree.encoding != self.encoding {
            return Err(CanopyError::incorrect_parameter(
                "tree",
                format!("a tree with the {:?} encoding", self.encoding),
                format!("{:?}", tree.encoding),
            ));
        }
        tree.validate()?;
        self.check_features(&tree)?;
        if self.version.has_aux_tables() {
            let aux = aux.ok_or_else(|| {
                CanopyError::incorrect_parameter("aux", "auxiliary tables for a V2 model", "none")
            })?;
            aux.check_len(tree.len(), self.n_classes())?;
            self.aux.push(aux);
        }
        self.trees.push(tree);
        Ok(())
    }

    fn check_features(&self, tree: &EncodedTree) -> Result<(), CanopyError> {
        match tree.nodes.iter().filter_map(|n| n.feature()).find(|f| *f >= self.n_features) {
            Some(f) => Err(CanopyError::incorrect_parameter(
                "feature_index",
                format!("a feature below {}", self.n_features),
                f,
            )),
            None => Ok(()),
        }
    }

    fn check_data(&self, data: &Matrix<f64>) -> Result<(), CanopyError> {
        Matrix::try_new(data.data, data.rows, data.cols)?;
        if data.cols < self.n_features {
            return Err(CanopyError::incorrect_parameter(
                "data",
                format!("at least {} columns", self.n_features),
                data.cols,
            ));
        }
        Ok(())
    }

    /// Remove every tree, keeping the task, encoding and metadata.
    pub fn clear(&mut self) {
        self.trees.clear();
        self.aux.clear();
    }

    pub(crate) fn tree(&self, i: usize) -> &EncodedTree {
        &self.trees[i]
    }

    pub(crate) fn trees(&self) -> &[EncodedTree] {
        &self.trees
    }

    /// A read only view of tree `tree_idx`.
    pub fn view(&self, tree_idx: usize) -> Result<TreeView<'_>, CanopyError> {
        let tree = self.trees.get(tree_idx).ok_or_else(|| {
            CanopyError::incorrect_parameter("tree_idx", format!("an index below {}", self.trees.len()), tree_idx)
        })?;
        Ok(TreeView {
            tree,
            aux: self.aux.get(tree_idx),
            n_classes: self.n_classes(),
        })
    }

    /// Walk tree `tree_idx` depth first, calling the visitor for every node.
    pub fn traverse_depth_first<V: TreeVisitor + ?Sized>(
        &self,
        tree_idx: usize,
        visitor: &mut V,
    ) -> Result<(), CanopyError> {
        traverse_depth_first(&self.view(tree_idx)?, visitor)
    }

    /// Walk tree `tree_idx` level by level, calling the visitor for every node.
    pub fn traverse_breadth_first<V: TreeVisitor + ?Sized>(
        &self,
        tree_idx: usize,
        visitor: &mut V,
    ) -> Result<(), CanopyError> {
        traverse_breadth_first(&self.view(tree_idx)?, visitor)
    }

    /// Add the class probabilities of the leaf `leaf` of tree `i` to `out`.
    fn add_leaf_probabilities(&self, i: usize, leaf: usize, out: &mut [f64]) {
        let n_classes = out.len();
        match self.aux.get(i).and_then(|a| a.probabilities(leaf, n_classes)) {
            Some(p) if p.iter().any(|v| *v > 0.0) => out.iter_mut().zip(p).for_each(|(o, p)| *o += p),
            _ => {
                let class = self.trees[i].nodes[leaf].left_child_or_class as usize;
                if let Some(o) = out.get_mut(class) {
                    *o += 1.0;
                }
            }
        }
    }

    // Mean class probabilities of a row, over every tree.
    fn predict_proba_row(&self, data: &Matrix<f64>, row: usize, out: &mut [f64]) {
        out.iter_mut().for_each(|o| *o = 0.0);
        if self.trees.is_empty() {
            return;
        }
        for (i, tree) in self.trees.iter().enumerate() {
            self.add_leaf_probabilities(i, tree.leaf_index_in(data, row), out);
        }
        let n = self.trees.len() as f64;
        out.iter_mut().for_each(|o| *o /= n);
    }

    // Majority vote for classification, mean response for regression.
    fn predict_row(&self, data: &Matrix<f64>, row: usize) -> f64 {
        match self.task {
            Task::Classification { n_classes } => {
                let mut votes = vec![0.0; n_classes];
                for tree in &self.trees {
                    let class = tree.nodes[tree.leaf_index_in(data, row)].left_child_or_class as usize;
                    if let Some(v) = votes.get_mut(class) {
                        *v += 1.0;
                    }
                }
                argmax(&votes) as f64
            }
            Task::Regression => {
                if self.trees.is_empty() {
                    return f64::NAN;
                }
                self.sum_row(data, row) / self.trees.len() as f64
            }
        }
    }

    /// Sum of the leaf values of a row over every tree.
    pub(crate) fn sum_row(&self, data: &Matrix<f64>, row: usize) -> f64 {
        self.trees
            .iter()
            .map(|t| t.nodes[t.leaf_index_in(data, row)].value)
            .sum()
    }

    /// Predict every row of a matrix. Fails if the matrix has fewer columns
    /// than the ensemble's features.
    ///
    /// * `data` -  Features.
    /// * `parallel` -  Predict in parallel.
    pub fn predict(&self, data: &Matrix<f64>, parallel: bool) -> Result<Vec<f64>, CanopyError> {
        self.check_data(data)?;
        Ok(self.map_rows(data, parallel, |r| self.predict_row(data, r)))
    }

    /// Sum of the leaf values of every row of a matrix.
    ///
    /// * `data` -  Features.
    /// * `parallel` -  Predict in parallel.
    pub fn predict_sum(&self, data: &Matrix<f64>, parallel: bool) -> Result<Vec<f64>, CanopyError> {
        self.check_data(data)?;
        Ok(self.map_rows(data, parallel, |r| self.sum_row(data, r)))
    }

    fn map_rows<F: Fn(usize) -> f64 + Sync + Send>(&self, data: &Matrix<f64>, parallel: bool, f: F) -> Vec<f64> {
        if parallel {
            (0..data.rows).into_par_iter().map(f).collect()
        } else {
            (0..data.rows).map(f).collect()
        }
    }

    /// Class probabilities of every row of a matrix, `rows x n_classes` row major.
    ///
    /// * `data` -  Features.
    /// * `parallel` -  Predict in parallel.
    pub fn predict_proba(&self, data: &Matrix<f64>, parallel: bool) -> Result<Vec<f64>, CanopyError> {
        self.check_data(data)?;
        let n_classes = self.n_classes().max(1);
        let mut out = vec![0.0; data.rows * n_classes];
        if parallel {
            out.par_chunks_mut(n_classes)
                .enumerate()
                .for_each(|(r, o)| self.predict_proba_row(data, r, o));
        } else {
            out.chunks_mut(n_classes)
                .enumerate()
                .for_each(|(r, o)| self.predict_proba_row(data, r, o));
        }
        Ok(out)
    }

    /// Insert metadata
    /// * `key` - String value for the metadata key.
    /// * `value` - value to assign to the metadata key.
    pub fn insert_metadata(&mut self, key: String, value: String) {
        self.metadata.insert(key, value);
    }

    /// Get Metadata
    /// * `key` - Get the associated value for the metadata key.
    pub fn get_metadata(&self, key: &str) -> Option<String> {
        self.metadata.get(key).cloned()
    }

    /// Check the version tag, the auxiliary tables and every tree table.
    pub fn validate(&self) -> Result<(), CanopyError> {
        let expected = if self.version.has_aux_tables() { self.trees.len() } else { 0 };
        if self.aux.len() != expected {
            return Err(CanopyError::incorrect_parameter(
                "aux",
                format!("{} auxiliary tables for a {:?} model", expected, self.version),
                self.aux.len(),
            ));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            if tree.encoding != self.encoding {
                return Err(CanopyError::incorrect_parameter(
                    "tree",
                    format!("a tree with the {:?} encoding", self.encoding),
                    format!("{:?}", tree.encoding),
                ));
            }
            tree.validate()?;
            self.check_features(tree)?;
            if let Some(aux) = self.aux.get(i) {
                aux.check_len(tree.len(), self.n_classes())?;
            }
        }
        Ok(())
    }
}

impl ModelIO for TreeEnsemble {
    fn validate_loaded(&self) -> Result<(), CanopyError> {
        self.validate().map_err(|e| CanopyError::UnableToRead(e.to_string()))
    }
}
