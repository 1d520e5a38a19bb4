//! Builder
//!
//! Build an ensemble node by node from trees computed elsewhere. Every tree is
//! a fixed capacity table; the first child added to a split node reserves a
//! pair of consecutive free slots after it, so that the right child always
//! sits next to the left one, whichever of the two is added first.
use crate::arena::HeapAllocator;
use crate::ensemble::{ModelVersion, Task, TreeEnsemble};
use crate::errors::CanopyError;
use crate::node::{LeafNode, NodeId, SplitNode};
use crate::tree::encode::{encode, Encoding};
use crate::tree::growable::GrowableTree;
use crate::utils::class_label;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Free,
    /// Held for a child whose sibling was added already.
    Reserved,
    Split {
        feature: usize,
        threshold: f64,
        default_left: bool,
        cover: f64,
        /// First slot of the reserved children pair.
        left: Option<usize>,
    },
    Leaf {
        value: f64,
        cover: f64,
        class_counts: Option<Vec<f64>>,
    },
}

#[derive(Debug, Clone)]
struct BuilderTree {
    slots: Vec<Slot>,
}

impl BuilderTree {
    fn new(capacity: usize) -> Self {
        BuilderTree {
            slots: vec![Slot::Free; capacity],
        }
    }

    // Slot the node goes to, reserving the children pair of the parent if needed.
    fn claim(&mut self, parent: Option<usize>, position: usize) -> Result<usize, CanopyError> {
        if position > 1 {
            return Err(CanopyError::incorrect_parameter("position", "0 or 1", position));
        }
        let p = match parent {
            None => {
                return match self.slots.first() {
                    Some(Slot::Free) => Ok(0),
                    _ => Err(CanopyError::incorrect_parameter(
                        "parent",
                        "a parent node, the root already exists",
                        "none",
                    )),
                };
            }
            Some(p) => p,
        };
        let left = match self.slots.get(p) {
            Some(Slot::Split { left, .. }) => *left,
            Some(Slot::Leaf { .. }) => {
                return Err(CanopyError::incorrect_parameter(
                    "parent",
                    "a split node",
                    format!("leaf node {}", p),
                ))
            }
            Some(_) => return Err(CanopyError::NullPointer(format!("no node was added at {}", p))),
            None => {
                return Err(CanopyError::incorrect_parameter(
                    "parent",
                    format!("a node id below {}", self.slots.len()),
                    p,
                ))
            }
        };
        let left = match left {
            Some(l) => l,
            None => {
                let l = (p + 1..self.slots.len().saturating_sub(1))
                    .find(|k| self.slots[*k] == Slot::Free && self.slots[k + 1] == Slot::Free)
                    .ok_or_else(|| {
                        CanopyError::incorrect_parameter(
                            "tree",
                            "a tree with two free node slots",
                            format!("a full tree of {} nodes", self.slots.len()),
                        )
                    })?;
                self.slots[l] = Slot::Reserved;
                self.slots[l + 1] = Slot::Reserved;
                if let Some(Slot::Split { left, .. }) = self.slots.get_mut(p) {
                    *left = Some(l);
                }
                l
            }
        };
        let slot = left + position;
        if self.slots[slot] != Slot::Reserved {
            return Err(CanopyError::incorrect_parameter(
                "position",
                "a free child position",
                format!("position {} of node {} which is taken", position, p),
            ));
        }
        Ok(slot)
    }

    fn node_mut(&mut self, node: usize) -> Result<&mut Slot, CanopyError> {
        match self.slots.get_mut(node) {
            Some(s @ (Slot::Split { .. } | Slot::Leaf { .. })) => Ok(s),
            _ => Err(CanopyError::NullPointer(format!("no node was added at {}", node))),
        }
    }

    // Rebuild the tree in memory, failing on unfilled slots.
    fn to_growable(&self, n_classes: usize) -> Result<GrowableTree<HeapAllocator>, CanopyError> {
        if matches!(self.slots.first(), None | Some(Slot::Free)) {
            return Err(CanopyError::incorrect_parameter("tree", "a tree with a root", "an empty tree"));
        }
        let mut tree = GrowableTree::new(HeapAllocator::new(), n_classes);
        let mut queue = VecDeque::from([(0usize, None::<(NodeId, usize)>)]);
        while let Some((i, parent)) = queue.pop_front() {
            match &self.slots[i] {
                Slot::Split {
                    feature,
                    threshold,
                    default_left,
                    cover,
                    left,
                } => {
                    let l = left.ok_or_else(|| {
                        CanopyError::incorrect_parameter("tree", "split nodes with two children", format!("node {}", i))
                    })?;
                    let id = tree.add_split(
                        parent,
                        SplitNode {
                            feature: *feature,
                            threshold: *threshold,
                            default_left: *default_left,
                            sample_count: *cover as u64,
                            cover: *cover,
                            ..Default::default()
                        },
                    )?;
                    queue.push_back((l, Some((id, 0))));
                    queue.push_back((l + 1, Some((id, 1))));
                }
                Slot::Leaf {
                    value,
                    cover,
                    class_counts,
                } => {
                    let leaf = LeafNode {
                        value: *value,
                        sample_count: *cover as u64,
                        cover: *cover,
                        ..Default::default()
                    };
                    tree.add_leaf(parent, leaf, class_counts.as_deref())?;
                }
                Slot::Free | Slot::Reserved => {
                    return Err(CanopyError::incorrect_parameter(
                        "tree",
                        "every reserved child slot to be filled",
                        format!("an empty slot {}", i),
                    ))
                }
            }
        }
        Ok(tree)
    }
}

/// Incremental construction of a [`TreeEnsemble`].
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    task: Task,
    n_features: usize,
    encoding: Encoding,
    version: ModelVersion,
    tree_count: usize,
    trees: Vec<BuilderTree>,
}

impl ModelBuilder {
    /// Start a model of at most `tree_count` trees over `n_features` features.
    pub fn new(tree_count: usize, n_features: usize, task: Task) -> Result<Self, CanopyError> {
        if let Task::Classification { n_classes } = task {
            if n_classes < 2 {
                return Err(CanopyError::incorrect_parameter("n_classes", "at least 2 classes", n_classes));
            }
        }
        Ok(ModelBuilder {
            task,
            n_features,
            encoding: Encoding::Explicit,
            version: ModelVersion::V2,
            tree_count,
            trees: Vec::with_capacity(tree_count),
        })
    }

    /// Set the layout of the built tree tables.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the version of the built model.
    pub fn with_version(mut self, version: ModelVersion) -> Self {
        self.version = version;
        self
    }

    /// Set the number of trees of the model.
    pub fn reserve_ensemble(&mut self, tree_count: usize) -> Result<(), CanopyError> {
        if tree_count < self.trees.len() {
            return Err(CanopyError::incorrect_parameter(
                "tree_count",
                format!("at least the {} trees already created", self.trees.len()),
                tree_count,
            ));
        }
        self.tree_count = tree_count;
        self.trees.reserve(tree_count - self.trees.len());
        Ok(())
    }

    /// Start a new tree of at most `node_capacity` nodes, returning its id.
    pub fn create_tree(&mut self, node_capacity: usize) -> Result<usize, CanopyError> {
        if self.trees.len() >= self.tree_count {
            return Err(CanopyError::incorrect_parameter(
                "tree_count",
                format!("at most {} trees", self.tree_count),
                self.trees.len() + 1,
            ));
        }
        if node_capacity == 0 {
            return Err(CanopyError::incorrect_parameter("node_capacity", "at least one node", 0));
        }
        self.trees.push(BuilderTree::new(node_capacity));
        Ok(self.trees.len() - 1)
    }

    fn tree_mut(&mut self, tree_id: usize) -> Result<&mut BuilderTree, CanopyError> {
        let n = self.trees.len();
        self.trees
            .get_mut(tree_id)
            .ok_or_else(|| CanopyError::incorrect_parameter("tree_id", format!("a tree id below {}", n), tree_id))
    }

    /// Add a split node routing `feature <= threshold` to the left, returning its id.
    ///
    /// * `tree_id` - Tree returned by [`ModelBuilder::create_tree`].
    /// * `parent` - Parent split node, `None` for the root.
    /// * `position` - `0` for the left child, `1` for the right child.
    /// * `feature` - Split feature.
    /// * `threshold` - Split threshold.
    pub fn add_split_node(
        &mut self,
        tree_id: usize,
        parent: Option<usize>,
        position: usize,
        feature: usize,
        threshold: f64,
    ) -> Result<usize, CanopyError> {
        if feature >= self.n_features {
            return Err(CanopyError::incorrect_parameter(
                "feature",
                format!("a feature index below {}", self.n_features),
                feature,
            ));
        }
        let tree = self.tree_mut(tree_id)?;
        let slot = tree.claim(parent, position)?;
        tree.slots[slot] = Slot::Split {
            feature,
            threshold,
            default_left: false,
            cover: 0.0,
            left: None,
        };
        Ok(slot)
    }

    /// Add a leaf node, returning its id. For classification the value is the class id.
    pub fn add_leaf_node(
        &mut self,
        tree_id: usize,
        parent: Option<usize>,
        position: usize,
        value: f64,
    ) -> Result<usize, CanopyError> {
        let class_counts = match self.task {
            Task::Classification { n_classes } => {
                let class = class_label(value, n_classes).ok_or_else(|| {
                    CanopyError::incorrect_parameter("value", format!("a class id below {}", n_classes), value)
                })?;
                let mut counts = vec![0.0; n_classes];
                counts[class] = 1.0;
                Some(counts)
            }
            Task::Regression => None,
        };
        self.add_leaf(tree_id, parent, position, value, class_counts)
    }

    /// Add a classification leaf with its class probabilities, returning its id.
    pub fn add_leaf_node_with_probabilities(
        &mut self,
        tree_id: usize,
        parent: Option<usize>,
        position: usize,
        class: usize,
        probabilities: &[f64],
    ) -> Result<usize, CanopyError> {
        let n_classes = match self.task {
            Task::Classification { n_classes } => n_classes,
            Task::Regression => {
                return Err(CanopyError::incorrect_parameter(
                    "task",
                    "a classification model",
                    "a regression model",
                ))
            }
        };
        if class >= n_classes {
            return Err(CanopyError::incorrect_parameter(
                "class",
                format!("a class id below {}", n_classes),
                class,
            ));
        }
        if probabilities.len() != n_classes {
            return Err(CanopyError::MemoryCopyFailed(format!(
                "{} class probabilities into a model of {} classes",
                probabilities.len(),
                n_classes
            )));
        }
        self.add_leaf(tree_id, parent, position, class as f64, Some(probabilities.to_vec()))
    }

    fn add_leaf(
        &mut self,
        tree_id: usize,
        parent: Option<usize>,
        position: usize,
        value: f64,
        class_counts: Option<Vec<f64>>,
    ) -> Result<usize, CanopyError> {
        let tree = self.tree_mut(tree_id)?;
        let slot = tree.claim(parent, position)?;
        tree.slots[slot] = Slot::Leaf {
            value,
            cover: 0.0,
            class_counts,
        };
        Ok(slot)
    }

    /// Route missing values of a split node to the left.
    pub fn set_default_left(&mut self, tree_id: usize, node: usize, default_left: bool) -> Result<(), CanopyError> {
        match self.tree_mut(tree_id)?.node_mut(node)? {
            Slot::Split { default_left: d, .. } => {
                *d = default_left;
                Ok(())
            }
            _ => Err(CanopyError::incorrect_parameter("node", "a split node", format!("leaf node {}", node))),
        }
    }

    /// Set the number of training samples that reached a node.
    pub fn set_cover(&mut self, tree_id: usize, node: usize, cover: f64) -> Result<(), CanopyError> {
        match self.tree_mut(tree_id)?.node_mut(node)? {
            Slot::Split { cover: c, .. } | Slot::Leaf { cover: c, .. } => {
                *c = cover;
                Ok(())
            }
            _ => Err(CanopyError::NullPointer(format!("no node was added at {}", node))),
        }
    }

    /// Number of trees created so far.
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Encode every tree and collect them into an ensemble.
    pub fn build(self) -> Result<TreeEnsemble, CanopyError> {
        let n_classes = self.task.n_classes();
        let mut ensemble = TreeEnsemble::new(self.task, self.n_features, self.encoding, self.version);
        ensemble.reserve(self.trees.len());
        for tree in &self.trees {
            let (table, aux) = encode(&tree.to_growable(n_classes)?, self.encoding)?;
            ensemble.push(table, Some(aux))?;
        }
        Ok(ensemble)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Matrix;
    use crate::tree::traversal::{LeafNodeDescriptor, SplitNodeDescriptor, TreeVisitor};

    #[derive(Default)]
    struct Levels(Vec<(usize, bool)>);

    impl TreeVisitor for Levels {
        fn on_split_node(&mut self, node: &SplitNodeDescriptor) -> bool {
            self.0.push((node.level, true));
            true
        }
        fn on_leaf_node(&mut self, node: &LeafNodeDescriptor) -> bool {
            self.0.push((node.level, false));
            true
        }
    }

    #[test]
    fn test_right_child_first() {
        let mut b = ModelBuilder::new(1, 1, Task::Regression).unwrap();
        let t = b.create_tree(3).unwrap();
        let root = b.add_split_node(t, None, 0, 0, 0.5).unwrap();
        let right = b.add_leaf_node(t, Some(root), 1, 2.0).unwrap();
        assert_eq!(right, 2);
        let left = b.add_leaf_node(t, Some(root), 0, 1.0).unwrap();
        assert_eq!(left, 1);
        let e = b.build().unwrap();
        let x = vec![0.0, 1.0];
        let m = Matrix::new(&x, 2, 1);
        assert_eq!(e.predict(&m, false).unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_full_tree() {
        let mut b = ModelBuilder::new(1, 2, Task::Regression).unwrap();
        let t = b.create_tree(3).unwrap();
        let root = b.add_split_node(t, None, 0, 0, 0.5).unwrap();
        let a = b.add_split_node(t, Some(root), 0, 1, 0.5).unwrap();
        assert!(matches!(
            b.add_leaf_node(t, Some(a), 0, 1.0),
            Err(CanopyError::IncorrectParameter(..))
        ));
        // The failed call left the tree as it was.
        b.add_leaf_node(t, Some(root), 1, 3.0).unwrap();
        assert!(b.add_leaf_node(t, Some(root), 1, 3.0).is_err());
    }

    #[test]
    fn test_invalid_calls() {
        let mut b = ModelBuilder::new(1, 1, Task::Classification { n_classes: 2 }).unwrap();
        let t = b.create_tree(7).unwrap();
        assert!(b.create_tree(7).is_err());
        assert!(matches!(
            b.add_leaf_node(5, None, 0, 0.0),
            Err(CanopyError::IncorrectParameter(..))
        ));
        let root = b.add_split_node(t, None, 0, 0, 0.5).unwrap();
        assert!(b.add_split_node(t, None, 0, 0, 0.5).is_err());
        assert!(matches!(
            b.add_leaf_node(t, Some(root), 2, 0.0),
            Err(CanopyError::IncorrectParameter(..))
        ));
        assert!(matches!(
            b.add_leaf_node(t, Some(root), 0, 2.0),
            Err(CanopyError::IncorrectParameter(..))
        ));
        let leaf = b.add_leaf_node(t, Some(root), 0, 1.0).unwrap();
        assert!(matches!(
            b.add_leaf_node(t, Some(leaf), 0, 1.0),
            Err(CanopyError::IncorrectParameter(..))
        ));
        assert!(matches!(
            b.add_leaf_node(t, Some(4), 0, 1.0),
            Err(CanopyError::NullPointer(_))
        ));
        assert!(matches!(
            b.add_leaf_node_with_probabilities(t, Some(root), 1, 0, &[1.0]),
            Err(CanopyError::MemoryCopyFailed(_))
        ));
        // The right child is still missing.
        assert!(b.clone().build().is_err());
        b.add_leaf_node_with_probabilities(t, Some(root), 1, 0, &[0.75, 0.25])
            .unwrap();
        assert!(b.build().is_ok());
    }

    #[test]
    fn test_build_matches_structure() {
        let mut b = ModelBuilder::new(2, 2, Task::Classification { n_classes: 2 })
            .unwrap()
            .with_encoding(Encoding::Implicit);
        b.reserve_ensemble(2).unwrap();
        for _ in 0..2 {
            let t = b.create_tree(9).unwrap();
            let root = b.add_split_node(t, None, 0, 0, 1.0).unwrap();
            b.set_default_left(t, root, true).unwrap();
            b.set_cover(t, root, 10.0).unwrap();
            let r = b.add_split_node(t, Some(root), 1, 1, 2.0).unwrap();
            b.add_leaf_node(t, Some(root), 0, 0.0).unwrap();
            b.add_leaf_node(t, Some(r), 0, 1.0).unwrap();
            b.add_leaf_node_with_probabilities(t, Some(r), 1, 0, &[0.6, 0.4])
                .unwrap();
            assert!(b.set_default_left(t, 1, true).is_err());
        }
        let e = b.build().unwrap();
        assert_eq!(e.len(), 2);
        assert_eq!(e.encoding, Encoding::Implicit);
        let mut levels = Levels::default();
        e.traverse_breadth_first(0, &mut levels).unwrap();
        assert_eq!(levels.0, vec![(0, true), (1, false), (1, true), (2, false), (2, false)]);

        let x = vec![f64::NAN, 5.0, 0.0, 3.0];
        let m = Matrix::new(&x, 2, 2);
        assert_eq!(e.predict(&m, false).unwrap(), vec![0.0, 0.0]);
        let proba = e.predict_proba(&m, false).unwrap();
        assert_eq!(&proba[2..4], &[0.6, 0.4]);
    }

    #[test]
    fn test_feature_beyond_model_width() {
        let mut b = ModelBuilder::new(1, 1, Task::Regression).unwrap();
        let t = b.create_tree(3).unwrap();
        assert!(matches!(
            b.add_split_node(t, None, 0, 5, 0.5),
            Err(CanopyError::IncorrectParameter(..))
        ));
        let root = b.add_split_node(t, None, 0, 0, 0.5).unwrap();
        b.add_leaf_node(t, Some(root), 0, 1.0).unwrap();
        b.add_leaf_node(t, Some(root), 1, 2.0).unwrap();
        let e = b.build().unwrap();
        assert_eq!(e.n_features, 1);
        let narrow: Vec<f64> = Vec::new();
        assert!(matches!(
            e.predict(&Matrix::new(&narrow, 2, 0), false),
            Err(CanopyError::IncorrectParameter(..))
        ));
    }
}
