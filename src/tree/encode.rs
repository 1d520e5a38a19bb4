//! Encode
//!
//! Conversion of a finished [`GrowableTree`] into the flat tree table, and back.
//!
//! Two layouts are supported. The explicit layout numbers nodes in level order
//! and stores the row of the left child in every split, the right child being
//! the next row. The implicit layout places node `i`'s children at `2i + 1` and
//! `2i + 2` of a complete binary tree, padding branches that stop early with
//! dummy leaves.
use crate::arena::{HeapAllocator, NodeAllocator};
use crate::constants::MAX_IMPLICIT_LEVEL;
use crate::data::Matrix;
use crate::errors::CanopyError;
use crate::node::{FlatNode, LeafNode, SplitNode, TreeNode};
use crate::tree::growable::GrowableTree;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Layout of a tree table.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Splits store the row of their left child, the right child follows it.
    #[default]
    Explicit,
    /// Complete binary tree, children of `i` at `2i + 1` and `2i + 2`.
    Implicit,
}

/// A flat, index addressable tree.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct EncodedTree {
    pub encoding: Encoding,
    pub nodes: Vec<FlatNode>,
}

/// Per node tables stored alongside a tree table.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct TreeAux {
    pub impurities: Vec<f64>,
    pub sample_counts: Vec<u64>,
    /// `n_nodes x n_classes` row major, filled for leaves of classification trees.
    pub probabilities: Vec<f64>,
}

impl TreeAux {
    pub fn zeros(n_nodes: usize, n_classes: usize) -> Self {
        TreeAux {
            impurities: vec![0.0; n_nodes],
            sample_counts: vec![0; n_nodes],
            probabilities: vec![0.0; n_nodes * n_classes],
        }
    }

    /// Class probabilities of node `i`.
    pub fn probabilities(&self, i: usize, n_classes: usize) -> Option<&[f64]> {
        self.probabilities.get(i * n_classes..(i + 1) * n_classes)
    }

    /// Check every table has one entry per node.
    pub fn check_len(&self, n_nodes: usize, n_classes: usize) -> Result<(), CanopyError> {
        if self.impurities.len() != n_nodes
            || self.sample_counts.len() != n_nodes
            || self.probabilities.len() != n_nodes * n_classes
        {
            return Err(CanopyError::MemoryCopyFailed(format!(
                "auxiliary tables of sizes ({}, {}, {}) for a tree of {} nodes and {} classes",
                self.impurities.len(),
                self.sample_counts.len(),
                self.probabilities.len(),
                n_nodes,
                n_classes
            )));
        }
        Ok(())
    }
}

impl EncodedTree {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Rows of the children of a split node, `None` for leaves.
    #[inline]
    pub fn children(&self, i: usize) -> Option<(usize, usize)> {
        let node = &self.nodes[i];
        if node.is_leaf() {
            return None;
        }
        match self.encoding {
            Encoding::Explicit => {
                let l = node.left_child_or_class as usize;
                Some((l, l + 1))
            }
            Encoding::Implicit => Some((2 * i + 1, 2 * i + 2)),
        }
    }

    /// Row of the leaf reached when feature `f` has the value `value(f)`.
    #[inline]
    pub fn leaf_index_by<F: Fn(usize) -> f64>(&self, value: F) -> usize {
        let mut i = 0;
        while let Some((l, r)) = self.children(i) {
            let node = &self.nodes[i];
            let v = node.feature().map_or(f64::NAN, &value);
            i = if node.goes_left(v) { l } else { r };
        }
        i
    }

    /// Row of the leaf row `row` of a matrix ends up in.
    pub fn leaf_index_in(&self, data: &Matrix<f64>, row: usize) -> usize {
        self.leaf_index_by(|f| *data.get(row, f))
    }

    /// Check the structural invariants of the table, so that walking it can't
    /// go out of bounds or loop.
    pub fn validate(&self) -> Result<(), CanopyError> {
        let n = self.nodes.len();
        if n == 0 {
            return Err(CanopyError::incorrect_parameter("tree", "at least one node", 0));
        }
        if self.encoding == Encoding::Implicit && !(n + 1).is_power_of_two() {
            return Err(CanopyError::incorrect_parameter(
                "tree",
                "2^(max_level + 1) - 1 nodes for the implicit encoding",
                n,
            ));
        }
        for i in 0..n {
            if let Some((l, r)) = self.children(i) {
                if l <= i || r >= n {
                    return Err(CanopyError::incorrect_parameter(
                        "tree",
                        format!("children of node {} after it and below {}", i, n),
                        format!("({}, {})", l, r),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn leaf_row<A: NodeAllocator>(tree: &GrowableTree<A>, leaf: &LeafNode, probs: &mut [f64]) -> FlatNode {
    if tree.n_classes() == 0 {
        return FlatNode::leaf(0, leaf.value, leaf.cover);
    }
    if let Some(counts) = tree.class_counts(leaf) {
        let total: f64 = counts.iter().sum();
        if total > 0.0 {
            probs.iter_mut().zip(counts).for_each(|(p, c)| *p = c / total);
        }
    }
    FlatNode::leaf(leaf.value as u32, leaf.value, leaf.cover)
}

fn split_row(split: &SplitNode, left: u32) -> FlatNode {
    FlatNode::split(split.feature, left, split.threshold, split.default_left, split.cover)
}

/// Encode a tree with the explicit layout, rows in level order.
pub fn encode_explicit<A: NodeAllocator>(tree: &GrowableTree<A>) -> Result<(EncodedTree, TreeAux), CanopyError> {
    let order = tree.level_order()?;
    if order.is_empty() {
        return Err(CanopyError::incorrect_parameter("tree", "a tree with a root", "an empty tree"));
    }
    let n_classes = tree.n_classes();
    let mut nodes = Vec::with_capacity(order.len());
    let mut aux = TreeAux::zeros(order.len(), n_classes);
    // Children are discovered two at a time, right after everything already queued.
    let mut next = 1u32;
    for (i, id) in order.iter().enumerate() {
        let node = tree.node(*id)?;
        aux.impurities[i] = node.impurity();
        aux.sample_counts[i] = node.sample_count();
        let row = match node {
            TreeNode::Split(s) => {
                let row = split_row(s, next);
                next += 2;
                row
            }
            TreeNode::Leaf(l) => leaf_row(tree, l, &mut aux.probabilities[i * n_classes..(i + 1) * n_classes]),
        };
        nodes.push(row);
    }
    Ok((
        EncodedTree {
            encoding: Encoding::Explicit,
            nodes,
        },
        aux,
    ))
}

/// Encode a tree as a complete binary tree of `2^(max_level + 1) - 1` rows.
pub fn encode_implicit<A: NodeAllocator>(tree: &GrowableTree<A>) -> Result<(EncodedTree, TreeAux), CanopyError> {
    let root = tree
        .root()
        .ok_or_else(|| CanopyError::incorrect_parameter("tree", "a tree with a root", "an empty tree"))?;
    let max_level = tree.max_level()?;
    if max_level > MAX_IMPLICIT_LEVEL {
        return Err(CanopyError::MemoryAllocationFailed(format!(
            "implicit table for a tree of depth {}, at most {} is supported",
            max_level, MAX_IMPLICIT_LEVEL
        )));
    }
    let size = (1usize << (max_level + 1)) - 1;
    let n_classes = tree.n_classes();
    let mut rows: Vec<Option<FlatNode>> = vec![None; size];
    let mut aux = TreeAux::zeros(size, n_classes);

    let mut queue = VecDeque::from([(root, 0usize)]);
    while let Some((id, pos)) = queue.pop_front() {
        let node = tree.node(id)?;
        aux.impurities[pos] = node.impurity();
        aux.sample_counts[pos] = node.sample_count();
        rows[pos] = Some(match node {
            TreeNode::Split(s) => {
                let (l, r) = tree.children(id)?.ok_or_else(|| {
                    CanopyError::incorrect_parameter("tree", "a split node with children", format!("node {}", id.0))
                })?;
                queue.push_back((l, 2 * pos + 1));
                queue.push_back((r, 2 * pos + 2));
                split_row(s, (2 * pos + 1) as u32)
            }
            TreeNode::Leaf(l) => leaf_row(tree, l, &mut aux.probabilities[pos * n_classes..(pos + 1) * n_classes]),
        });
    }

    // Parents come first, so a missing slot can always copy its parent's value.
    let mut nodes: Vec<FlatNode> = Vec::with_capacity(size);
    for (pos, row) in rows.into_iter().enumerate() {
        let row = match row {
            Some(r) => r,
            None => FlatNode::dummy(nodes[(pos - 1) / 2].value),
        };
        nodes.push(row);
    }
    Ok((
        EncodedTree {
            encoding: Encoding::Implicit,
            nodes,
        },
        aux,
    ))
}

pub fn encode<A: NodeAllocator>(
    tree: &GrowableTree<A>,
    encoding: Encoding,
) -> Result<(EncodedTree, TreeAux), CanopyError> {
    match encoding {
        Encoding::Explicit => encode_explicit(tree),
        Encoding::Implicit => encode_implicit(tree),
    }
}

/// Rebuild an in-memory tree from a tree table. Dummy leaves are dropped, and
/// leaf class histograms are recovered from the probabilities and sample counts.
///
/// * `tree` - The tree table.
/// * `aux` - Optional auxiliary tables of the tree.
/// * `n_classes` - Number of classes, `0` for regression.
pub fn decode_tree(
    tree: &EncodedTree,
    aux: Option<&TreeAux>,
    n_classes: usize,
) -> Result<GrowableTree<HeapAllocator>, CanopyError> {
    tree.validate()?;
    if let Some(aux) = aux {
        aux.check_len(tree.len(), n_classes)?;
    }
    let mut out = GrowableTree::new(HeapAllocator::new(), n_classes);
    let mut counts = vec![0.0; n_classes];
    let mut queue = VecDeque::from([(0usize, None)]);
    while let Some((i, parent)) = queue.pop_front() {
        let row = &tree.nodes[i];
        let impurity = aux.map_or(0.0, |a| a.impurities[i]);
        let sample_count = aux.map_or(0, |a| a.sample_counts[i]);
        match (row.feature(), tree.children(i)) {
            (Some(feature), Some((l, r))) => {
                let id = out.add_split(
                    parent,
                    SplitNode {
                        feature,
                        threshold: row.value,
                        default_left: row.default_left,
                        sample_count,
                        impurity,
                        cover: row.cover,
                        ..Default::default()
                    },
                )?;
                queue.push_back((l, Some((id, 0))));
                queue.push_back((r, Some((id, 1))));
            }
            _ => {
                let class_counts = match aux.and_then(|a| a.probabilities(i, n_classes)) {
                    Some(p) if n_classes > 0 => {
                        counts.iter_mut().zip(p).for_each(|(c, p)| *c = p * sample_count as f64);
                        Some(counts.as_slice())
                    }
                    _ => None,
                };
                out.add_leaf(
                    parent,
                    LeafNode {
                        value: row.value,
                        sample_count,
                        impurity,
                        cover: row.cover,
                        ..Default::default()
                    },
                    class_counts,
                )?;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::NodeArena;
    use crate::node::NodeId;

    fn split(feature: usize, threshold: f64, n: u64) -> SplitNode {
        SplitNode {
            feature,
            threshold,
            default_left: true,
            sample_count: n,
            impurity: 0.5,
            cover: n as f64,
            ..Default::default()
        }
    }

    fn leaf(value: f64, n: u64) -> LeafNode {
        LeafNode {
            value,
            sample_count: n,
            cover: n as f64,
            ..Default::default()
        }
    }

    // root(x0 <= 1) -> [leaf 0, (x1 <= 5) -> [leaf 1, leaf 0]]
    fn unbalanced_tree() -> GrowableTree<NodeArena> {
        let mut tree = GrowableTree::new(NodeArena::new(), 2);
        let root = tree.add_split(None, split(0, 1.0, 10)).unwrap();
        tree.add_leaf(Some((root, 0)), leaf(0.0, 4), Some(&[4.0, 0.0])).unwrap();
        let r: NodeId = tree.add_split(Some((root, 1)), split(1, 5.0, 6)).unwrap();
        tree.add_leaf(Some((r, 0)), leaf(1.0, 4), Some(&[1.0, 3.0])).unwrap();
        tree.add_leaf(Some((r, 1)), leaf(0.0, 2), Some(&[2.0, 0.0])).unwrap();
        tree
    }

    #[test]
    fn test_encode_explicit() {
        let (enc, aux) = encode_explicit(&unbalanced_tree()).unwrap();
        assert_eq!(enc.len(), 5);
        enc.validate().unwrap();
        for i in 0..enc.len() {
            if let Some((l, r)) = enc.children(i) {
                assert_eq!(r, l + 1);
            }
        }
        assert_eq!(enc.children(0), Some((1, 2)));
        assert_eq!(enc.children(2), Some((3, 4)));
        assert_eq!(enc.nodes[3].left_child_or_class, 1);
        assert_eq!(aux.sample_counts, vec![10, 4, 6, 4, 2]);
        assert_eq!(aux.probabilities(3, 2).unwrap(), &[0.25, 0.75]);
        let value = |row: [f64; 2]| enc.nodes[enc.leaf_index_by(|f| row[f])].value;
        assert_eq!(value([0.5, 0.0]), 0.0);
        assert_eq!(value([2.0, 4.0]), 1.0);
        assert_eq!(value([f64::NAN, 9.0]), 0.0);
        let data = vec![0.5, 2.0, 0.0, 4.0];
        let m = Matrix::new(&data, 2, 2);
        assert_eq!(enc.leaf_index_in(&m, 0), 1);
        assert_eq!(enc.leaf_index_in(&m, 1), 3);
        assert_eq!(enc.nodes.iter().filter(|n| n.is_leaf()).count(), 3);
    }

    #[test]
    fn test_encode_implicit_pads_with_dummies() {
        let (enc, aux) = encode_implicit(&unbalanced_tree()).unwrap();
        assert_eq!(enc.len(), 7);
        enc.validate().unwrap();
        assert_eq!(enc.children(2), Some((5, 6)));
        assert!(enc.nodes[3].is_dummy() && enc.nodes[4].is_dummy());
        assert_eq!(enc.nodes[3].value, enc.nodes[1].value);
        assert_eq!(aux.sample_counts[5], 4);
        assert_eq!(enc.nodes[enc.leaf_index_by(|f| [2.0, 4.0][f])].value, 1.0);
        assert_eq!(enc.nodes.iter().filter(|n| n.is_leaf() && !n.is_dummy()).count(), 3);
    }

    #[test]
    fn test_encode_empty_tree() {
        let tree: GrowableTree = GrowableTree::new(NodeArena::new(), 0);
        assert!(matches!(encode_explicit(&tree), Err(CanopyError::IncorrectParameter(..))));
        assert!(matches!(encode_implicit(&tree), Err(CanopyError::IncorrectParameter(..))));
    }

    #[test]
    fn test_decode_round_trip() {
        let tree = unbalanced_tree();
        for encoding in [Encoding::Explicit, Encoding::Implicit] {
            let (enc, aux) = encode(&tree, encoding).unwrap();
            let decoded = decode_tree(&enc, Some(&aux), 2).unwrap();
            assert_eq!(decoded.len(), 5);
            let (again, aux_again) = encode_explicit(&decoded).unwrap();
            assert_eq!(again, encode_explicit(&tree).unwrap().0);
            assert_eq!(aux_again.sample_counts, vec![10, 4, 6, 4, 2]);
            assert_eq!(aux_again.probabilities(4, 2).unwrap(), &[1.0, 0.0]);
        }
    }

    #[test]
    fn test_decode_checks_tables() {
        let (enc, mut aux) = encode_explicit(&unbalanced_tree()).unwrap();
        aux.probabilities.pop();
        assert!(matches!(decode_tree(&enc, Some(&aux), 2), Err(CanopyError::MemoryCopyFailed(_))));

        let mut broken = enc.clone();
        broken.nodes[2].left_child_or_class = 4;
        assert!(matches!(decode_tree(&broken, None, 2), Err(CanopyError::IncorrectParameter(..))));
        assert!(EncodedTree::default().validate().is_err());
    }
}
