//! Node
//!
//! Node types of a tree: the tagged in-memory nodes used while a tree is grown,
//! and the flat row of the encoded tree table.
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Handle to a node owned by a node allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The two kinds of tree nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Split,
    Leaf,
}

/// An internal node, routing rows with `feature <= threshold` to the left child.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SplitNode {
    pub feature: usize,
    pub threshold: f64,
    /// Last bin routed to the left, when the split came from binned data.
    pub bin: u16,
    /// Missing values are routed to the left child.
    pub default_left: bool,
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
    pub sample_count: u64,
    pub impurity: f64,
    pub cover: f64,
}

/// A terminal node.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LeafNode {
    /// Predicted response, or class label for classification.
    pub value: f64,
    /// Offset of the class histogram in the tree's class count slab.
    pub class_counts: Option<u32>,
    pub sample_count: u64,
    pub impurity: f64,
    pub cover: f64,
}

/// A tree node stored by value in a node allocator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TreeNode {
    Split(SplitNode),
    Leaf(LeafNode),
}

impl Default for TreeNode {
    fn default() -> Self {
        TreeNode::Leaf(LeafNode::default())
    }
}

impl TreeNode {
    /// A zero initialized node of the given kind.
    pub fn zeroed(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Split => TreeNode::Split(SplitNode::default()),
            NodeKind::Leaf => TreeNode::Leaf(LeafNode::default()),
        }
    }

    #[inline]
    pub fn is_split(&self) -> bool {
        matches!(self, TreeNode::Split(_))
    }

    pub fn sample_count(&self) -> u64 {
        match self {
            TreeNode::Split(s) => s.sample_count,
            TreeNode::Leaf(l) => l.sample_count,
        }
    }

    pub fn impurity(&self) -> f64 {
        match self {
            TreeNode::Split(s) => s.impurity,
            TreeNode::Leaf(l) => l.impurity,
        }
    }

    pub fn cover(&self) -> f64 {
        match self {
            TreeNode::Split(s) => s.cover,
            TreeNode::Leaf(l) => l.cover,
        }
    }
}

/// Feature index stored by leaf rows of the tree table.
pub const LEAF_FEATURE: i32 = -1;
/// `left_child_or_class` of the padding leaves of the implicit encoding.
pub const DUMMY_LEAF_MARKER: u32 = u32::MAX;

mod bool_as_i32 {
    use super::*;

    pub fn serialize<S: Serializer>(v: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i32(i32::from(*v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let v = i32::deserialize(d)?;
        Ok(v != 0)
    }
}

/// One row of the encoded tree table. The field order is the column order
/// of the serialized table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlatNode {
    /// Split feature, or [`LEAF_FEATURE`] for leaves.
    pub feature_index: i32,
    /// Row of the left child for splits, class label for leaves.
    pub left_child_or_class: u32,
    /// Split threshold for splits, response or class for leaves.
    pub value: f64,
    /// Missing values go left.
    #[serde(with = "bool_as_i32")]
    pub default_left: bool,
    /// Number of training samples that reached the node.
    pub cover: f64,
}

impl FlatNode {
    pub fn split(feature: usize, left_child: u32, threshold: f64, default_left: bool, cover: f64) -> Self {
        FlatNode {
            feature_index: feature as i32,
            left_child_or_class: left_child,
            value: threshold,
            default_left,
            cover,
        }
    }

    pub fn leaf(class: u32, value: f64, cover: f64) -> Self {
        FlatNode {
            feature_index: LEAF_FEATURE,
            left_child_or_class: class,
            value,
            default_left: false,
            cover,
        }
    }

    pub fn dummy(value: f64) -> Self {
        FlatNode {
            feature_index: LEAF_FEATURE,
            left_child_or_class: DUMMY_LEAF_MARKER,
            value,
            default_left: false,
            cover: 0.0,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.feature_index < 0
    }

    #[inline]
    pub fn is_dummy(&self) -> bool {
        self.is_leaf() && self.left_child_or_class == DUMMY_LEAF_MARKER
    }

    #[inline]
    pub fn feature(&self) -> Option<usize> {
        usize::try_from(self.feature_index).ok()
    }

    /// Route a value, returning `true` when it goes to the left child.
    #[inline]
    pub fn goes_left(&self, v: f64) -> bool {
        if v.is_nan() {
            self.default_left
        } else {
            v <= self.value
        }
    }
}

impl fmt::Display for FlatNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_dummy() {
            write!(f, "dummy={}", self.value)
        } else if self.is_leaf() {
            write!(f, "leaf={},class={},cover={}", self.value, self.left_child_or_class, self.cover)
        } else {
            write!(
                f,
                "[{} <= {}] left={},default_left={},cover={}",
                self.feature_index, self.value, self.left_child_or_class, self.default_left, self.cover
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_node_routing() {
        let n = FlatNode::split(2, 1, 1.5, true, 10.0);
        assert!(!n.is_leaf());
        assert_eq!(n.feature(), Some(2));
        assert!(n.goes_left(1.5));
        assert!(!n.goes_left(1.6));
        assert!(n.goes_left(f64::NAN));
        let d = FlatNode::dummy(0.5);
        assert!(d.is_leaf() && d.is_dummy());
        assert!(!FlatNode::leaf(1, 1.0, 3.0).is_dummy());
    }

    #[test]
    fn test_flat_node_serialized_columns() {
        let n = FlatNode::split(0, 1, 2.5, true, 4.0);
        let s = serde_json::to_string(&n).unwrap();
        assert_eq!(
            s,
            r#"{"feature_index":0,"left_child_or_class":1,"value":2.5,"default_left":1,"cover":4.0}"#
        );
        let back: FlatNode = serde_json::from_str(&s).unwrap();
        assert_eq!(back, n);
    }

    #[test]
    fn test_zeroed_nodes() {
        assert!(TreeNode::zeroed(NodeKind::Split).is_split());
        assert_eq!(TreeNode::zeroed(NodeKind::Leaf).sample_count(), 0);
    }
}
