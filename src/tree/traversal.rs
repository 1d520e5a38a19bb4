//! Traversal
//!
//! Depth first and breadth first walks calling a [`TreeVisitor`] for every node.
//! Both walks are iterative and work the same way over an in-memory
//! [`GrowableTree`] and over a tree table seen through a [`TreeView`].
use crate::arena::NodeAllocator;
use crate::errors::CanopyError;
use crate::node::{NodeId, TreeNode};
use crate::tree::encode::{EncodedTree, TreeAux};
use crate::tree::growable::GrowableTree;
use std::collections::VecDeque;

/// What a visitor sees of a split node.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitNodeDescriptor {
    /// Depth of the node, the root is at level 0.
    pub level: usize,
    pub feature_index: usize,
    pub threshold: f64,
    pub default_left: bool,
    pub impurity: Option<f64>,
    pub sample_count: Option<u64>,
}

/// What a visitor sees of a leaf node.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafNodeDescriptor {
    pub level: usize,
    pub value: f64,
    /// Predicted class, for classification trees.
    pub class_label: Option<u32>,
    pub impurity: Option<f64>,
    pub sample_count: Option<u64>,
}

/// Callbacks of a tree walk. Returning `false` stops the walk.
pub trait TreeVisitor {
    fn on_split_node(&mut self, node: &SplitNodeDescriptor) -> bool;
    fn on_leaf_node(&mut self, node: &LeafNodeDescriptor) -> bool;
}

/// A node as seen by the walks, with the handles of its children.
pub enum NodeDescriptor<H> {
    Split(SplitNodeDescriptor, H, H),
    Leaf(LeafNodeDescriptor),
}

/// Anything the walks can run over.
pub trait TraversalSource {
    type Handle: Copy;
    fn root_handle(&self) -> Option<Self::Handle>;
    fn describe(&self, handle: Self::Handle, level: usize) -> Result<NodeDescriptor<Self::Handle>, CanopyError>;
}

impl<A: NodeAllocator> TraversalSource for GrowableTree<A> {
    type Handle = NodeId;

    fn root_handle(&self) -> Option<NodeId> {
        self.root()
    }

    fn describe(&self, id: NodeId, level: usize) -> Result<NodeDescriptor<NodeId>, CanopyError> {
        let node = *self.node(id)?;
        Ok(match node {
            TreeNode::Split(s) => {
                let (l, r) = self.children(id)?.ok_or_else(|| {
                    CanopyError::incorrect_parameter("tree", "a split node with children", format!("node {}", id.0))
                })?;
                NodeDescriptor::Split(
                    SplitNodeDescriptor {
                        level,
                        feature_index: s.feature,
                        threshold: s.threshold,
                        default_left: s.default_left,
                        impurity: Some(s.impurity),
                        sample_count: Some(s.sample_count),
                    },
                    l,
                    r,
                )
            }
            TreeNode::Leaf(l) => NodeDescriptor::Leaf(LeafNodeDescriptor {
                level,
                value: l.value,
                class_label: (self.n_classes() > 0).then_some(l.value as u32),
                impurity: Some(l.impurity),
                sample_count: Some(l.sample_count),
            }),
        })
    }
}

/// A tree table together with its optional auxiliary tables.
#[derive(Debug, Clone, Copy)]
pub struct TreeView<'a> {
    pub tree: &'a EncodedTree,
    pub aux: Option<&'a TreeAux>,
    /// Number of classes, `0` for regression.
    pub n_classes: usize,
}

impl<'a> TraversalSource for TreeView<'a> {
    type Handle = usize;

    fn root_handle(&self) -> Option<usize> {
        (!self.tree.is_empty()).then_some(0)
    }

    fn describe(&self, i: usize, level: usize) -> Result<NodeDescriptor<usize>, CanopyError> {
        let n = self.tree.len();
        let row = self
            .tree
            .nodes
            .get(i)
            .ok_or_else(|| CanopyError::incorrect_parameter("node", format!("an index below {}", n), i))?;
        let impurity = self.aux.and_then(|a| a.impurities.get(i).copied());
        let sample_count = self.aux.and_then(|a| a.sample_counts.get(i).copied());
        Ok(match (row.feature(), self.tree.children(i)) {
            (Some(feature_index), Some((l, r))) => {
                if l <= i || r >= n {
                    return Err(CanopyError::incorrect_parameter(
                        "tree",
                        format!("children of node {} after it and below {}", i, n),
                        format!("({}, {})", l, r),
                    ));
                }
                NodeDescriptor::Split(
                    SplitNodeDescriptor {
                        level,
                        feature_index,
                        threshold: row.value,
                        default_left: row.default_left,
                        impurity,
                        sample_count,
                    },
                    l,
                    r,
                )
            }
            _ => NodeDescriptor::Leaf(LeafNodeDescriptor {
                level,
                value: row.value,
                class_label: (self.n_classes > 0).then_some(row.left_child_or_class),
                impurity,
                sample_count,
            }),
        })
    }
}

/// Pre-order walk, the left subtree is visited completely before the right one.
pub fn traverse_depth_first<S, V>(source: &S, visitor: &mut V) -> Result<(), CanopyError>
where
    S: TraversalSource + ?Sized,
    V: TreeVisitor + ?Sized,
{
    let mut stack: Vec<(S::Handle, usize)> = source.root_handle().map(|h| (h, 0)).into_iter().collect();
    while let Some((h, level)) = stack.pop() {
        match source.describe(h, level)? {
            NodeDescriptor::Split(d, l, r) => {
                if !visitor.on_split_node(&d) {
                    return Ok(());
                }
                stack.push((r, level + 1));
                stack.push((l, level + 1));
            }
            NodeDescriptor::Leaf(d) => {
                if !visitor.on_leaf_node(&d) {
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

/// Level order walk, left to right within a level.
pub fn traverse_breadth_first<S, V>(source: &S, visitor: &mut V) -> Result<(), CanopyError>
where
    S: TraversalSource + ?Sized,
    V: TreeVisitor + ?Sized,
{
    let mut queue: VecDeque<(S::Handle, usize)> = source.root_handle().map(|h| (h, 0)).into_iter().collect();
    while let Some((h, level)) = queue.pop_front() {
        match source.describe(h, level)? {
            NodeDescriptor::Split(d, l, r) => {
                if !visitor.on_split_node(&d) {
                    return Ok(());
                }
                queue.push_back((l, level + 1));
                queue.push_back((r, level + 1));
            }
            NodeDescriptor::Leaf(d) => {
                if !visitor.on_leaf_node(&d) {
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::arena::NodeArena;
    use crate::node::{LeafNode, SplitNode};
    use crate::tree::encode::{decode_tree, encode, Encoding};

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Visit {
        Split(SplitNodeDescriptor),
        Leaf(LeafNodeDescriptor),
    }

    /// Records every call, stopping after `limit` of them.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub calls: Vec<Visit>,
        pub limit: Option<usize>,
    }

    impl Recorder {
        fn keep_going(&self) -> bool {
            self.limit.map_or(true, |l| self.calls.len() < l)
        }
    }

    impl TreeVisitor for Recorder {
        fn on_split_node(&mut self, node: &SplitNodeDescriptor) -> bool {
            self.calls.push(Visit::Split(node.clone()));
            self.keep_going()
        }
        fn on_leaf_node(&mut self, node: &LeafNodeDescriptor) -> bool {
            self.calls.push(Visit::Leaf(node.clone()));
            self.keep_going()
        }
    }

    fn split(feature: usize, threshold: f64, n: u64) -> SplitNode {
        SplitNode {
            feature,
            threshold,
            sample_count: n,
            impurity: 0.25,
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

    // root -> [a -> [1, 2], 3]
    fn tree() -> GrowableTree<NodeArena> {
        let mut t = GrowableTree::new(NodeArena::new(), 0);
        let root = t.add_split(None, split(0, 0.5, 6)).unwrap();
        let a = t.add_split(Some((root, 0)), split(1, 1.5, 4)).unwrap();
        t.add_leaf(Some((root, 1)), leaf(3.0, 2), None).unwrap();
        t.add_leaf(Some((a, 0)), leaf(1.0, 1), None).unwrap();
        t.add_leaf(Some((a, 1)), leaf(2.0, 3), None).unwrap();
        t
    }

    fn leaf_values(calls: &[Visit]) -> Vec<f64> {
        calls
            .iter()
            .filter_map(|c| match c {
                Visit::Leaf(l) => Some(l.value),
                Visit::Split(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_depth_first_order() {
        let mut r = Recorder::default();
        traverse_depth_first(&tree(), &mut r).unwrap();
        assert_eq!(r.calls.len(), 5);
        assert!(matches!(&r.calls[0], Visit::Split(s) if s.level == 0 && s.feature_index == 0));
        assert!(matches!(&r.calls[1], Visit::Split(s) if s.level == 1 && s.feature_index == 1));
        assert_eq!(leaf_values(&r.calls), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_breadth_first_order() {
        let mut r = Recorder::default();
        traverse_breadth_first(&tree(), &mut r).unwrap();
        assert_eq!(leaf_values(&r.calls), vec![3.0, 1.0, 2.0]);
        let levels: Vec<usize> = r
            .calls
            .iter()
            .map(|c| match c {
                Visit::Split(s) => s.level,
                Visit::Leaf(l) => l.level,
            })
            .collect();
        assert_eq!(levels, vec![0, 1, 1, 2, 2]);
    }

    #[test]
    fn test_early_stop() {
        let mut r = Recorder {
            limit: Some(2),
            ..Default::default()
        };
        traverse_depth_first(&tree(), &mut r).unwrap();
        assert_eq!(r.calls.len(), 2);
        let mut r = Recorder {
            limit: Some(1),
            ..Default::default()
        };
        traverse_breadth_first(&tree(), &mut r).unwrap();
        assert_eq!(r.calls.len(), 1);
    }

    #[test]
    fn test_encoded_walks_match_in_memory_walks() {
        let t = tree();
        let mut df = Recorder::default();
        let mut bf = Recorder::default();
        traverse_depth_first(&t, &mut df).unwrap();
        traverse_breadth_first(&t, &mut bf).unwrap();
        for encoding in [Encoding::Explicit, Encoding::Implicit] {
            let (enc, aux) = encode(&t, encoding).unwrap();
            let view = TreeView {
                tree: &enc,
                aux: Some(&aux),
                n_classes: 0,
            };
            let mut r = Recorder::default();
            traverse_depth_first(&view, &mut r).unwrap();
            assert_eq!(r.calls, df.calls);
            let mut r = Recorder::default();
            traverse_breadth_first(&view, &mut r).unwrap();
            assert_eq!(r.calls, bf.calls);

            let decoded = decode_tree(&enc, Some(&aux), 0).unwrap();
            let mut r = Recorder::default();
            traverse_depth_first(&decoded, &mut r).unwrap();
            assert_eq!(r.calls, df.calls);
        }
    }

    #[test]
    fn test_view_without_aux() {
        let (enc, _) = encode(&tree(), Encoding::Explicit).unwrap();
        let view = TreeView {
            tree: &enc,
            aux: None,
            n_classes: 0,
        };
        let mut r = Recorder::default();
        traverse_breadth_first(&view, &mut r).unwrap();
        assert!(matches!(&r.calls[0], Visit::Split(s) if s.impurity.is_none() && s.sample_count.is_none()));
    }
}
