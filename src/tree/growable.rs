//! Growable tree
//!
//! The in-memory tree a single build works on. Nodes live in the tree's own
//! allocator and are linked by [`NodeId`] handles; leaf class histograms are kept
//! in a per-tree slab so that the nodes themselves stay plain data.
use crate::arena::{NodeAllocator, NodeArena, NodeDeallocator};
use crate::errors::CanopyError;
use crate::node::{LeafNode, NodeId, NodeKind, SplitNode, TreeNode};
use std::collections::VecDeque;

/// A binary tree built top-down, one level at a time.
#[derive(Debug)]
pub struct GrowableTree<A: NodeAllocator = NodeArena> {
    alloc: A,
    root: Option<NodeId>,
    n_classes: usize,
    class_counts: Vec<f64>,
}

impl<A: NodeAllocator> GrowableTree<A> {
    /// Start an empty tree in `alloc`, any node it still holds is dropped.
    ///
    /// * `n_classes` - Number of classes, `0` for regression trees.
    pub fn new(mut alloc: A, n_classes: usize) -> Self {
        alloc.reset();
        GrowableTree {
            alloc,
            root: None,
            n_classes,
            class_counts: Vec::new(),
        }
    }

    /// Give the allocator back, to be reset and reused by the next tree.
    pub fn into_allocator(self) -> A {
        self.alloc
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Number of allocated nodes.
    pub fn len(&self) -> usize {
        self.alloc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn node(&self, id: NodeId) -> Result<&TreeNode, CanopyError> {
        self.alloc
            .get(id)
            .ok_or_else(|| CanopyError::NullPointer(format!("node {} does not exist", id.0)))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut TreeNode, CanopyError> {
        self.alloc
            .get_mut(id)
            .ok_or_else(|| CanopyError::NullPointer(format!("node {} does not exist", id.0)))
    }

    /// Children of a split node, `None` for leaves.
    pub fn children(&self, id: NodeId) -> Result<Option<(NodeId, NodeId)>, CanopyError> {
        match self.node(id)? {
            TreeNode::Split(s) => match (s.left, s.right) {
                (Some(l), Some(r)) => Ok(Some((l, r))),
                _ => Err(CanopyError::incorrect_parameter(
                    "tree",
                    "every split node to have two children",
                    format!("split node {} with a missing child", id.0),
                )),
            },
            TreeNode::Leaf(_) => Ok(None),
        }
    }

    /// Class histogram of a leaf.
    pub fn class_counts(&self, leaf: &LeafNode) -> Option<&[f64]> {
        leaf.class_counts.map(|offset| {
            let start = offset as usize;
            &self.class_counts[start..start + self.n_classes]
        })
    }

    // Check the parent can take a child before anything is allocated, so a
    // failing call leaves the tree as it was.
    fn check_attach(&self, parent: Option<(NodeId, usize)>) -> Result<(), CanopyError> {
        match parent {
            None => match self.root {
                Some(_) => Err(CanopyError::incorrect_parameter(
                    "parent",
                    "a parent node, the root already exists",
                    "none",
                )),
                None => Ok(()),
            },
            Some((p, position)) => match self.node(p)? {
                TreeNode::Split(s) => {
                    let slot = match position {
                        0 => s.left,
                        1 => s.right,
                        _ => return Err(CanopyError::incorrect_parameter("position", "0 or 1", position)),
                    };
                    match slot {
                        Some(_) => Err(CanopyError::incorrect_parameter(
                            "position",
                            "a free child position",
                            format!("position {} of node {} which is taken", position, p.0),
                        )),
                        None => Ok(()),
                    }
                }
                TreeNode::Leaf(_) => Err(CanopyError::incorrect_parameter(
                    "parent",
                    "a split node",
                    format!("leaf node {}", p.0),
                )),
            },
        }
    }

    fn attach(&mut self, parent: Option<(NodeId, usize)>, child: NodeId) -> Result<(), CanopyError> {
        match parent {
            None => self.root = Some(child),
            Some((p, position)) => {
                if let TreeNode::Split(s) = self.node_mut(p)? {
                    if position == 0 {
                        s.left = Some(child);
                    } else {
                        s.right = Some(child);
                    }
                }
            }
        }
        Ok(())
    }

    /// Add a split node, as the root when `parent` is `None`, otherwise as
    /// child `position` (0 = left, 1 = right) of the parent.
    pub fn add_split(&mut self, parent: Option<(NodeId, usize)>, split: SplitNode) -> Result<NodeId, CanopyError> {
        self.check_attach(parent)?;
        let id = self.alloc.allocate(NodeKind::Split)?;
        *self.node_mut(id)? = TreeNode::Split(SplitNode {
            left: None,
            right: None,
            ..split
        });
        self.attach(parent, id)?;
        Ok(id)
    }

    /// Add a leaf node, with its class histogram for classification trees.
    pub fn add_leaf(
        &mut self,
        parent: Option<(NodeId, usize)>,
        leaf: LeafNode,
        class_counts: Option<&[f64]>,
    ) -> Result<NodeId, CanopyError> {
        self.check_attach(parent)?;
        let offset = match class_counts {
            Some(counts) => {
                if counts.len() != self.n_classes {
                    return Err(CanopyError::MemoryCopyFailed(format!(
                        "class histogram of {} values into a tree with {} classes",
                        counts.len(),
                        self.n_classes
                    )));
                }
                let offset = u32::try_from(self.class_counts.len()).map_err(|_| {
                    CanopyError::MemoryAllocationFailed("class histogram slab exceeds 32 bit offsets".to_string())
                })?;
                self.class_counts.extend_from_slice(counts);
                Some(offset)
            }
            None => None,
        };
        let id = self.alloc.allocate(NodeKind::Leaf)?;
        *self.node_mut(id)? = TreeNode::Leaf(LeafNode {
            class_counts: offset,
            ..leaf
        });
        self.attach(parent, id)?;
        Ok(id)
    }

    /// Deepest level of the tree, the root being level 0.
    pub fn max_level(&self) -> Result<usize, CanopyError> {
        let mut max_level = 0;
        let mut queue = VecDeque::new();
        if let Some(root) = self.root {
            queue.push_back((root, 0));
        }
        while let Some((id, level)) = queue.pop_front() {
            max_level = max_level.max(level);
            if let Some((l, r)) = self.children(id)? {
                queue.push_back((l, level + 1));
                queue.push_back((r, level + 1));
            }
        }
        Ok(max_level)
    }

    /// Node handles in level order.
    pub fn level_order(&self) -> Result<Vec<NodeId>, CanopyError> {
        let mut order = Vec::with_capacity(self.len());
        if let Some(root) = self.root {
            order.push(root);
        }
        let mut head = 0;
        while head < order.len() {
            if let Some((l, r)) = self.children(order[head])? {
                order.push(l);
                order.push(r);
            }
            head += 1;
        }
        Ok(order)
    }

    /// Leaf handles, left to right.
    pub fn leaves(&self) -> Result<Vec<NodeId>, CanopyError> {
        let mut leaves = Vec::new();
        let mut stack: Vec<NodeId> = self.root.into_iter().collect();
        while let Some(id) = stack.pop() {
            match self.children(id)? {
                Some((l, r)) => {
                    stack.push(r);
                    stack.push(l);
                }
                None => leaves.push(id),
            }
        }
        Ok(leaves)
    }

    /// Drop every node, keeping the allocator's memory.
    pub fn reset(&mut self) {
        self.alloc.reset();
        self.root = None;
        self.class_counts.clear();
    }
}

impl<A: NodeDeallocator> GrowableTree<A> {
    /// Free every descendant of `id`, the node itself is kept.
    pub fn free_descendants(&mut self, id: NodeId) -> Result<(), CanopyError> {
        let mut stack = match self.children(id)? {
            Some((l, r)) => vec![l, r],
            None => return Ok(()),
        };
        while let Some(n) = stack.pop() {
            if let Some((l, r)) = self.children(n)? {
                stack.push(l);
                stack.push(r);
            }
            self.alloc.deallocate(n)?;
        }
        Ok(())
    }

    /// Collapse split nodes whose children are two leaves with the same value.
    /// Collapsing cascades upwards. Returns the number of splits removed.
    pub fn collapse_redundant_splits(&mut self) -> Result<usize, CanopyError> {
        let order = self.level_order()?;
        let mut collapsed = 0;
        for &id in order.iter().rev() {
            let (split, l, r) = match self.node(id)? {
                TreeNode::Split(s) => match (s.left, s.right) {
                    (Some(l), Some(r)) => (*s, l, r),
                    _ => continue,
                },
                TreeNode::Leaf(_) => continue,
            };
            let (left, right) = match (self.node(l)?, self.node(r)?) {
                (TreeNode::Leaf(a), TreeNode::Leaf(b)) if a.value == b.value => (*a, *b),
                _ => continue,
            };
            let offset = match (left.class_counts, right.class_counts) {
                (Some(lo), Some(ro)) => {
                    let (lo, ro) = (lo as usize, ro as usize);
                    for c in 0..self.n_classes {
                        self.class_counts[lo + c] += self.class_counts[ro + c];
                    }
                    left.class_counts
                }
                (lo, _) => lo,
            };
            self.free_descendants(id)?;
            *self.node_mut(id)? = TreeNode::Leaf(LeafNode {
                value: left.value,
                class_counts: offset,
                sample_count: split.sample_count,
                impurity: split.impurity,
                cover: split.cover,
            });
            collapsed += 1;
        }
        Ok(collapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::HeapAllocator;

    fn leaf(value: f64, n: u64) -> LeafNode {
        LeafNode {
            value,
            sample_count: n,
            ..Default::default()
        }
    }

    fn split(feature: usize, threshold: f64, n: u64) -> SplitNode {
        SplitNode {
            feature,
            threshold,
            sample_count: n,
            ..Default::default()
        }
    }

    #[test]
    fn test_build_and_walk() {
        let mut tree = GrowableTree::new(NodeArena::new(), 0);
        let root = tree.add_split(None, split(0, 1.0, 10)).unwrap();
        let l = tree.add_leaf(Some((root, 0)), leaf(1.0, 4), None).unwrap();
        let r = tree.add_split(Some((root, 1)), split(1, 2.0, 6)).unwrap();
        tree.add_leaf(Some((r, 1)), leaf(3.0, 2), None).unwrap();
        tree.add_leaf(Some((r, 0)), leaf(2.0, 4), None).unwrap();

        assert_eq!(tree.len(), 5);
        assert_eq!(tree.max_level().unwrap(), 2);
        assert_eq!(tree.children(root).unwrap(), Some((l, r)));
        let total: u64 = tree
            .leaves()
            .unwrap()
            .iter()
            .map(|id| tree.node(*id).unwrap().sample_count())
            .sum();
        assert_eq!(total, 10);
        assert_eq!(tree.level_order().unwrap().len(), 5);
    }

    #[test]
    fn test_invalid_attach_leaves_tree_untouched() {
        let mut tree = GrowableTree::new(NodeArena::new(), 0);
        let root = tree.add_split(None, split(0, 1.0, 2)).unwrap();
        let l = tree.add_leaf(Some((root, 0)), leaf(0.0, 1), None).unwrap();
        assert!(tree.add_leaf(None, leaf(0.0, 1), None).is_err());
        assert!(tree.add_leaf(Some((root, 2)), leaf(0.0, 1), None).is_err());
        assert!(tree.add_leaf(Some((root, 0)), leaf(0.0, 1), None).is_err());
        assert!(tree.add_leaf(Some((l, 0)), leaf(0.0, 1), None).is_err());
        assert_eq!(tree.len(), 2);
        // The right child is still missing.
        assert!(tree.max_level().is_err());
    }

    #[test]
    fn test_collapse_redundant_splits() {
        let mut tree = GrowableTree::new(HeapAllocator::new(), 2);
        let root = tree.add_split(None, split(0, 1.0, 10)).unwrap();
        let a = tree.add_split(Some((root, 0)), split(1, 1.0, 6)).unwrap();
        tree.add_leaf(Some((a, 0)), leaf(0.0, 3), Some(&[3.0, 0.0])).unwrap();
        tree.add_leaf(Some((a, 1)), leaf(0.0, 3), Some(&[2.0, 1.0])).unwrap();
        tree.add_leaf(Some((root, 1)), leaf(0.0, 4), Some(&[3.0, 1.0])).unwrap();

        // `a` collapses, then the root collapses as well.
        assert_eq!(tree.collapse_redundant_splits().unwrap(), 2);
        assert_eq!(tree.len(), 1);
        match tree.node(root).unwrap() {
            TreeNode::Leaf(l) => {
                assert_eq!(l.sample_count, 10);
                assert_eq!(tree.class_counts(l).unwrap(), &[8.0, 2.0]);
            }
            TreeNode::Split(_) => panic!("root should be a leaf"),
        }
    }

    #[test]
    fn test_reset_reuses_allocator() {
        let mut tree = GrowableTree::new(NodeArena::with_chunk_pairs(1), 0);
        let root = tree.add_split(None, split(0, 1.0, 2)).unwrap();
        tree.add_leaf(Some((root, 0)), leaf(0.0, 1), None).unwrap();
        tree.add_leaf(Some((root, 1)), leaf(1.0, 1), None).unwrap();
        let arena = tree.into_allocator();
        assert_eq!(arena.n_chunks(), 2);
        let tree = GrowableTree::new(arena, 0);
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
    }
}
