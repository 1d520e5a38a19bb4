//! Grower
//!
//! Level synchronous growth of a single tree. Every level runs in three steps:
//! the best split of every frontier node is searched in parallel, the splits
//! are applied to the tree in frontier order, then the rows of the split nodes
//! are partitioned into the ranges of the next level's nodes. Nothing of the
//! next level starts before the current level is done.
use crate::arena::NodeAllocator;
use crate::binning::BinnedData;
use crate::criterion::SplitCriterion;
use crate::errors::CanopyError;
use crate::histogram::{build_histogram, select_strategy, HistogramStrategy, NodeHistogram};
use crate::node::{LeafNode, SplitNode};
use crate::partition::{LevelNode, RowPartitioner};
use crate::splitter::{find_best_split, SplitCandidate, SplitConstraints, SplitterConfig};
use crate::tree::growable::GrowableTree;
use log::debug;
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// Limits and search settings of a tree build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowerParams {
    /// Nodes at this depth are not split, `0` for no limit.
    pub max_depth: usize,
    pub constraints: SplitConstraints,
    /// Candidate features drawn for every node.
    pub features_per_node: usize,
    pub splitter: SplitterConfig,
}

/// Grows trees over binned data with a split criterion.
pub struct TreeGrower<'a, C: SplitCriterion + ?Sized> {
    criterion: &'a C,
    data: &'a BinnedData,
    n_bins: Vec<usize>,
    params: GrowerParams,
}

impl<'a, C: SplitCriterion + ?Sized> TreeGrower<'a, C> {
    pub fn new(criterion: &'a C, data: &'a BinnedData, params: GrowerParams) -> Self {
        TreeGrower {
            criterion,
            data,
            n_bins: data.n_bins_per_feature(),
            params,
        }
    }

    // Sorted, so that the histogram and the tie break see features in id order.
    fn draw_features(&self, rng: &mut StdRng) -> Vec<usize> {
        let p = self.data.cols;
        let k = self.params.features_per_node;
        if k == 0 || k >= p {
            return (0..p).collect();
        }
        let mut features = (0..p).choose_multiple(rng, k);
        features.sort_unstable();
        features
    }

    fn evaluate(&self, node: &LevelNode, front: &[usize]) -> Option<SplitCandidate> {
        if self.params.max_depth > 0 && node.depth >= self.params.max_depth {
            return None;
        }
        let rows = &front[node.rows_offset..node.rows_offset + node.row_count];
        let width = self.criterion.stat_width();
        let strategy = select_strategy(
            rows.len(),
            node.features.len(),
            NodeHistogram::size_in_bytes(&node.features, &self.n_bins, width),
            &self.params.splitter,
        );
        if let HistogramStrategy::TwoPhase { shards } = strategy {
            debug!("Two-phase histogram with {} shards for a node of {} rows.", shards, rows.len());
        }
        let binned = self.data.as_matrix();
        let hist = build_histogram(self.criterion, &binned, &self.n_bins, &node.features, rows, strategy);
        find_best_split(
            self.criterion,
            &hist,
            &node.features,
            &node.stats,
            &self.params.constraints,
            &self.params.splitter,
            strategy,
        )
    }

    /// Number of classes of the trees grown, `0` for regression.
    pub fn n_classes(&self) -> usize {
        self.criterion.n_classes()
    }

    /// Grow a tree over `rows` in a fresh tree taken from `alloc`.
    pub fn grow<A: NodeAllocator>(
        &self,
        rows: &[usize],
        rng: &mut StdRng,
        alloc: A,
        partitioner: &mut RowPartitioner,
        cancel: Option<&AtomicBool>,
    ) -> Result<GrowableTree<A>, CanopyError> {
        let mut tree = GrowableTree::new(alloc, self.n_classes());
        self.grow_into(&mut tree, rows, rng, partitioner, cancel)?;
        Ok(tree)
    }

    /// Grow a tree over `rows` into `tree`, dropping the nodes it held. On
    /// error the tree is left partly built, its allocator can still be reused.
    ///
    /// * `tree` - Tree the nodes are added to.
    /// * `rows` - Training rows of the tree, duplicates allowed.
    /// * `rng` - Source of the per node feature subsets.
    /// * `partitioner` - Row buffers, reused across trees.
    /// * `cancel` - Checked before every level.
    pub fn grow_into<A: NodeAllocator>(
        &self,
        tree: &mut GrowableTree<A>,
        rows: &[usize],
        rng: &mut StdRng,
        partitioner: &mut RowPartitioner,
        cancel: Option<&AtomicBool>,
    ) -> Result<(), CanopyError> {
        tree.reset();
        if tree.n_classes() != self.n_classes() {
            return Err(CanopyError::incorrect_parameter(
                "tree",
                format!("a tree with {} classes", self.n_classes()),
                tree.n_classes(),
            ));
        }
        if rows.is_empty() {
            return Err(CanopyError::incorrect_parameter("rows", "at least one training row", 0));
        }
        let criterion = self.criterion;
        let binned = self.data.as_matrix();
        partitioner.reset(rows);
        // Rows that ended in a leaf on an earlier level.
        let mut leaf_rows = 0;

        let mut root = LevelNode::new(0, rows.len(), criterion.node_stats(rows), 0, None);
        root.features = self.draw_features(rng);
        let mut level = vec![root];

        while !level.is_empty() {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                return Err(CanopyError::Cancelled);
            }
            let depth = level[0].depth;
            let front = partitioner.front();
            let splits: Vec<Option<SplitCandidate>> = level.par_iter().map(|n| self.evaluate(n, front)).collect();

            let mut children = Vec::with_capacity(level.len());
            for (node, split) in level.iter_mut().zip(splits) {
                node.impurity = criterion.impurity(&node.stats);
                node.value = criterion.leaf_value(&node.stats);
                match split {
                    Some(s) => {
                        node.chosen_feature = Some(s.feature);
                        node.chosen_bin = s.bin;
                        node.left_row_count = s.left_count;
                        let id = tree.add_split(
                            node.parent,
                            SplitNode {
                                feature: s.feature,
                                threshold: self.data.threshold(s.feature, s.bin),
                                bin: s.bin,
                                default_left: true,
                                sample_count: node.row_count as u64,
                                impurity: node.impurity,
                                cover: node.row_count as f64,
                                ..Default::default()
                            },
                        )?;
                        children.push(Some((id, s.left_stats)));
                    }
                    None => {
                        tree.add_leaf(
                            node.parent,
                            LeafNode {
                                value: node.value,
                                sample_count: node.row_count as u64,
                                impurity: node.impurity,
                                cover: node.row_count as f64,
                                ..Default::default()
                            },
                            criterion.class_counts(&node.stats),
                        )?;
                        leaf_rows += node.row_count;
                        children.push(None);
                    }
                }
            }

            let offsets = partitioner.partition_level(&level, &binned)?;
            let mut offsets = offsets.into_iter();
            let mut next = Vec::new();
            for (node, child) in level.iter().zip(children) {
                let (id, left_stats) = match child {
                    Some(c) => c,
                    None => continue,
                };
                let (left_offset, right_offset) = offsets.next().ok_or_else(|| {
                    CanopyError::MemoryCopyFailed("fewer partitioned ranges than split nodes".to_string())
                })?;
                let right_stats: Vec<f64> = node.stats.iter().zip(&left_stats).map(|(n, l)| n - l).collect();
                let mut left = LevelNode::new(
                    left_offset,
                    node.left_row_count,
                    left_stats,
                    node.depth + 1,
                    Some((id, 0)),
                );
                left.features = self.draw_features(rng);
                let mut right = LevelNode::new(
                    right_offset,
                    node.row_count - node.left_row_count,
                    right_stats,
                    node.depth + 1,
                    Some((id, 1)),
                );
                right.features = self.draw_features(rng);
                next.push(left);
                next.push(right);
            }
            let covered = leaf_rows + next.iter().map(|n| n.row_count).sum::<usize>();
            if covered != rows.len() {
                return Err(CanopyError::MemoryCopyFailed(format!(
                    "level {} covers {} of the {} rows of the tree",
                    depth,
                    covered,
                    rows.len()
                )));
            }
            debug!(
                "Level {}: {} nodes, {} split.",
                depth,
                level.len(),
                next.len() / 2
            );
            level = next;
        }
        Ok(())
    }
}
