//! Partition
//!
//! The records of the nodes on the current level of a tree, and the row
//! partitioner moving every split node's rows into its children's ranges.
//!
//! Row ids are kept in two buffers. The rows of the current level are read
//! from the front buffer while the next level's order is written into the back
//! buffer, then the buffers are swapped.
use crate::data::Matrix;
use crate::errors::CanopyError;
use crate::node::NodeId;
use rayon::prelude::*;

/// A node on the current level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelNode {
    /// First row of the node in the front buffer.
    pub rows_offset: usize,
    pub row_count: usize,
    /// Feature of the chosen split, `None` while the node has no split.
    pub chosen_feature: Option<usize>,
    /// Last bin routed to the left by the chosen split.
    pub chosen_bin: u16,
    pub left_row_count: usize,
    /// Leaf prediction of the node.
    pub value: f64,
    /// Statistics of the node's rows.
    pub stats: Vec<f64>,
    pub impurity: f64,
    pub depth: usize,
    /// Parent node and child position, `None` for the root.
    pub parent: Option<(NodeId, usize)>,
    /// Candidate features, ascending.
    pub features: Vec<usize>,
}

impl LevelNode {
    pub fn new(
        rows_offset: usize,
        row_count: usize,
        stats: Vec<f64>,
        depth: usize,
        parent: Option<(NodeId, usize)>,
    ) -> Self {
        LevelNode {
            rows_offset,
            row_count,
            chosen_feature: None,
            chosen_bin: 0,
            left_row_count: 0,
            value: 0.0,
            stats,
            impurity: 0.0,
            depth,
            parent,
            features: Vec::new(),
        }
    }

    pub fn is_split(&self) -> bool {
        self.chosen_feature.is_some()
    }
}

/// Double buffered row order of a tree.
#[derive(Debug, Default)]
pub struct RowPartitioner {
    front: Vec<usize>,
    back: Vec<usize>,
}

impl RowPartitioner {
    pub fn new() -> Self {
        RowPartitioner::default()
    }

    /// Start a new tree over `rows`, keeping the buffers' memory.
    pub fn reset(&mut self, rows: &[usize]) {
        self.front.clear();
        self.front.extend_from_slice(rows);
        self.back.clear();
    }

    /// Rows of the current level, in node order.
    pub fn front(&self) -> &[usize] {
        &self.front
    }

    /// Move the rows of every split node of `level` into the ranges of its two
    /// children, left child first, children in the order of their parents.
    /// Rows of nodes without a split are dropped. Returns the offsets of the
    /// left and right children of every split node.
    ///
    /// * `level` - The nodes of the current level.
    /// * `data` - Binned training data.
    pub fn partition_level(
        &mut self,
        level: &[LevelNode],
        data: &Matrix<u16>,
    ) -> Result<Vec<(usize, usize)>, CanopyError> {
        let total: usize = level.iter().filter(|n| n.is_split()).map(|n| n.row_count).sum();
        self.back.clear();
        self.back.resize(total, 0);

        let mut offsets = Vec::new();
        let mut jobs = Vec::new();
        let mut rest = self.back.as_mut_slice();
        let mut cursor = 0;
        for node in level {
            let feature = match node.chosen_feature {
                Some(f) => f,
                None => continue,
            };
            let (dst, tail) = std::mem::take(&mut rest).split_at_mut(node.row_count);
            rest = tail;
            offsets.push((cursor, cursor + node.left_row_count));
            cursor += node.row_count;
            let src = &self.front[node.rows_offset..node.rows_offset + node.row_count];
            jobs.push((src, dst, data.get_col(feature), node.chosen_bin, node.left_row_count));
        }

        jobs.into_par_iter()
            .map(|(src, dst, col, bin, left_count)| {
                let (mut l, mut r) = (0, left_count);
                for row in src {
                    if col[*row] <= bin {
                        if l == left_count {
                            return Err(left_count);
                        }
                        dst[l] = *row;
                        l += 1;
                    } else {
                        if r == dst.len() {
                            return Err(left_count);
                        }
                        dst[r] = *row;
                        r += 1;
                    }
                }
                Ok(())
            })
            .collect::<Result<Vec<()>, usize>>()
            .map_err(|left_count| {
                CanopyError::MemoryCopyFailed(format!(
                    "rows of a node do not match its left partition size of {}",
                    left_count
                ))
            })?;

        std::mem::swap(&mut self.front, &mut self.back);
        Ok(offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_node(rows_offset: usize, row_count: usize, feature: usize, bin: u16, left: usize) -> LevelNode {
        LevelNode {
            chosen_feature: Some(feature),
            chosen_bin: bin,
            left_row_count: left,
            ..LevelNode::new(rows_offset, row_count, vec![], 0, None)
        }
    }

    #[test]
    fn test_partition_level() {
        // Feature 0 bins of rows 0..6, feature 1 bins after it.
        let bins = vec![3, 0, 2, 1, 0, 3, 1, 1, 0, 0, 1, 0];
        let data = Matrix::new(&bins, 6, 2);
        let mut p = RowPartitioner::new();
        p.reset(&[0, 1, 2, 3, 4, 5]);
        let level = vec![
            split_node(0, 3, 0, 1, 1),
            LevelNode::new(3, 1, vec![], 0, None),
            split_node(4, 2, 1, 0, 1),
        ];
        let offsets = p.partition_level(&level, &data).unwrap();
        assert_eq!(offsets, vec![(0, 1), (3, 4)]);
        // Stable within each side, row 3 is dropped with its leaf.
        assert_eq!(p.front(), &[1, 0, 2, 5, 4]);
    }

    #[test]
    fn test_partition_duplicated_rows() {
        let bins = vec![0, 1, 0];
        let data = Matrix::new(&bins, 3, 1);
        let mut p = RowPartitioner::new();
        p.reset(&[0, 0, 1, 2, 2]);
        let offsets = p.partition_level(&[split_node(0, 5, 0, 0, 4)], &data).unwrap();
        assert_eq!(offsets, vec![(0, 4)]);
        assert_eq!(p.front(), &[0, 0, 2, 2, 1]);
    }

    #[test]
    fn test_partition_wrong_left_count() {
        let bins = vec![0, 1, 0];
        let data = Matrix::new(&bins, 3, 1);
        let mut p = RowPartitioner::new();
        p.reset(&[0, 1, 2]);
        assert!(matches!(
            p.partition_level(&[split_node(0, 3, 0, 0, 1)], &data),
            Err(CanopyError::MemoryCopyFailed(_))
        ));
    }
}
