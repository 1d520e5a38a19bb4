//! Data
//!
//! The borrowed column-major matrix used for raw features and binned features,
//! and the jagged matrix used to hold a variable number of bin borders per column.
use crate::errors::CanopyError;
use serde::{Deserialize, Serialize};

/// Contiguous Column Major Matrix data container.
///
/// This structure holds a dense matrix of values in a single contiguous memory block,
/// column after column, so a feature column is a plain slice.
///
/// # Type Parameters
/// * `T` - The element type, `f64` for raw features and `u16` for bin ids.
#[derive(Debug, Clone)]
pub struct Matrix<'a, T> {
    /// The raw data stored in a single slice.
    pub data: &'a [T],
    /// Number of rows in the matrix.
    pub rows: usize,
    /// Number of columns in the matrix.
    pub cols: usize,
}

impl<'a, T> Matrix<'a, T> {
    /// Create a new Matrix, the length of `data` must be `rows * cols`.
    pub fn new(data: &'a [T], rows: usize, cols: usize) -> Self {
        debug_assert_eq!(data.len(), rows * cols);
        Matrix { data, rows, cols }
    }

    /// Create a new Matrix, checking the length of `data`.
    pub fn try_new(data: &'a [T], rows: usize, cols: usize) -> Result<Self, CanopyError> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(CanopyError::incorrect_parameter(
                "data",
                format!("{} values for a {} x {} matrix", rows.saturating_mul(cols), rows, cols),
                data.len(),
            ));
        }
        Ok(Matrix { data, rows, cols })
    }

    /// Get a single reference to an item in the matrix.
    ///
    /// * `i` - The ith row of the data to get.
    /// * `j` - the jth column of the data to get.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> &T {
        &self.data[j * self.rows + i]
    }

    /// Get an entire column in the matrix.
    ///
    /// * `col` - The index of the column to get.
    #[inline]
    pub fn get_col(&self, col: usize) -> &'a [T] {
        &self.data[col * self.rows..(col + 1) * self.rows]
    }

}

/// A jagged column aligned matrix, that owns it's data contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JaggedMatrix<T> {
    /// The contents of the matrix.
    pub data: Vec<T>,
    /// The end index's of the matrix.
    pub ends: Vec<usize>,
    /// Number of columns in the matrix
    pub cols: usize,
    /// The number of elements in the matrix.
    pub n_records: usize,
}

impl<T> JaggedMatrix<T>
where
    T: Copy,
{
    /// Generate a jagged array from a vector of vectors
    pub fn from_vecs(vecs: &[Vec<T>]) -> Self {
        let mut data = Vec::with_capacity(vecs.iter().map(|v| v.len()).sum());
        let mut ends = Vec::with_capacity(vecs.len());
        for vec in vecs {
            data.extend_from_slice(vec);
            ends.push(data.len());
        }
        JaggedMatrix {
            n_records: data.len(),
            data,
            ends,
            cols: vecs.len(),
        }
    }
}

impl<T> JaggedMatrix<T> {
    /// Get the column of a jagged array.
    pub fn get_col(&self, col: usize) -> &[T] {
        assert!(col < self.ends.len());
        let (i, j) = if col == 0 {
            (0, self.ends[col])
        } else {
            (self.ends[col - 1], self.ends[col])
        };
        &self.data[i..j]
    }

    /// Length of a single column.
    pub fn col_len(&self, col: usize) -> usize {
        self.get_col(col).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_get() {
        let v = vec![1, 2, 3, 5, 6, 7];
        let m = Matrix::new(&v, 2, 3);
        assert_eq!(m.get(0, 0), &1);
        assert_eq!(m.get(1, 0), &2);
        assert_eq!(m.get(1, 2), &7);
    }

    #[test]
    fn test_matrix_get_col() {
        let v = vec![1, 2, 3, 5, 6, 7];
        let m = Matrix::new(&v, 3, 2);
        assert_eq!(m.get_col(1), &vec![5, 6, 7]);
    }

    #[test]
    fn test_matrix_try_new_checks_len() {
        let v = vec![1.0, 2.0, 3.0];
        assert!(Matrix::try_new(&v, 2, 2).is_err());
        assert!(Matrix::try_new(&v, 3, 1).is_ok());
    }

    #[test]
    fn test_jaggedmatrix_get_col() {
        let vecs = vec![vec![0], vec![5, 4, 3, 2], vec![4, 5]];
        let jmatrix = JaggedMatrix::from_vecs(&vecs);
        assert_eq!(jmatrix.get_col(1), vec![5, 4, 3, 2]);
        assert_eq!(jmatrix.get_col(0), vec![0]);
        assert_eq!(jmatrix.get_col(2), vec![4, 5]);
        assert_eq!(jmatrix.n_records, 7);
        assert_eq!(jmatrix.col_len(1), 4);
    }
}
