use ndarray::Array2;

use crate::{MlErr, Result};

/// A row-wise sparse matrix, typically a list of posteriors per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    num_cols: usize,
    rows: Vec<Vec<(usize, f32)>>,
}

impl SparseMatrix {
    /// Creates a new `SparseMatrix`.
    ///
    /// # Arguments
    /// * `num_cols` - The amount of columns of the matrix.
    /// * `rows` - For each row, the `(column, value)` pairs that are non-zero.
    ///
    /// # Returns
    /// A new `SparseMatrix` or an error if a column index is out of bounds.
    pub fn new(num_cols: usize, rows: Vec<Vec<(usize, f32)>>) -> Result<Self> {
        for row in &rows {
            if let Some(&(col, _)) = row.iter().find(|(col, _)| *col >= num_cols) {
                return Err(MlErr::SizeMismatch {
                    what: "sparse matrix column index",
                    got: col,
                    expected: num_cols,
                });
            }
        }

        Ok(Self { num_cols, rows })
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    pub fn rows(&self) -> &[Vec<(usize, f32)>] {
        &self.rows
    }

    /// Returns the sum of every stored element.
    pub fn sum(&self) -> f32 {
        self.rows.iter().flatten().map(|&(_, v)| v).sum()
    }

    /// Decodes the matrix into a dense one, repeated column indices are added together.
    pub fn to_dense(&self) -> Array2<f32> {
        let mut dense = Array2::zeros((self.rows.len(), self.num_cols));

        for (r, row) in self.rows.iter().enumerate() {
            for &(c, v) in row {
                dense[(r, c)] += v;
            }
        }

        dense
    }
}
