mod compressed;
mod sparse;

pub use compressed::{CompressedMatrix, CompressionMethod};
pub use sparse::SparseMatrix;

use std::borrow::Cow;

use ndarray::Array2;

/// A feature or supervision matrix in one of the encodings an example can carry.
///
/// Whatever the encoding, every consumer goes through `dense`, so the encoding only affects
/// memory and compute cost, never the values seen by the objective computation.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneralMatrix {
    Sparse(SparseMatrix),
    Full(Array2<f32>),
    Compressed(CompressedMatrix),
}

impl GeneralMatrix {
    /// Returns the amount of rows of the matrix.
    pub fn num_rows(&self) -> usize {
        match self {
            GeneralMatrix::Sparse(m) => m.num_rows(),
            GeneralMatrix::Full(m) => m.nrows(),
            GeneralMatrix::Compressed(m) => m.num_rows(),
        }
    }

    /// Returns the amount of columns of the matrix.
    pub fn num_cols(&self) -> usize {
        match self {
            GeneralMatrix::Sparse(m) => m.num_cols(),
            GeneralMatrix::Full(m) => m.ncols(),
            GeneralMatrix::Compressed(m) => m.num_cols(),
        }
    }

    /// Returns the sum of every element of the matrix.
    pub fn sum(&self) -> f32 {
        match self {
            GeneralMatrix::Sparse(m) => m.sum(),
            GeneralMatrix::Full(m) => m.sum(),
            GeneralMatrix::Compressed(m) => m.to_dense().sum(),
        }
    }

    /// Materializes a dense view of the matrix.
    ///
    /// # Returns
    /// A borrowed matrix for the full encoding, an owned decoded one otherwise.
    pub fn dense(&self) -> Cow<'_, Array2<f32>> {
        match self {
            GeneralMatrix::Full(m) => Cow::Borrowed(m),
            GeneralMatrix::Sparse(m) => Cow::Owned(m.to_dense()),
            GeneralMatrix::Compressed(m) => Cow::Owned(m.to_dense()),
        }
    }

    /// Materializes an owned dense copy of the matrix.
    pub fn to_dense(&self) -> Array2<f32> {
        self.dense().into_owned()
    }

    /// A short name for the encoding, used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            GeneralMatrix::Sparse(_) => "sparse",
            GeneralMatrix::Full(_) => "full",
            GeneralMatrix::Compressed(_) => "compressed",
        }
    }
}

impl From<Array2<f32>> for GeneralMatrix {
    fn from(value: Array2<f32>) -> Self {
        Self::Full(value)
    }
}

impl From<SparseMatrix> for GeneralMatrix {
    fn from(value: SparseMatrix) -> Self {
        Self::Sparse(value)
    }
}

impl From<CompressedMatrix> for GeneralMatrix {
    fn from(value: CompressedMatrix) -> Self {
        Self::Compressed(value)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn all_encodings_materialize_to_the_same_dense_matrix() {
        let full = array![[0.0, 0.0, 1.0, 0.0], [0.0, 1.0, 0.0, 0.0]];
        let sparse = SparseMatrix::new(4, vec![vec![(2, 1.0)], vec![(1, 1.0)]]).unwrap();
        let compressed = CompressedMatrix::new(full.view(), CompressionMethod::OneByte);

        let encodings = [
            GeneralMatrix::from(full.clone()),
            GeneralMatrix::from(sparse),
            GeneralMatrix::from(compressed),
        ];

        for m in &encodings {
            assert_eq!(m.num_rows(), 2, "{}", m.kind());
            assert_eq!(m.num_cols(), 4, "{}", m.kind());
            assert_eq!(*m.dense(), full, "{}", m.kind());
        }
    }

    #[test]
    fn full_matrices_are_borrowed() {
        let m = GeneralMatrix::from(array![[1.0_f32]]);
        assert!(matches!(m.dense(), Cow::Borrowed(_)));
    }
}
