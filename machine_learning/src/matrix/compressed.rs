use ndarray::{Array2, ArrayView2};

/// The width of the codes used to quantize a `CompressedMatrix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    #[default]
    OneByte,
    TwoByte,
}

impl CompressionMethod {
    fn max_code(self) -> u16 {
        match self {
            CompressionMethod::OneByte => u8::MAX as u16,
            CompressionMethod::TwoByte => u16::MAX,
        }
    }
}

/// A lossy matrix encoding: every value is quantized linearly between the global minimum and
/// maximum of the matrix. Values equal to the minimum or the maximum survive exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedMatrix {
    num_rows: usize,
    num_cols: usize,
    min_value: f32,
    range: f32,
    method: CompressionMethod,
    codes: Vec<u16>,
}

impl CompressedMatrix {
    /// Compresses a dense matrix.
    ///
    /// # Arguments
    /// * `mat` - The matrix to encode.
    /// * `method` - The code width.
    ///
    /// # Returns
    /// A new `CompressedMatrix`.
    pub fn new(mat: ArrayView2<f32>, method: CompressionMethod) -> Self {
        let (min_value, max_value) = mat
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });

        let (min_value, range) = if mat.is_empty() {
            (0.0, 1.0)
        } else if max_value > min_value {
            (min_value, max_value - min_value)
        } else {
            (min_value, 1.0)
        };

        let max_code = method.max_code() as f32;
        let codes = mat
            .iter()
            .map(|&v| (((v - min_value) / range) * max_code).round().clamp(0.0, max_code) as u16)
            .collect();

        Self {
            num_rows: mat.nrows(),
            num_cols: mat.ncols(),
            min_value,
            range,
            method,
            codes,
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    pub fn method(&self) -> CompressionMethod {
        self.method
    }

    /// Decodes the matrix.
    pub fn to_dense(&self) -> Array2<f32> {
        let max_code = self.method.max_code() as f32;
        let values = self
            .codes
            .iter()
            .map(|&code| {
                if code == 0 {
                    self.min_value
                } else {
                    self.min_value + self.range * (code as f32 / max_code)
                }
            })
            .collect();

        // `codes` was built from a matrix with this exact shape.
        Array2::from_shape_vec((self.num_rows, self.num_cols), values)
            .unwrap_or_else(|_| Array2::zeros((self.num_rows, self.num_cols)))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn extremes_survive_compression() {
        let m = array![[0.0, 0.0, 1.0, 0.0]];
        let c = CompressedMatrix::new(m.view(), CompressionMethod::OneByte);
        assert_eq!(c.to_dense(), m);
    }

    #[test]
    fn intermediate_values_are_within_one_step() {
        let m = array![[-1.0, 0.3], [0.7, 2.0]];

        for (method, step) in [
            (CompressionMethod::OneByte, 3.0 / 255.0),
            (CompressionMethod::TwoByte, 3.0 / 65535.0),
        ] {
            let c = CompressedMatrix::new(m.view(), method);
            let decoded = c.to_dense();
            for (a, b) in decoded.iter().zip(m.iter()) {
                assert!((a - b).abs() <= step, "{method:?}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn constant_matrices_decode_exactly() {
        let m = array![[3.5, 3.5], [3.5, 3.5]];
        let c = CompressedMatrix::new(m.view(), CompressionMethod::OneByte);
        assert_eq!(c.to_dense(), m);
    }
}
