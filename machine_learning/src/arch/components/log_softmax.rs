use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;

use crate::arch::{Component, Propagated};

/// Normalizes each row into log-probabilities, so a linear objective against a posterior is a
/// cross-entropy.
#[derive(Debug, Clone)]
pub struct LogSoftmax {
    dim: usize,
}

impl LogSoftmax {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Component for LogSoftmax {
    fn type_name(&self) -> &'static str {
        "log_softmax"
    }

    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn propagate(&self, input: ArrayView2<f32>, _rng: &mut StdRng) -> Propagated {
        let mut out = input.to_owned();

        for mut row in out.axis_iter_mut(Axis(0)) {
            let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
            let log_sum = row.fold(0.0, |acc, &x| acc + (x - max).exp()).ln() + max;
            row.mapv_inplace(|x| x - log_sum);
        }

        out.into()
    }

    fn backprop(
        &self,
        _input: ArrayView2<f32>,
        output: ArrayView2<f32>,
        out_deriv: ArrayView2<f32>,
        _memo: Option<&Array2<f32>>,
    ) -> Array2<f32> {
        let mut in_deriv = out_deriv.to_owned();

        for (mut d, y) in in_deriv.axis_iter_mut(Axis(0)).zip(output.axis_iter(Axis(0))) {
            let total = d.sum();
            d.zip_mut_with(&y, |d, &y| *d -= y.exp() * total);
        }

        in_deriv
    }

    fn box_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn rows_are_normalized() {
        let mut rng = StdRng::seed_from_u64(0);
        let x = array![[1.0, 2.0, 3.0], [100.0, 100.0, 100.0]];
        let y = LogSoftmax::new(3).propagate(x.view(), &mut rng).output;

        for row in y.axis_iter(Axis(0)) {
            let total: f32 = row.iter().map(|v| v.exp()).sum();
            assert!((total - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn derivative_of_a_one_hot_posterior() {
        let mut rng = StdRng::seed_from_u64(0);
        let ls = LogSoftmax::new(2);
        let x = array![[0.0, 0.0]];
        let y = ls.propagate(x.view(), &mut rng).output;
        let d = ls.backprop(x.view(), y.view(), array![[1.0, 0.0]].view(), None);

        assert!((d[(0, 0)] - 0.5).abs() < 1e-6);
        assert!((d[(0, 1)] + 0.5).abs() < 1e-6);
    }
}
