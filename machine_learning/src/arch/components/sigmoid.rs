use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;

use crate::arch::{Component, ComponentStats, Propagated};

/// The logistic nonlinearity. Optionally keeps statistics of the values it outputs.
#[derive(Debug, Clone)]
pub struct Sigmoid {
    dim: usize,
    stats: ComponentStats,
}

impl Sigmoid {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            stats: ComponentStats::new(dim),
        }
    }

    fn sigmoid(z: f32) -> f32 {
        1. / (1. + (-z).exp())
    }
}

impl Component for Sigmoid {
    fn type_name(&self) -> &'static str {
        "sigmoid"
    }

    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn propagate(&self, input: ArrayView2<f32>, _rng: &mut StdRng) -> Propagated {
        input.mapv(Self::sigmoid).into()
    }

    fn backprop(
        &self,
        _input: ArrayView2<f32>,
        output: ArrayView2<f32>,
        out_deriv: ArrayView2<f32>,
        _memo: Option<&Array2<f32>>,
    ) -> Array2<f32> {
        let mut d = out_deriv.to_owned();
        d.zip_mut_with(&output, |d, &a| *d *= a * (1. - a));
        d
    }

    fn store_stats(&mut self, output: ArrayView2<f32>) {
        self.stats.accumulate(output);
    }

    fn stats(&self) -> Option<&ComponentStats> {
        Some(&self.stats)
    }

    fn stats_mut(&mut self) -> Option<&mut ComponentStats> {
        Some(&mut self.stats)
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
    fn derivative_matches_finite_differences() {
        let s = Sigmoid::new(1);
        let mut rng = StdRng::seed_from_u64(0);
        let x = array![[0.3_f32]];
        let y = s.propagate(x.view(), &mut rng).output;
        let d = s.backprop(x.view(), y.view(), array![[1.0]].view(), None);

        let h = 1e-3;
        let numeric = (Sigmoid::sigmoid(0.3 + h) - Sigmoid::sigmoid(0.3 - h)) / (2. * h);
        assert!((d[(0, 0)] - numeric).abs() < 1e-3);
    }

    #[test]
    fn stats_accumulate_outputs() {
        let mut s = Sigmoid::new(2);
        s.store_stats(array![[0.5, 0.25], [0.5, 0.75]].view());
        let stats = s.stats().unwrap();
        assert_eq!(stats.count(), 2.0);
        assert_eq!(stats.value_sum(), &array![1.0, 1.0]);
    }
}
