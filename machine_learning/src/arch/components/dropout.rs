use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand_distr::{Bernoulli, Distribution};

use crate::arch::{Component, Propagated};

/// Zeroes each value with probability `proportion`, rescaling the survivors so the expected
/// output equals the input. The mask is drawn from the generator handed to `propagate`.
#[derive(Debug, Clone)]
pub struct Dropout {
    dim: usize,
    proportion: f32,
}

impl Dropout {
    /// Creates a new `Dropout`.
    ///
    /// # Returns
    /// `None` unless `proportion` is in `[0, 1)`.
    pub fn new(dim: usize, proportion: f32) -> Option<Self> {
        if !(0.0..1.0).contains(&proportion) {
            return None;
        }

        Some(Self { dim, proportion })
    }
}

impl Component for Dropout {
    fn type_name(&self) -> &'static str {
        "dropout"
    }

    fn input_dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.dim
    }

    fn propagate(&self, input: ArrayView2<f32>, rng: &mut StdRng) -> Propagated {
        if self.proportion == 0.0 {
            return input.to_owned().into();
        }

        // `new` guarantees the probability is valid.
        let Ok(keep) = Bernoulli::new(1.0 - self.proportion as f64) else {
            return input.to_owned().into();
        };

        let scale = 1.0 / (1.0 - self.proportion);
        let mask = Array2::from_shape_simple_fn(input.raw_dim(), || {
            if keep.sample(&mut *rng) { scale } else { 0.0 }
        });

        Propagated {
            output: &input * &mask,
            memo: Some(mask),
        }
    }

    fn backprop(
        &self,
        _input: ArrayView2<f32>,
        _output: ArrayView2<f32>,
        out_deriv: ArrayView2<f32>,
        memo: Option<&Array2<f32>>,
    ) -> Array2<f32> {
        match memo {
            Some(mask) => &out_deriv * mask,
            None => out_deriv.to_owned(),
        }
    }

    fn box_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn invalid_proportions_are_rejected() {
        assert!(Dropout::new(2, 1.0).is_none());
        assert!(Dropout::new(2, -0.1).is_none());
    }

    #[test]
    fn same_seed_same_mask() {
        let dropout = Dropout::new(8, 0.5).unwrap();
        let x = Array2::<f32>::ones((4, 8));

        let a = dropout.propagate(x.view(), &mut StdRng::seed_from_u64(7));
        let b = dropout.propagate(x.view(), &mut StdRng::seed_from_u64(7));

        assert_eq!(a.output, b.output);
        assert!(a.output.iter().all(|&v| v == 0.0 || v == 2.0));
    }

    #[test]
    fn backprop_applies_the_mask() {
        let dropout = Dropout::new(8, 0.5).unwrap();
        let x = Array2::<f32>::ones((4, 8));
        let p = dropout.propagate(x.view(), &mut StdRng::seed_from_u64(3));
        let d = dropout.backprop(x.view(), p.output.view(), x.view(), p.memo.as_ref());
        assert_eq!(d, p.output);
    }
}
