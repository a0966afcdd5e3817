use std::fmt;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;

use crate::{MlErr, Result};

/// The result of propagating a batch through a component.
#[derive(Debug)]
pub struct Propagated {
    pub output: Array2<f32>,
    /// Whatever the component needs to remember from the forward pass to run the backward one.
    pub memo: Option<Array2<f32>>,
}

impl From<Array2<f32>> for Propagated {
    fn from(output: Array2<f32>) -> Self {
        Self { output, memo: None }
    }
}

/// A building block of an `Nnet`.
///
/// Whether a component owns learnable parameters is an explicit capability: a component that
/// answers `true` to `is_updatable` must also hand out its `UpdatableComponent` interface.
pub trait Component: fmt::Debug + Send + Sync {
    /// A short name for the kind of component, e.g. `"affine"`.
    fn type_name(&self) -> &'static str;

    fn input_dim(&self) -> usize;

    fn output_dim(&self) -> usize;

    /// Computes the output of the component for a batch of rows.
    ///
    /// # Arguments
    /// * `input` - The input batch, one row per frame.
    /// * `rng` - The generator every stochastic behavior must draw from.
    fn propagate(&self, input: ArrayView2<f32>, rng: &mut StdRng) -> Propagated;

    /// Computes the derivative of the objective with respect to the input of the component.
    ///
    /// # Arguments
    /// * `input` - The input given to `propagate`.
    /// * `output` - The output returned by `propagate`.
    /// * `out_deriv` - The derivative of the objective with respect to `output`.
    /// * `memo` - The memo returned by `propagate`.
    fn backprop(
        &self,
        input: ArrayView2<f32>,
        output: ArrayView2<f32>,
        out_deriv: ArrayView2<f32>,
        memo: Option<&Array2<f32>>,
    ) -> Array2<f32>;

    fn is_updatable(&self) -> bool {
        false
    }

    fn as_updatable(&self) -> Option<&dyn UpdatableComponent> {
        None
    }

    fn as_updatable_mut(&mut self) -> Option<&mut dyn UpdatableComponent> {
        None
    }

    /// Accumulates diagnostics about the values this component outputs.
    fn store_stats(&mut self, _output: ArrayView2<f32>) {}

    fn stats(&self) -> Option<&ComponentStats> {
        None
    }

    fn stats_mut(&mut self) -> Option<&mut ComponentStats> {
        None
    }

    fn box_clone(&self) -> Box<dyn Component>;
}

impl Clone for Box<dyn Component> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// The interface of the components that own learnable parameters.
///
/// Parameters are exposed as a single flat slice, so whole-model arithmetic (scaling, adding a
/// delta, dot products) doesn't need to know about the layout of each component.
pub trait UpdatableComponent: Component {
    fn params(&self) -> &[f32];

    fn params_mut(&mut self) -> &mut [f32];

    fn learning_rate(&self) -> f32;

    /// The maximum norm a single update of this component may have, `0` disables the limit.
    fn max_change(&self) -> f32;

    /// Stops (or resumes) the adaptation of the natural gradient statistics, if any.
    fn freeze_natural_gradient(&mut self, _freeze: bool) {}

    /// Adds `learning_rate` times the gradient of the objective with respect to the parameters.
    ///
    /// # Arguments
    /// * `input` - The input the component saw on the forward pass.
    /// * `out_deriv` - The derivative of the objective with respect to the component's output.
    fn update(&mut self, input: ArrayView2<f32>, out_deriv: ArrayView2<f32>);

    fn dot_product(&self, other: &dyn UpdatableComponent) -> f32 {
        self.params()
            .iter()
            .zip(other.params())
            .map(|(&a, &b)| a as f64 * b as f64)
            .sum::<f64>() as f32
    }

    fn scale(&mut self, alpha: f32) {
        if alpha == 0.0 {
            self.params_mut().fill(0.0);
        } else {
            self.params_mut().iter_mut().for_each(|p| *p *= alpha);
        }
    }

    /// Adds `alpha` times the parameters of `other` into these.
    fn add(&mut self, alpha: f32, other: &dyn UpdatableComponent) -> Result<()> {
        let (got, expected) = (other.params().len(), self.params().len());
        if got != expected {
            return Err(MlErr::SizeMismatch {
                what: "component parameters",
                got,
                expected,
            });
        }

        self.params_mut()
            .iter_mut()
            .zip(other.params())
            .for_each(|(p, &o)| *p += alpha * o);

        Ok(())
    }
}

/// Diagnostics accumulated by nonlinearities: how many frames they saw and the sum of their
/// outputs per dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentStats {
    count: f64,
    value_sum: Array1<f64>,
}

impl ComponentStats {
    pub fn new(dim: usize) -> Self {
        Self {
            count: 0.0,
            value_sum: Array1::zeros(dim),
        }
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn value_sum(&self) -> &Array1<f64> {
        &self.value_sum
    }

    pub fn zero(&mut self) {
        self.count = 0.0;
        self.value_sum.fill(0.0);
    }

    pub fn scale(&mut self, alpha: f32) {
        let alpha = alpha as f64;
        self.count *= alpha;
        self.value_sum.mapv_inplace(|v| v * alpha);
    }

    pub fn add(&mut self, alpha: f32, other: &ComponentStats) -> Result<()> {
        if other.value_sum.len() != self.value_sum.len() {
            return Err(MlErr::SizeMismatch {
                what: "component stats",
                got: other.value_sum.len(),
                expected: self.value_sum.len(),
            });
        }

        let alpha = alpha as f64;
        self.count += alpha * other.count;
        self.value_sum.scaled_add(alpha, &other.value_sum);
        Ok(())
    }

    pub fn accumulate(&mut self, output: ArrayView2<f32>) {
        self.count += output.nrows() as f64;
        self.value_sum += &output.sum_axis(Axis(0)).mapv(f64::from);
    }
}
