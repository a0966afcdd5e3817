use ndarray::{linalg, prelude::*};
use rand::rngs::StdRng;

use super::Preconditioner;
use crate::arch::{Component, Propagated, UpdatableComponent};

/// A fully connected layer: `y = x·W + b`.
///
/// The parameters live in one flat buffer: the row-major `input_dim × output_dim` weights
/// followed by the `output_dim` biases.
#[derive(Debug, Clone)]
pub struct Affine {
    dim: (usize, usize),
    params: Vec<f32>,
    learning_rate: f32,
    max_change: f32,
    preconditioner: Option<Preconditioner>,
}

impl Affine {
    /// Creates a new `Affine` with every parameter set to zero.
    ///
    /// # Arguments
    /// * `dim` - The input and output dimensions.
    /// * `learning_rate` - The factor applied to the gradient on each update.
    /// * `max_change` - The maximum norm of a single update, `0` disables the limit.
    pub fn new(dim: (usize, usize), learning_rate: f32, max_change: f32) -> Self {
        Self {
            dim,
            params: vec![0.0; (dim.0 + 1) * dim.1],
            learning_rate,
            max_change,
            preconditioner: None,
        }
    }

    /// Replaces the weights and biases of the layer.
    ///
    /// # Returns
    /// `None` if the shapes don't match the layer's dimensions.
    pub fn with_params(mut self, weights: ArrayView2<f32>, biases: ArrayView1<f32>) -> Option<Self> {
        if weights.dim() != self.dim || biases.len() != self.dim.1 {
            return None;
        }

        let w_size = self.w_size();
        let (w, b) = self.params.split_at_mut(w_size);
        w.iter_mut().zip(weights.iter()).for_each(|(p, &v)| *p = v);
        b.iter_mut().zip(biases.iter()).for_each(|(p, &v)| *p = v);
        Some(self)
    }

    /// Enables the natural gradient preconditioner on this layer.
    pub fn with_natural_gradient(mut self, preconditioner: Preconditioner) -> Self {
        self.preconditioner = Some(preconditioner);
        self
    }

    pub fn preconditioner(&self) -> Option<&Preconditioner> {
        self.preconditioner.as_ref()
    }

    pub fn weights(&self) -> ArrayView2<'_, f32> {
        self.view_params().0
    }

    pub fn biases(&self) -> ArrayView1<'_, f32> {
        self.view_params().1
    }

    fn w_size(&self) -> usize {
        self.dim.0 * self.dim.1
    }

    /// Gives a view of the raw parameter buffer as the weights and biases of this layer.
    fn view_params(&self) -> (ArrayView2<'_, f32>, ArrayView1<'_, f32>) {
        let (w, b) = self.params.split_at(self.w_size());
        // `params` holds exactly `input_dim * output_dim` weights plus the biases since `new`.
        let weights = ArrayView2::from_shape(self.dim, w).unwrap();
        let biases = ArrayView1::from(b);
        (weights, biases)
    }
}

impl Component for Affine {
    fn type_name(&self) -> &'static str {
        "affine"
    }

    fn input_dim(&self) -> usize {
        self.dim.0
    }

    fn output_dim(&self) -> usize {
        self.dim.1
    }

    fn propagate(&self, input: ArrayView2<f32>, _rng: &mut StdRng) -> Propagated {
        let (w, b) = self.view_params();
        let mut z = Array2::zeros((input.nrows(), self.dim.1));
        linalg::general_mat_mul(1.0, &input, &w, 0.0, &mut z);
        z += &b;
        z.into()
    }

    fn backprop(
        &self,
        _input: ArrayView2<f32>,
        _output: ArrayView2<f32>,
        out_deriv: ArrayView2<f32>,
        _memo: Option<&Array2<f32>>,
    ) -> Array2<f32> {
        let (w, _) = self.view_params();
        let mut in_deriv = Array2::zeros((out_deriv.nrows(), self.dim.0));
        linalg::general_mat_mul(1.0, &out_deriv, &w.t(), 0.0, &mut in_deriv);
        in_deriv
    }

    fn is_updatable(&self) -> bool {
        true
    }

    fn as_updatable(&self) -> Option<&dyn UpdatableComponent> {
        Some(self)
    }

    fn as_updatable_mut(&mut self) -> Option<&mut dyn UpdatableComponent> {
        Some(self)
    }

    fn box_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }
}

impl UpdatableComponent for Affine {
    fn params(&self) -> &[f32] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    fn max_change(&self) -> f32 {
        self.max_change
    }

    fn freeze_natural_gradient(&mut self, freeze: bool) {
        if let Some(preconditioner) = &mut self.preconditioner {
            preconditioner.freeze(freeze);
        }
    }

    fn update(&mut self, input: ArrayView2<f32>, out_deriv: ArrayView2<f32>) {
        let mut dw = Array2::zeros(self.dim);
        linalg::general_mat_mul(1.0, &input.t(), &out_deriv, 0.0, &mut dw);
        let db = out_deriv.sum_axis(Axis(0));

        if let Some(preconditioner) = &mut self.preconditioner {
            preconditioner.precondition(input, dw.view_mut());
        }

        let lr = self.learning_rate;
        let w_size = self.w_size();
        let (w, b) = self.params.split_at_mut(w_size);
        w.iter_mut().zip(dw.iter()).for_each(|(p, &g)| *p += lr * g);
        b.iter_mut().zip(db.iter()).for_each(|(p, &g)| *p += lr * g);
    }
}
