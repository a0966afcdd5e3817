use ndarray::{Array1, ArrayView1, ArrayView2, ArrayViewMut2, Axis};

const EPSILON: f32 = 1e-4;

/// A diagonal approximation of the natural gradient for an `Affine` layer.
///
/// It keeps a running estimate of the power of each input dimension and rescales the rows of
/// the weight gradient by its inverse square root, then restores the original gradient norm so
/// only the direction of the step changes. The estimate is only updated while not frozen.
#[derive(Debug, Clone)]
pub struct Preconditioner {
    alpha: f32,
    power: Option<Array1<f32>>,
    frozen: bool,
    num_updates: usize,
}

impl Preconditioner {
    /// Creates a new `Preconditioner`.
    ///
    /// # Arguments
    /// * `alpha` - The weight of each new batch in the running estimate, in `(0, 1]`.
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(f32::EPSILON, 1.0),
            power: None,
            frozen: false,
            num_updates: 0,
        }
    }

    pub fn freeze(&mut self, freeze: bool) {
        self.frozen = freeze;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// The amount of batches the running estimate has absorbed.
    pub fn num_updates(&self) -> usize {
        self.num_updates
    }

    pub fn power(&self) -> Option<ArrayView1<'_, f32>> {
        self.power.as_ref().map(|p| p.view())
    }

    /// Rescales a weight gradient in place.
    ///
    /// # Arguments
    /// * `input` - The layer's input for this batch, one row per frame.
    /// * `grad` - The `input_dim × output_dim` weight gradient.
    pub fn precondition(&mut self, input: ArrayView2<f32>, mut grad: ArrayViewMut2<f32>) {
        if input.nrows() == 0 {
            return;
        }

        let batch_power = input.mapv(|x| x * x).mean_axis(Axis(0));
        let Some(batch_power) = batch_power else {
            return;
        };

        if !self.frozen {
            let alpha = self.alpha;
            let power = match self.power.take() {
                Some(power) => power * (1.0 - alpha) + &batch_power * alpha,
                None => batch_power.clone(),
            };
            self.power = Some(power);
            self.num_updates += 1;
        }

        let power = self.power.as_ref().unwrap_or(&batch_power);
        let norm_before = grad.iter().map(|g| g * g).sum::<f32>().sqrt();

        for (mut row, &p) in grad.axis_iter_mut(Axis(0)).zip(power.iter()) {
            row.mapv_inplace(|g| g / (p + EPSILON).sqrt());
        }

        let norm_after = grad.iter().map(|g| g * g).sum::<f32>().sqrt();
        if norm_after > 0.0 && norm_after.is_finite() {
            let rescale = norm_before / norm_after;
            grad.mapv_inplace(|g| g * rescale);
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array};

    use super::*;

    fn norm(m: &Array2<f32>) -> f32 {
        m.iter().map(|g| g * g).sum::<f32>().sqrt()
    }

    #[test]
    fn gradient_norm_is_preserved() {
        let mut p = Preconditioner::new(0.5);
        let x = array![[10.0, 0.1], [5.0, 0.2]];
        let mut grad = array![[1.0, 2.0], [3.0, 4.0]];
        let before = norm(&grad);

        p.precondition(x.view(), grad.view_mut());

        assert!((norm(&grad) - before).abs() < 1e-4);
        // The low power input dimension gets the larger share.
        assert!(grad[(1, 0)] / grad[(0, 0)] > 3.0);
    }

    #[test]
    fn frozen_preconditioner_keeps_its_statistics() {
        let mut p = Preconditioner::new(0.5);
        let x = array![[1.0, 1.0]];
        p.precondition(x.view(), Array2::zeros((2, 1)).view_mut());
        let power = p.power().unwrap().to_owned();

        p.freeze(true);
        let x = array![[4.0, 4.0]];
        p.precondition(x.view(), Array2::zeros((2, 1)).view_mut());

        assert_eq!(p.power().unwrap(), power);
        assert_eq!(p.num_updates(), 1);

        p.freeze(false);
        p.precondition(x.view(), Array2::zeros((2, 1)).view_mut());
        assert_eq!(p.num_updates(), 2);
        assert_ne!(p.power().unwrap(), power);
    }
}
