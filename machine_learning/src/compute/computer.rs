use std::collections::HashMap;

use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;

use super::Computation;
use crate::{MlErr, Result, arch::Nnet, example::NnetIo};

/// What the objective evaluation needs from whoever runs a computation: reading the value of an
/// output and handing back the derivative of the objective with respect to it.
pub trait Executor {
    fn output(&self, name: &str) -> Result<ArrayView2<'_, f32>>;

    fn accept_output_deriv(&mut self, name: &str, deriv: Array2<f32>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AcceptingInputs,
    Forwarded,
    Backwarded,
}

/// Runs a compiled `Computation` on a network.
///
/// The forward pass reads the parameters of `nnet`, the backward pass adds the gradients (scaled
/// by each component's learning rate) into the network to update, when there's one. Component
/// statistics are stored in that same network.
pub struct NnetComputer<'a> {
    computation: &'a Computation,
    nnet: &'a Nnet,
    nnet_to_update: Option<&'a mut Nnet>,
    rng: &'a mut StdRng,
    values: Vec<Array2<f32>>,
    memos: Vec<Option<Array2<f32>>>,
    output_derivs: HashMap<String, Array2<f32>>,
    input_deriv: Option<Array2<f32>>,
    stage: Stage,
}

impl<'a> NnetComputer<'a> {
    /// Creates a new `NnetComputer`.
    ///
    /// # Arguments
    /// * `computation` - The plan to run.
    /// * `nnet` - The network whose parameters are used.
    /// * `nnet_to_update` - The network that receives the parameter derivatives, if any.
    /// * `rng` - The generator stochastic components draw from.
    pub fn new(
        computation: &'a Computation,
        nnet: &'a Nnet,
        nnet_to_update: Option<&'a mut Nnet>,
        rng: &'a mut StdRng,
    ) -> Self {
        Self {
            computation,
            nnet,
            nnet_to_update,
            rng,
            values: Vec::with_capacity(computation.depth + 1),
            memos: Vec::with_capacity(computation.depth),
            output_derivs: HashMap::new(),
            input_deriv: None,
            stage: Stage::AcceptingInputs,
        }
    }

    /// Accepts every stream of an example that feeds an input node, skipping the supervision.
    pub fn accept_inputs(&mut self, io: &[NnetIo]) -> Result<()> {
        for io in io {
            let node = self
                .nnet
                .node_index(&io.name)
                .ok_or_else(|| MlErr::UnknownNode(io.name.clone()))?;

            if self.nnet.is_input_node(node) {
                self.accept_input(&io.name, io.features.to_dense())?;
            }
        }

        Ok(())
    }

    pub fn accept_input(&mut self, name: &str, value: Array2<f32>) -> Result<()> {
        self.check_stage(Stage::AcceptingInputs, "to be accepting inputs")?;

        if name != self.computation.input {
            return Err(MlErr::NotAnInput(name.to_string()));
        }

        if value.ncols() != self.computation.input_dim {
            return Err(MlErr::SizeMismatch {
                what: "input columns",
                got: value.ncols(),
                expected: self.computation.input_dim,
            });
        }

        self.values.clear();
        self.values.push(value);
        Ok(())
    }

    /// Runs the forward pass.
    pub fn forward(&mut self) -> Result<()> {
        self.check_stage(Stage::AcceptingInputs, "to be accepting inputs")?;

        if self.values.is_empty() {
            return Err(MlErr::MissingInput(self.computation.input.clone()));
        }

        for c in 0..self.computation.depth {
            let propagated = self
                .nnet
                .component(c)
                .propagate(self.values[c].view(), self.rng);

            if self.computation.store_component_stats {
                if let Some(nnet) = self.nnet_to_update.as_deref_mut() {
                    nnet.component_mut(c).store_stats(propagated.output.view());
                }
            }

            self.values.push(propagated.output);
            self.memos.push(propagated.memo);
        }

        self.stage = Stage::Forwarded;
        Ok(())
    }

    /// Runs the backward pass, every output that needs a derivative must have received it.
    pub fn backward(&mut self) -> Result<()> {
        self.check_stage(Stage::Forwarded, "a finished forward pass")?;
        self.stage = Stage::Backwarded;

        let Some(top) = self.computation.deriv_depth() else {
            return Ok(());
        };

        for tap in self.computation.taps.iter().filter(|t| t.has_deriv) {
            if !self.output_derivs.contains_key(&tap.name) {
                return Err(MlErr::MissingInput(tap.name.clone()));
            }
        }

        let mut deriv: Option<Array2<f32>> = None;
        for depth in (0..=top).rev() {
            for tap in &self.computation.taps {
                if tap.depth != depth {
                    continue;
                }

                if let Some(tap_deriv) = self.output_derivs.remove(&tap.name) {
                    deriv = Some(match deriv {
                        Some(d) => d + tap_deriv,
                        None => tap_deriv,
                    });
                }
            }

            if depth == 0 {
                break;
            }

            let Some(out_deriv) = deriv.as_ref() else {
                continue;
            };

            let c = depth - 1;
            let input = self.values[c].view();
            let output = self.values[depth].view();

            if self.computation.need_model_derivative {
                if let Some(nnet) = self.nnet_to_update.as_deref_mut() {
                    if let Some(uc) = nnet.updatable_mut(c)? {
                        uc.update(input, out_deriv.view());
                    }
                }
            }

            deriv = if c > 0 || self.computation.need_input_deriv {
                let memo = self.memos[c].as_ref();
                Some(self.nnet.component(c).backprop(input, output, out_deriv.view(), memo))
            } else {
                None
            };
        }

        if self.computation.need_input_deriv {
            let input = &self.values[0];
            self.input_deriv = Some(deriv.unwrap_or_else(|| Array2::zeros(input.raw_dim())));
        }

        Ok(())
    }

    /// Takes the derivative of the objective with respect to an input, after the backward pass.
    pub fn take_input_deriv(&mut self, name: &str) -> Result<Array2<f32>> {
        self.check_stage(Stage::Backwarded, "a finished backward pass")?;

        if name != self.computation.input || !self.computation.need_input_deriv {
            return Err(MlErr::NotAnInput(name.to_string()));
        }

        self.input_deriv.take().ok_or(MlErr::ComputerState {
            expected: "an input derivative that wasn't taken yet",
        })
    }

    fn check_stage(&self, stage: Stage, expected: &'static str) -> Result<()> {
        if self.stage != stage {
            return Err(MlErr::ComputerState { expected });
        }

        Ok(())
    }
}

impl Executor for NnetComputer<'_> {
    fn output(&self, name: &str) -> Result<ArrayView2<'_, f32>> {
        if self.stage == Stage::AcceptingInputs {
            return Err(MlErr::ComputerState {
                expected: "a finished forward pass",
            });
        }

        let tap = self
            .computation
            .tap(name)
            .ok_or_else(|| MlErr::NotAnOutput(name.to_string()))?;

        Ok(self.values[tap.depth].view())
    }

    fn accept_output_deriv(&mut self, name: &str, deriv: Array2<f32>) -> Result<()> {
        self.check_stage(Stage::Forwarded, "a finished forward pass")?;

        let tap = self
            .computation
            .tap(name)
            .filter(|t| t.has_deriv)
            .ok_or_else(|| MlErr::NotAnOutput(name.to_string()))?;

        let value = &self.values[tap.depth];
        if deriv.dim() != value.dim() {
            return Err(MlErr::SizeMismatch {
                what: "output derivative",
                got: deriv.len(),
                expected: value.len(),
            });
        }

        self.output_derivs.insert(name.to_string(), deriv);
        Ok(())
    }
}
