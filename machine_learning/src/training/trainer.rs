use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, BufWriter, Write},
};

use ndarray::{Array2, s};
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{
    MaxChangeStats, ObjectiveFunctionInfo, TrainerConfig, compute_accuracy,
    compute_objective_function, update_nnet_with_max_change,
};
use crate::{
    MlErr, Result,
    arch::{Nnet, ObjectiveType},
    compute::{CachingCompiler, Computation, ComputationRequest, Executor, NnetComputer},
    example::NnetExample,
    matrix::GeneralMatrix,
};

const BACKSTITCH_SUFFIX: &str = "_backstitch";

/// Trains a network one minibatch at a time.
///
/// The gradients of each minibatch are accumulated in a delta network which is then added to the
/// model under the max-change limits. With momentum, part of the delta is kept for the next
/// minibatch. With backstitch, some minibatches are trained twice: first a step against the
/// gradient, then a larger step along it.
pub struct NnetTrainer<'a> {
    config: TrainerConfig,
    nnet: &'a mut Nnet,
    delta_nnet: Nnet,
    compiler: CachingCompiler,
    num_minibatches_processed: usize,
    max_change_stats: MaxChangeStats,
    outputs: OutputStats,
    srand_seed: u64,
    rng: StdRng,
}

impl<'a> NnetTrainer<'a> {
    /// Creates a new `NnetTrainer`.
    ///
    /// # Arguments
    /// * `config` - The options of the training.
    /// * `nnet` - The network to train.
    ///
    /// # Returns
    /// A new `NnetTrainer` or an error if the config is invalid or the network inconsistent.
    pub fn new(config: TrainerConfig, nnet: &'a mut Nnet) -> Result<Self> {
        config.validate()?;

        if config.zero_component_stats {
            nnet.zero_component_stats();
        }

        let mut delta_nnet = nnet.clone();
        delta_nnet.scale(0.0);
        let max_change_stats = MaxChangeStats::new(&delta_nnet)?;

        let mut compiler = CachingCompiler::new();
        if let Some(path) = &config.read_cache {
            let read = File::open(path)
                .map_err(MlErr::from)
                .and_then(|file| compiler.read_cache(BufReader::new(file)));

            match read {
                Ok(()) => log::info!("Read computation cache from {}", path.display()),
                Err(e) => log::warn!(
                    "Could not open cached computation ({e}). Probably this is the first training iteration."
                ),
            }
        }

        let srand_seed = match config.srand_seed {
            Some(seed) => seed as u64,
            None => rand::rng().random_range(0..100_000),
        };

        log::debug!(
            srand_seed,
            updatable_components = max_change_stats.per_component().len();
            "trainer ready"
        );

        Ok(Self {
            config,
            nnet,
            delta_nnet,
            compiler,
            num_minibatches_processed: 0,
            max_change_stats,
            outputs: OutputStats::default(),
            srand_seed,
            rng: StdRng::seed_from_u64(srand_seed),
        })
    }

    /// Trains on one minibatch.
    pub fn train(&mut self, eg: &NnetExample) -> Result<()> {
        let request = ComputationRequest::from_example(
            self.nnet,
            eg,
            true,
            self.config.store_component_stats,
        )?;
        let computation = self.compiler.compile(self.nnet, &request)?;

        if self.is_backstitch_minibatch() {
            let seed = self.srand_seed + self.num_minibatches_processed as u64;

            self.delta_nnet.freeze_natural_gradient(true)?;
            self.train_internal(eg, &computation, true, &mut StdRng::seed_from_u64(seed))?;
            self.delta_nnet.freeze_natural_gradient(false)?;
            self.train_internal(eg, &computation, false, &mut StdRng::seed_from_u64(seed))?;
        } else {
            let mut rng = self.rng.clone();
            self.train_internal(eg, &computation, false, &mut rng)?;
            self.rng = rng;
        }

        self.num_minibatches_processed += 1;
        Ok(())
    }

    fn is_backstitch_minibatch(&self) -> bool {
        self.config.backstitch_enabled()
            && self.num_minibatches_processed % self.config.backstitch_training_interval == 0
    }

    fn train_internal(
        &mut self,
        eg: &NnetExample,
        computation: &Computation,
        is_backstitch_step: bool,
        rng: &mut StdRng,
    ) -> Result<()> {
        let mut computer = NnetComputer::new(computation, self.nnet, Some(&mut self.delta_nnet), rng);
        computer.accept_inputs(&eg.io)?;
        computer.forward()?;

        self.outputs.process_outputs(
            self.nnet,
            eg,
            &mut computer,
            is_backstitch_step,
            self.config.print_interval,
            self.num_minibatches_processed,
        )?;

        computer.backward()?;
        drop(computer);

        let (max_change_scale, scale_adding, scale_delta_nnet) = self.update_scales(is_backstitch_step);

        let success = update_nnet_with_max_change(
            &self.delta_nnet,
            self.config.max_param_change,
            max_change_scale,
            scale_adding,
            self.nnet,
            &mut self.max_change_stats,
        )?;

        if success {
            self.delta_nnet.scale(scale_delta_nnet);
        } else {
            self.delta_nnet.scale(0.0);
        }

        Ok(())
    }

    /// Returns the max-change scale, the scale the delta is added with and the scale the delta
    /// keeps afterwards.
    fn update_scales(&self, is_backstitch_step: bool) -> (f32, f32, f32) {
        let backstitch_scale = self.config.backstitch_training_scale;

        if !self.is_backstitch_minibatch() {
            let momentum = self.config.momentum;
            (1.0, 1.0 - momentum, momentum)
        } else if is_backstitch_step {
            (backstitch_scale, -backstitch_scale, 0.0)
        } else {
            (1.0 + backstitch_scale, 1.0 + backstitch_scale, 0.0)
        }
    }

    /// Logs the lifetime statistics of every output, their accuracies and the max-change stats.
    ///
    /// # Returns
    /// Whether any objective was ever accumulated.
    pub fn print_total_stats(&self) -> bool {
        let mut ans = false;
        for (name, info) in sorted(&self.outputs.objf_info) {
            ans |= info.print_total_stats(name);
        }

        log::info!("The following line is for accuracy.");
        for (name, info) in sorted(&self.outputs.accuracy_info) {
            info.print_total_stats(name);
        }

        self.print_max_change_stats();
        ans
    }

    pub fn print_max_change_stats(&self) {
        self.max_change_stats
            .print(self.num_minibatches_processed, self.config.backstitch_enabled());
    }

    /// Moves the inputs of `eg_perturbed` against the derivative of the objective computed on
    /// `eg`, normalized to unit norm per example of the minibatch.
    ///
    /// The derivatives are computed without touching the model, though the objectives of the
    /// pass are accumulated in the statistics.
    ///
    /// # Arguments
    /// * `eg` - The minibatch the derivatives are computed on.
    /// * `eg_perturbed` - The minibatch whose inputs are replaced, usually a copy of `eg`.
    pub fn perturb_input_with_input_deriv(
        &mut self,
        eg: &NnetExample,
        eg_perturbed: &mut NnetExample,
    ) -> Result<()> {
        let request = ComputationRequest::from_example(
            self.nnet,
            eg,
            true,
            self.config.store_component_stats,
        )?
        .with_input_derivs();
        let computation = self.compiler.compile(self.nnet, &request)?;

        let minibatch_size = self.minibatch_size(eg);
        if minibatch_size == 0 {
            return Err(MlErr::EmptyRequest { what: "outputs" });
        }

        let mut nnet_temp = self.nnet.clone();
        let mut rng = self.rng.clone();
        let mut computer = NnetComputer::new(&computation, self.nnet, Some(&mut nnet_temp), &mut rng);
        computer.accept_inputs(&eg.io)?;
        computer.forward()?;

        self.outputs.process_outputs(
            self.nnet,
            eg,
            &mut computer,
            false,
            self.config.print_interval,
            self.num_minibatches_processed,
        )?;

        computer.backward()?;

        let mut derivs = Vec::new();
        for (i, io) in eg_perturbed.io.iter().enumerate() {
            let node = self
                .nnet
                .node_index(&io.name)
                .ok_or_else(|| MlErr::UnknownNode(io.name.clone()))?;

            if self.nnet.is_input_node(node) {
                let deriv = computer.take_input_deriv(&io.name)?;
                check_perturbed_shape(&io.features, &deriv)?;
                derivs.push((i, deriv));
            }
        }

        drop(computer);
        self.rng = rng;

        let mut deriv_norm_sqr = vec![0.0f32; minibatch_size];
        for (i, deriv) in &derivs {
            let block_size = eg_perturbed.io[*i].features.num_rows() / minibatch_size;
            for (j, norm_sqr) in deriv_norm_sqr.iter_mut().enumerate() {
                let block = deriv.slice(s![j * block_size..(j + 1) * block_size, ..]);
                *norm_sqr += block.iter().map(|d| d * d).sum::<f32>();
            }
        }

        for (i, mut deriv) in derivs {
            let block_size = eg_perturbed.io[i].features.num_rows() / minibatch_size;
            for (j, &norm_sqr) in deriv_norm_sqr.iter().enumerate() {
                if norm_sqr != 0.0 {
                    let scale = 1.0 / norm_sqr.sqrt();
                    deriv
                        .slice_mut(s![j * block_size..(j + 1) * block_size, ..])
                        .mapv_inplace(|d| d * scale);
                }
            }

            let io = &mut eg_perturbed.io[i];
            let mut input: Array2<f32> = io.features.to_dense();
            input.scaled_add(-self.config.perturb_epsilon, &deriv);
            io.features = GeneralMatrix::Full(input);
        }

        Ok(())
    }

    /// The amount of examples in a minibatch, i.e. the rows of its first output.
    fn minibatch_size(&self, eg: &NnetExample) -> usize {
        eg.io
            .iter()
            .find(|io| {
                self.nnet
                    .node_index(&io.name)
                    .is_some_and(|n| self.nnet.is_output_node(n))
            })
            .map_or(0, |io| io.features.num_rows())
    }

    /// Finishes training, writing the computation cache if asked to.
    pub fn finish(self) -> Result<()> {
        if let Some(path) = &self.config.write_cache {
            let mut writer = BufWriter::new(File::create(path)?);
            self.compiler
                .write_cache(&mut writer, self.config.binary_write_cache)?;
            writer.flush()?;

            log::info!("Wrote computation cache to {}", path.display());
        }

        Ok(())
    }

    pub fn num_minibatches_processed(&self) -> usize {
        self.num_minibatches_processed
    }

    pub fn nnet(&self) -> &Nnet {
        self.nnet
    }

    pub fn delta_nnet(&self) -> &Nnet {
        &self.delta_nnet
    }

    pub fn compiler(&self) -> &CachingCompiler {
        &self.compiler
    }

    pub fn srand_seed(&self) -> u64 {
        self.srand_seed
    }

    pub fn objf_info(&self, name: &str) -> Option<&ObjectiveFunctionInfo> {
        self.outputs.objf_info.get(name)
    }

    pub fn accuracy_info(&self, name: &str) -> Option<&ObjectiveFunctionInfo> {
        self.outputs.accuracy_info.get(name)
    }

    pub fn max_change_stats(&self) -> &MaxChangeStats {
        &self.max_change_stats
    }
}

/// The objective and accuracy statistics of every output, keyed by the name they're reported
/// under.
#[derive(Debug, Default)]
struct OutputStats {
    objf_info: HashMap<String, ObjectiveFunctionInfo>,
    accuracy_info: HashMap<String, ObjectiveFunctionInfo>,
}

impl OutputStats {
    /// Evaluates the objective of every output of `eg`, seeding the backward pass, and
    /// accumulates the statistics of the minibatch.
    fn process_outputs<E: Executor>(
        &mut self,
        nnet: &Nnet,
        eg: &NnetExample,
        executor: &mut E,
        is_backstitch_step: bool,
        print_interval: usize,
        minibatch_counter: usize,
    ) -> Result<()> {
        let suffix = if is_backstitch_step { BACKSTITCH_SUFFIX } else { "" };

        for io in &eg.io {
            let node = nnet
                .node_index(&io.name)
                .ok_or_else(|| MlErr::UnknownNode(io.name.clone()))?;

            let Some(objective_type) = nnet.node(node).objective_type() else {
                continue;
            };

            let (tot_weight, tot_objf) =
                compute_objective_function(&io.features, objective_type, &io.name, true, executor)?;

            let name = format!("{}{suffix}", io.name);
            self.objf_info.entry(name.clone()).or_default().update_stats(
                &name,
                print_interval,
                minibatch_counter,
                tot_weight,
                tot_objf,
                0.0,
            )?;

            if objective_type == ObjectiveType::Linear {
                let output = executor.output(&io.name)?;
                let (tot_weight, tot_accuracy) = compute_accuracy(&io.features, output)?;

                self.accuracy_info.entry(name.clone()).or_default().update_stats(
                    &name,
                    print_interval,
                    minibatch_counter,
                    tot_weight,
                    tot_accuracy,
                    0.0,
                )?;
            }
        }

        Ok(())
    }
}

/// The input being perturbed must have the shape of the derivative it's moved along.
fn check_perturbed_shape(features: &GeneralMatrix, deriv: &Array2<f32>) -> Result<()> {
    if features.num_rows() != deriv.nrows() {
        return Err(MlErr::SizeMismatch {
            what: "perturbed input rows",
            got: features.num_rows(),
            expected: deriv.nrows(),
        });
    }

    if features.num_cols() != deriv.ncols() {
        return Err(MlErr::SizeMismatch {
            what: "perturbed input columns",
            got: features.num_cols(),
            expected: deriv.ncols(),
        });
    }

    Ok(())
}

fn sorted(infos:&HashMap<String, ObjectiveFunctionInfo>) -> Vec<(&String, &ObjectiveFunctionInfo)> {
    let mut infos: Vec<_> = infos.iter().collect();
    infos.sort_by(|a, b| a.0.cmp(b.0));
    infos
}
