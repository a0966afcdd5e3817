use crate::{MlErr, Result};

/// The averages of a finished reporting phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseSummary {
    pub start_minibatch: usize,
    pub end_minibatch: usize,
    pub weight: f64,
    pub objf: f64,
    pub aux_objf: f64,
}

/// Accumulates the objective of one output, both over its whole lifetime and over the current
/// reporting phase of `minibatches_per_phase` minibatches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectiveFunctionInfo {
    current_phase: usize,
    tot_weight: f64,
    tot_objf: f64,
    tot_aux_objf: f64,
    tot_weight_this_phase: f64,
    tot_objf_this_phase: f64,
    tot_aux_objf_this_phase: f64,
}

impl ObjectiveFunctionInfo {
    /// Adds the statistics of a minibatch, closing the current phase first if the minibatch
    /// belongs to a later one.
    ///
    /// # Arguments
    /// * `name` - The name the statistics are reported under.
    /// * `minibatches_per_phase` - The length of a reporting phase.
    /// * `minibatch_counter` - The index of the minibatch.
    /// * `weight` - The total weight of the minibatch.
    /// * `objf` - The total objective of the minibatch.
    /// * `aux_objf` - The total auxiliary objective of the minibatch.
    ///
    /// # Returns
    /// The summary of the closed phase, if one was closed.
    pub fn update_stats(
        &mut self,
        name: &str,
        minibatches_per_phase: usize,
        minibatch_counter: usize,
        weight: f32,
        objf: f32,
        aux_objf: f32,
    ) -> Result<Option<PhaseSummary>> {
        let minibatches_per_phase = minibatches_per_phase.max(1);
        let phase = minibatch_counter / minibatches_per_phase;
        let mut summary = None;

        if phase != self.current_phase {
            if phase < self.current_phase {
                return Err(MlErr::PhaseRegression {
                    name: name.to_string(),
                    stored: self.current_phase,
                    got: phase,
                });
            }

            summary = Some(self.print_stats_for_this_phase(name, minibatches_per_phase));
            self.current_phase = phase;
            self.tot_weight_this_phase = 0.0;
            self.tot_objf_this_phase = 0.0;
            self.tot_aux_objf_this_phase = 0.0;
        }

        let (weight, objf, aux_objf) = (weight as f64, objf as f64, aux_objf as f64);
        self.tot_weight_this_phase += weight;
        self.tot_objf_this_phase += objf;
        self.tot_aux_objf_this_phase += aux_objf;
        self.tot_weight += weight;
        self.tot_objf += objf;
        self.tot_aux_objf += aux_objf;

        Ok(summary)
    }

    fn print_stats_for_this_phase(&self, name: &str, minibatches_per_phase: usize) -> PhaseSummary {
        let start_minibatch = self.current_phase * minibatches_per_phase;
        let end_minibatch = start_minibatch + minibatches_per_phase - 1;
        let weight = self.tot_weight_this_phase;
        let objf = self.tot_objf_this_phase / weight;
        let aux_objf = self.tot_aux_objf_this_phase / weight;

        if self.tot_aux_objf_this_phase == 0.0 {
            log::info!(
                "Average objective function for '{name}' for minibatches {start_minibatch}-{end_minibatch} is {objf} over {weight} frames."
            );
        } else {
            let sum_objf = objf + aux_objf;
            log::info!(
                "Average objective function for '{name}' for minibatches {start_minibatch}-{end_minibatch} is {objf} + {aux_objf} = {sum_objf} over {weight} frames."
            );
        }

        PhaseSummary {
            start_minibatch,
            end_minibatch,
            weight,
            objf,
            aux_objf,
        }
    }

    /// Logs the lifetime averages.
    ///
    /// # Returns
    /// Whether any weight was ever accumulated.
    pub fn print_total_stats(&self, name: &str) -> bool {
        let objf = self.tot_objf / self.tot_weight;
        let aux_objf = self.tot_aux_objf / self.tot_weight;
        let weight = self.tot_weight;

        if self.tot_aux_objf == 0.0 {
            log::info!("Overall average objective function for '{name}' is {objf} over {weight} frames.");
        } else {
            let sum_objf = objf + aux_objf;
            log::info!(
                "Overall average objective function for '{name}' is {objf} + {aux_objf} = {sum_objf} over {weight} frames."
            );
        }

        log::info!("[this line is to be parsed by a script:] log-prob-per-frame={objf}");
        self.tot_weight != 0.0
    }

    pub fn current_phase(&self) -> usize {
        self.current_phase
    }

    pub fn tot_weight(&self) -> f64 {
        self.tot_weight
    }

    pub fn tot_objf(&self) -> f64 {
        self.tot_objf
    }

    pub fn tot_aux_objf(&self) -> f64 {
        self.tot_aux_objf
    }
}
