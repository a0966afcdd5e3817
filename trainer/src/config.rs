use machine_learning::{specs::NnetSpec, training::TrainerConfig};
use serde::Deserialize;

/// The encoding the synthetic supervision is stored with.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Sparse,
    Full,
    Compressed,
}

/// The specification for the synthetic classification task.
#[derive(Debug, Clone, Deserialize)]
pub struct DataSpec {
    /// The output node the labels are meant for.
    pub output: String,
    pub num_classes: usize,
    pub num_minibatches: usize,
    pub minibatch_size: usize,
    #[serde(default)]
    pub encoding: Encoding,
    /// The standard deviation of the samples around their class mean.
    #[serde(default = "default_noise")]
    pub noise: f32,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_noise() -> f32 {
    0.5
}

/// A training run: the network, the trainer options and the data.
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    pub nnet: NnetSpec,
    #[serde(default)]
    pub trainer: TrainerConfig,
    pub data: DataSpec,
}
