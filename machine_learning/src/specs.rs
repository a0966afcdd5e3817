use serde::{Deserialize, Serialize};

/// The specification for the input node of an `Nnet`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub dim: usize,
}

/// The specification for the `Component` trait.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentSpec {
    Affine {
        input_dim: usize,
        output_dim: usize,
        learning_rate: f32,
        #[serde(default)]
        max_change: f32,
        /// The running estimate weight of the natural gradient, if enabled.
        #[serde(default)]
        natural_gradient: Option<f32>,
        #[serde(default)]
        param_stddev: Option<f32>,
    },
    Sigmoid {
        dim: usize,
    },
    LogSoftmax {
        dim: usize,
    },
    Dropout {
        dim: usize,
        proportion: f32,
    },
}

/// A named component of the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedComponentSpec {
    pub name: String,
    pub component: ComponentSpec,
}

/// The specification for an output node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    /// The component the output taps, the last one when absent.
    #[serde(default)]
    pub after: Option<String>,
    pub objective: String,
}

/// The specification for the `Nnet` struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NnetSpec {
    pub input: InputSpec,
    pub components: Vec<NamedComponentSpec>,
    pub outputs: Vec<OutputSpec>,
    #[serde(default)]
    pub seed: Option<u64>,
}
