use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    DimensionMismatch {
        name: String,
        nnet: usize,
        egs: usize,
    },
    TopologyMismatch {
        what: &'static str,
    },
    UnknownNode(String),
    NotAnInput(String),
    NotAnOutput(String),
    DuplicateIo(String),
    MissingInput(String),
    EmptyRequest {
        what: &'static str,
    },
    UnsupportedObjective(String),
    InvalidConfig(String),
    PhaseRegression {
        name: String,
        stored: usize,
        got: usize,
    },
    UpdatableMismatch {
        component: String,
    },
    ComputerState {
        expected: &'static str,
    },
    Io(io::Error),
    Cache(serde_json::Error),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::DimensionMismatch { name, nnet, egs } => write!(
                f,
                "Nnet versus example output dimension (num-classes) mismatch for '{name}': {nnet} (nnet) vs. {egs} (egs)"
            ),
            MlErr::TopologyMismatch { what } => {
                write!(f, "The delta model and the model differ in {what}")
            }
            MlErr::UnknownNode(name) => write!(f, "No node named '{name}' in nnet"),
            MlErr::NotAnInput(name) => write!(f, "Node '{name}' is not an input node"),
            MlErr::NotAnOutput(name) => write!(f, "Node '{name}' is not an output node"),
            MlErr::DuplicateIo(name) => {
                write!(f, "The example has more than one stream named '{name}'")
            }
            MlErr::MissingInput(name) => {
                write!(f, "No value was supplied for the node '{name}'")
            }
            MlErr::EmptyRequest { what } => write!(f, "No {what} in computation request"),
            MlErr::UnsupportedObjective(kind) => {
                write!(f, "Objective function type '{kind}' not handled")
            }
            MlErr::InvalidConfig(msg) => write!(f, "Invalid trainer configuration: {msg}"),
            MlErr::PhaseRegression { name, stored, got } => write!(
                f,
                "The statistics phase for '{name}' went backwards, from {stored} to {got}"
            ),
            MlErr::UpdatableMismatch { component } => write!(
                f,
                "Component '{component}' is tagged as updatable but doesn't expose the updatable interface"
            ),
            MlErr::ComputerState { expected } => {
                write!(f, "The computer is in the wrong state, expected {expected}")
            }
            MlErr::Io(e) => write!(f, "io error: {e}"),
            MlErr::Cache(e) => write!(f, "computation cache error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Io(e) => Some(e),
            MlErr::Cache(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Cache(value)
    }
}
