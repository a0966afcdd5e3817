use std::collections::HashSet;

use crate::{MlErr, Result, matrix::GeneralMatrix};

/// A named input or output stream of a training example.
#[derive(Debug, Clone, PartialEq)]
pub struct NnetIo {
    pub name: String,
    pub features: GeneralMatrix,
}

impl NnetIo {
    pub fn new<S, M>(name: S, features: M) -> Self
    where
        S: Into<String>,
        M: Into<GeneralMatrix>,
    {
        Self {
            name: name.into(),
            features: features.into(),
        }
    }
}

/// A minibatch: the inputs of the model together with the supervision for its outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct NnetExample {
    pub io: Vec<NnetIo>,
}

impl NnetExample {
    /// Creates a new `NnetExample`.
    ///
    /// # Arguments
    /// * `io` - The streams of the example, their names must be unique.
    ///
    /// # Returns
    /// A new `NnetExample` or an error if two streams share a name.
    pub fn new(io: Vec<NnetIo>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(io.len());

        if let Some(dup) = io.iter().find(|io| !seen.insert(io.name.as_str())) {
            return Err(MlErr::DuplicateIo(dup.name.clone()));
        }

        Ok(Self { io })
    }

    /// Looks up a stream by name.
    pub fn get(&self, name: &str) -> Option<&NnetIo> {
        self.io.iter().find(|io| io.name == name)
    }
}
