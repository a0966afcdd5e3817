pub mod arch;
pub mod compute;
pub mod error;
pub mod example;
pub mod matrix;
pub mod specs;
pub mod training;

pub use error::{MlErr, Result};
