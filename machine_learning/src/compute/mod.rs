mod compiler;
mod computer;
mod request;

pub use compiler::{CachingCompiler, Computation, OutputTap};
pub use computer::{Executor, NnetComputer};
pub use request::{ComputationRequest, IoSpecification};
