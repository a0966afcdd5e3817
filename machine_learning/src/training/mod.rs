mod config;
mod max_change;
mod objective;
mod stats;
mod trainer;

pub use config::TrainerConfig;
pub use max_change::{MaxChangeStats, update_nnet_with_max_change};
pub use objective::{compute_accuracy, compute_objective_function};
pub use stats::{ObjectiveFunctionInfo, PhaseSummary};
pub use trainer::NnetTrainer;
