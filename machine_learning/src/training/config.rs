use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{MlErr, Result};

/// The options of an `NnetTrainer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// The fraction of the previous update carried into the next one, `0` disables momentum.
    pub momentum: f32,
    /// The maximum norm of the whole parameter change per minibatch, `0` disables the limit.
    pub max_param_change: f32,
    /// The scale of the backstitch step, `0` disables backstitch training.
    pub backstitch_training_scale: f32,
    /// Backstitch runs on one minibatch out of this many.
    pub backstitch_training_interval: usize,
    /// The amount of minibatches per reporting phase.
    pub print_interval: usize,
    pub store_component_stats: bool,
    /// Whether to zero the component statistics of the model when training starts.
    pub zero_component_stats: bool,
    pub read_cache: Option<PathBuf>,
    pub write_cache: Option<PathBuf>,
    pub binary_write_cache: bool,
    /// The size of the step taken when perturbing the inputs along their derivatives.
    pub perturb_epsilon: f32,
    /// The base of the seeds of the backstitch steps, random when absent.
    pub srand_seed: Option<u32>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            momentum: 0.0,
            max_param_change: 2.0,
            backstitch_training_scale: 0.0,
            backstitch_training_interval: 1,
            print_interval: 100,
            store_component_stats: true,
            zero_component_stats: true,
            read_cache: None,
            write_cache: None,
            binary_write_cache: true,
            perturb_epsilon: 0.0,
            srand_seed: None,
        }
    }
}

impl TrainerConfig {
    /// Checks that every option is in range and that the options are compatible.
    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("momentum", self.momentum),
            ("max_param_change", self.max_param_change),
            ("backstitch_training_scale", self.backstitch_training_scale),
            ("perturb_epsilon", self.perturb_epsilon),
        ];

        for (name, value) in non_negative {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(MlErr::InvalidConfig(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }

        if self.backstitch_training_interval == 0 {
            return Err(MlErr::InvalidConfig(
                "backstitch_training_interval must be at least 1".into(),
            ));
        }

        if self.print_interval == 0 {
            return Err(MlErr::InvalidConfig("print_interval must be at least 1".into()));
        }

        if self.backstitch_training_scale > 0.0 && self.momentum > 0.0 {
            return Err(MlErr::InvalidConfig(
                "backstitch training is incompatible with momentum > 0".into(),
            ));
        }

        Ok(())
    }

    pub fn backstitch_enabled(&self) -> bool {
        self.backstitch_training_scale > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        TrainerConfig::default().validate().unwrap();
    }

    #[test]
    fn missing_fields_take_their_defaults() {
        let config: TrainerConfig = serde_json::from_str(r#"{ "momentum": 0.5 }"#).unwrap();
        assert_eq!(config.momentum, 0.5);
        assert_eq!(config.max_param_change, 2.0);
        assert_eq!(config.print_interval, 100);
        assert!(config.binary_write_cache);
    }

    #[test]
    fn out_of_range_options_are_rejected() {
        let configs = [
            TrainerConfig {
                momentum: -0.1,
                ..Default::default()
            },
            TrainerConfig {
                max_param_change: -1.0,
                ..Default::default()
            },
            TrainerConfig {
                print_interval: 0,
                ..Default::default()
            },
            TrainerConfig {
                backstitch_training_interval: 0,
                ..Default::default()
            },
        ];

        for config in configs {
            assert!(matches!(config.validate(), Err(MlErr::InvalidConfig(_))));
        }
    }

    #[test]
    fn backstitch_and_momentum_are_exclusive() {
        let config = TrainerConfig {
            momentum: 0.5,
            backstitch_training_scale: 0.3,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(MlErr::InvalidConfig(_))));
    }
}
