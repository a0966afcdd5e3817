use ndarray::{Array1, Array2};
use ndarray_rand::{RandomExt, rand_distr::Normal};
use rand::{SeedableRng, rngs::StdRng};

use super::{
    Component, Nnet, Node, ObjectiveType,
    components::{Affine, Dropout, LogSoftmax, Preconditioner, Sigmoid},
};
use crate::{
    MlErr, Result,
    specs::{ComponentSpec, NnetSpec, OutputSpec},
};

/// Builds `Nnet`s given a specification.
#[derive(Default)]
pub struct NnetBuilder;

impl NnetBuilder {
    /// Creates a new `NnetBuilder`.
    pub fn new() -> Self {
        Self
    }

    /// Builds a new `Nnet` following a spec.
    ///
    /// # Arguments
    /// * `spec` - The specification for the network.
    ///
    /// # Returns
    /// The network with freshly initialized parameters, or an error if the spec is invalid.
    pub fn build(&self, spec: &NnetSpec) -> Result<Nnet> {
        let mut rng = self.generate_rng(spec.seed);

        let components = spec
            .components
            .iter()
            .map(|named| {
                let component = self.resolve_component(named.component, &mut rng)?;
                Ok((named.name.clone(), component))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut nodes = vec![Node::input(&spec.input.name, spec.input.dim)];
        for output in &spec.outputs {
            nodes.push(self.resolve_output(spec, output)?);
        }

        Nnet::new(components, nodes)
    }

    fn resolve_component(&self, spec: ComponentSpec, rng: &mut StdRng) -> Result<Box<dyn Component>> {
        let component: Box<dyn Component> = match spec {
            ComponentSpec::Affine {
                input_dim,
                output_dim,
                learning_rate,
                max_change,
                natural_gradient,
                param_stddev,
            } => {
                let stddev = param_stddev.unwrap_or(1.0 / (input_dim as f32).sqrt());
                let weights = Array2::random_using((input_dim, output_dim), self.normal(stddev)?, rng);
                let biases = Array1::random_using(output_dim, self.normal(1.0)?, rng);

                let affine = Affine::new((input_dim, output_dim), learning_rate, max_change)
                    .with_params(weights.view(), biases.view())
                    .ok_or(MlErr::SizeMismatch {
                        what: "affine parameters",
                        got: weights.len() + biases.len(),
                        expected: (input_dim + 1) * output_dim,
                    })?;

                match natural_gradient {
                    Some(alpha) => Box::new(affine.with_natural_gradient(Preconditioner::new(alpha))),
                    None => Box::new(affine),
                }
            }
            ComponentSpec::Sigmoid { dim } => Box::new(Sigmoid::new(dim)),
            ComponentSpec::LogSoftmax { dim } => Box::new(LogSoftmax::new(dim)),
            ComponentSpec::Dropout { dim, proportion } => {
                let dropout = Dropout::new(dim, proportion).ok_or_else(|| {
                    MlErr::InvalidConfig(format!("dropout proportion {proportion} is not in [0, 1)"))
                })?;

                Box::new(dropout)
            }
        };

        Ok(component)
    }

    fn resolve_output(&self, spec: &NnetSpec, output: &OutputSpec) -> Result<Node> {
        let objective: ObjectiveType = output.objective.parse()?;

        let source = match &output.after {
            Some(after) => {
                let pos = spec
                    .components
                    .iter()
                    .position(|c| &c.name == after)
                    .ok_or_else(|| MlErr::UnknownNode(after.clone()))?;

                pos + 1
            }
            None => spec.components.len(),
        };

        Ok(Node::output(&output.name, source, objective))
    }

    fn normal(&self, stddev: f32) -> Result<Normal<f32>> {
        Normal::new(0.0, stddev)
            .map_err(|e| MlErr::InvalidConfig(format!("invalid parameter stddev {stddev}: {e}")))
    }

    fn generate_rng(&self, seed: Option<u64>) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specs::{InputSpec, NamedComponentSpec};

    fn spec(objective: &str) -> NnetSpec {
        NnetSpec {
            input: InputSpec {
                name: "input".into(),
                dim: 3,
            },
            components: vec![
                NamedComponentSpec {
                    name: "affine1".into(),
                    component: ComponentSpec::Affine {
                        input_dim: 3,
                        output_dim: 4,
                        learning_rate: 0.01,
                        max_change: 0.75,
                        natural_gradient: Some(0.1),
                        param_stddev: None,
                    },
                },
                NamedComponentSpec {
                    name: "sigmoid1".into(),
                    component: ComponentSpec::Sigmoid { dim: 4 },
                },
                NamedComponentSpec {
                    name: "affine2".into(),
                    component: ComponentSpec::Affine {
                        input_dim: 4,
                        output_dim: 2,
                        learning_rate: 0.01,
                        max_change: 0.75,
                        natural_gradient: None,
                        param_stddev: Some(0.5),
                    },
                },
                NamedComponentSpec {
                    name: "log_softmax".into(),
                    component: ComponentSpec::LogSoftmax { dim: 2 },
                },
            ],
            outputs: vec![
                OutputSpec {
                    name: "output".into(),
                    after: None,
                    objective: objective.into(),
                },
                OutputSpec {
                    name: "hidden".into(),
                    after: Some("sigmoid1".into()),
                    objective: "quadratic".into(),
                },
            ],
            seed: Some(7),
        }
    }

    #[test]
    fn builds_the_described_network() {
        let nnet = NnetBuilder::new().build(&spec("linear")).unwrap();

        assert_eq!(nnet.num_components(), 4);
        assert_eq!(nnet.num_updatable_components(), 2);
        assert_eq!(nnet.num_parameters(), 4 * 4 + 5 * 2);

        let hidden = nnet.node_index("hidden").unwrap();
        assert_eq!(nnet.node(hidden).objective_type(), Some(ObjectiveType::Quadratic));
    }

    #[test]
    fn same_seed_same_parameters() {
        let a = NnetBuilder::new().build(&spec("linear")).unwrap();
        let b = NnetBuilder::new().build(&spec("linear")).unwrap();

        assert_eq!(a.dot_product(&a).unwrap(), b.dot_product(&b).unwrap());
        assert_eq!(a.dot_product(&b).unwrap(), a.dot_product(&a).unwrap());
    }

    #[test]
    fn unknown_objectives_are_rejected() {
        let result = NnetBuilder::new().build(&spec("chain"));
        assert!(matches!(result, Err(MlErr::UnsupportedObjective(kind)) if kind == "chain"));
    }

    #[test]
    fn specs_deserialize_from_json() {
        let json = r#"{
            "input": { "name": "input", "dim": 2 },
            "components": [
                { "name": "affine", "component": { "affine": { "input_dim": 2, "output_dim": 2, "learning_rate": 0.1 } } },
                { "name": "dropout", "component": { "dropout": { "dim": 2, "proportion": 0.5 } } }
            ],
            "outputs": [ { "name": "output", "objective": "quadratic" } ],
            "seed": 1
        }"#;

        let spec: NnetSpec = serde_json::from_str(json).unwrap();
        let nnet = NnetBuilder::new().build(&spec).unwrap();
        assert_eq!(nnet.num_components(), 2);
    }
}
