use serde::{Deserialize, Serialize};

use crate::{MlErr, Result, arch::Nnet, example::NnetExample};

/// A named input or output of a computation and whether its derivative is needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IoSpecification {
    pub name: String,
    pub has_deriv: bool,
}

/// Describes what a computation must do: which nodes it reads and writes, and which
/// derivatives it must produce. Requests are the keys of the compilation cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputationRequest {
    pub inputs: Vec<IoSpecification>,
    pub outputs: Vec<IoSpecification>,
    pub need_model_derivative: bool,
    pub store_component_stats: bool,
}

impl ComputationRequest {
    /// Builds the request that trains on a given example.
    ///
    /// # Arguments
    /// * `nnet` - The network the example is meant for.
    /// * `eg` - The example, each of its streams must name a node of the network.
    /// * `need_model_derivative` - Whether the parameters' derivatives must be computed.
    /// * `store_component_stats` - Whether components should accumulate their statistics.
    ///
    /// # Returns
    /// The request, or an error if a stream names no node or the request would be empty.
    pub fn from_example(
        nnet: &Nnet,
        eg: &NnetExample,
        need_model_derivative: bool,
        store_component_stats: bool,
    ) -> Result<Self> {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();

        for io in &eg.io {
            let node = nnet
                .node_index(&io.name)
                .ok_or_else(|| MlErr::UnknownNode(io.name.clone()))?;

            if nnet.is_input_node(node) {
                inputs.push(IoSpecification {
                    name: io.name.clone(),
                    has_deriv: false,
                });
            } else {
                outputs.push(IoSpecification {
                    name: io.name.clone(),
                    has_deriv: need_model_derivative,
                });
            }
        }

        if inputs.is_empty() {
            return Err(MlErr::EmptyRequest { what: "inputs" });
        }

        if outputs.is_empty() {
            return Err(MlErr::EmptyRequest { what: "outputs" });
        }

        Ok(Self {
            inputs,
            outputs,
            need_model_derivative,
            store_component_stats,
        })
    }

    /// Asks for the derivatives of the objective with respect to every input.
    pub fn with_input_derivs(mut self) -> Self {
        self.inputs.iter_mut().for_each(|io| io.has_deriv = true);
        self
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;
    use crate::{
        arch::{Component, Node, ObjectiveType, components::Affine},
        example::NnetIo,
    };

    fn nnet() -> Nnet {
        let components = vec![(
            "affine".to_string(),
            Box::new(Affine::new((2, 2), 0.1, 0.0)) as Box<dyn Component>,
        )];
        let nodes = vec![
            Node::input("input", 2),
            Node::output("output", 1, ObjectiveType::Quadratic),
        ];
        Nnet::new(components, nodes).unwrap()
    }

    #[test]
    fn streams_are_split_into_inputs_and_outputs() {
        let eg = NnetExample::new(vec![
            NnetIo::new("input", Array2::zeros((3, 2))),
            NnetIo::new("output", Array2::zeros((3, 2))),
        ])
        .unwrap();

        let request = ComputationRequest::from_example(&nnet(), &eg, true, false).unwrap();
        assert_eq!(request.inputs[0].name, "input");
        assert!(!request.inputs[0].has_deriv);
        assert!(request.outputs[0].has_deriv);

        let request = request.with_input_derivs();
        assert!(request.inputs[0].has_deriv);
    }

    #[test]
    fn unknown_streams_are_rejected() {
        let eg = NnetExample::new(vec![
            NnetIo::new("input", Array2::zeros((3, 2))),
            NnetIo::new("nonexistent", Array2::zeros((3, 2))),
        ])
        .unwrap();

        let result = ComputationRequest::from_example(&nnet(), &eg, true, false);
        assert!(matches!(result, Err(MlErr::UnknownNode(name)) if name == "nonexistent"));
    }

    #[test]
    fn requests_without_outputs_are_rejected() {
        let eg = NnetExample::new(vec![NnetIo::new("input", Array2::zeros((3, 2)))]).unwrap();

        let result = ComputationRequest::from_example(&nnet(), &eg, true, false);
        assert!(matches!(result, Err(MlErr::EmptyRequest { what: "outputs" })));
    }
}
