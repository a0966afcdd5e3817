use std::{
    collections::HashMap,
    io::{Read, Write},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use super::ComputationRequest;
use crate::{
    MlErr, Result,
    arch::{Nnet, NodeKind},
};

/// An output node as seen by a computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTap {
    pub name: String,
    /// The amount of components applied before the value is read.
    pub depth: usize,
    pub dim: usize,
    pub has_deriv: bool,
}

/// A compiled execution plan for a `ComputationRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Computation {
    pub input: String,
    pub input_dim: usize,
    pub need_input_deriv: bool,
    /// The amount of components the forward pass runs.
    pub depth: usize,
    pub taps: Vec<OutputTap>,
    pub need_model_derivative: bool,
    pub store_component_stats: bool,
}

impl Computation {
    pub fn tap(&self, name: &str) -> Option<&OutputTap> {
        self.taps.iter().find(|t| t.name == name)
    }

    /// The depth the backward pass starts from, `None` if no derivative flows at all.
    pub fn deriv_depth(&self) -> Option<usize> {
        self.taps
            .iter()
            .filter(|t| t.has_deriv)
            .map(|t| t.depth)
            .max()
    }

    /// Whether this plan still describes `nnet`, cached plans may come from another model.
    fn fits(&self, nnet: &Nnet) -> bool {
        let input_fits = nnet
            .node_index(&self.input)
            .is_some_and(|n| nnet.is_input_node(n) && nnet.dim_at(0) == self.input_dim);

        let tap_fits = |t: &OutputTap| {
            let source = nnet.node_index(&t.name).and_then(|n| match nnet.node(n).kind {
                NodeKind::Output { source, .. } => Some(source),
                NodeKind::Input { .. } => None,
            });

            source == Some(t.depth) && nnet.dim_at(t.depth) == t.dim
        };

        self.depth <= nnet.num_components() && input_fits && self.taps.iter().all(tap_fits)
    }
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    request: ComputationRequest,
    computation: Computation,
}

/// Compiles computation requests, remembering every plan it produced so a request seen before
/// is never compiled twice. The cache can be persisted across training runs.
#[derive(Debug, Default)]
pub struct CachingCompiler {
    cache: HashMap<ComputationRequest, Arc<Computation>>,
    num_compiled: usize,
}

impl CachingCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the plan for `request`, compiling it only if it isn't cached.
    ///
    /// # Arguments
    /// * `nnet` - The network the computation runs on.
    /// * `request` - What the computation must do.
    ///
    /// # Returns
    /// The shared plan or an error if the request doesn't match the network.
    pub fn compile(&mut self, nnet: &Nnet, request: &ComputationRequest) -> Result<Arc<Computation>> {
        if let Some(computation) = self.cache.get(request) {
            if computation.fits(nnet) {
                return Ok(Arc::clone(computation));
            }

            log::warn!("cached computation doesn't match the nnet, recompiling");
        }

        let computation = Arc::new(compile_request(nnet, request)?);
        self.num_compiled += 1;
        log::debug!(
            depth = computation.depth,
            outputs = computation.taps.len();
            "compiled computation"
        );

        self.cache.insert(request.clone(), Arc::clone(&computation));
        Ok(computation)
    }

    /// The amount of cached plans.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// The amount of plans this compiler compiled itself, i.e. not read from a cache.
    pub fn num_compiled(&self) -> usize {
        self.num_compiled
    }

    /// Adds every plan found in `reader` to the cache.
    pub fn read_cache<R: Read>(&mut self, reader: R) -> Result<()> {
        let entries: Vec<CacheEntry> = serde_json::from_reader(reader)?;

        for CacheEntry {
            request,
            computation,
        } in entries
        {
            self.cache.insert(request, Arc::new(computation));
        }

        Ok(())
    }

    /// Writes every cached plan to `writer`.
    ///
    /// # Arguments
    /// * `writer` - Where to write the cache.
    /// * `binary` - Whether to use the compact encoding instead of the human readable one.
    pub fn write_cache<W: Write>(&self, writer: W, binary: bool) -> Result<()> {
        let entries: Vec<_> = self
            .cache
            .iter()
            .map(|(request, computation)| CacheEntry {
                request: request.clone(),
                computation: computation.as_ref().clone(),
            })
            .collect();

        if binary {
            serde_json::to_writer(writer, &entries)?;
        } else {
            serde_json::to_writer_pretty(writer, &entries)?;
        }

        Ok(())
    }
}

fn compile_request(nnet: &Nnet, request: &ComputationRequest) -> Result<Computation> {
    let input = match request.inputs.as_slice() {
        [] => return Err(MlErr::EmptyRequest { what: "inputs" }),
        [input] => input,
        [first, ..] => return Err(MlErr::DuplicateIo(first.name.clone())),
    };

    let node = nnet
        .node_index(&input.name)
        .ok_or_else(|| MlErr::UnknownNode(input.name.clone()))?;

    if !nnet.is_input_node(node) {
        return Err(MlErr::NotAnInput(input.name.clone()));
    }

    if request.outputs.is_empty() {
        return Err(MlErr::EmptyRequest { what: "outputs" });
    }

    let mut taps = Vec::with_capacity(request.outputs.len());
    for output in &request.outputs {
        let node = nnet
            .node_index(&output.name)
            .ok_or_else(|| MlErr::UnknownNode(output.name.clone()))?;

        let NodeKind::Output { source, .. } = nnet.node(node).kind else {
            return Err(MlErr::NotAnOutput(output.name.clone()));
        };

        taps.push(OutputTap {
            name: output.name.clone(),
            depth: source,
            dim: nnet.dim_at(source),
            has_deriv: output.has_deriv,
        });
    }

    Ok(Computation {
        input: input.name.clone(),
        input_dim: nnet.dim_at(0),
        need_input_deriv: input.has_deriv,
        depth: taps.iter().map(|t| t.depth).max().unwrap_or(0),
        taps,
        need_model_derivative: request.need_model_derivative,
        store_component_stats: request.store_component_stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arch::{Component, Node, ObjectiveType, components::{Affine, Sigmoid}},
        compute::IoSpecification,
    };

    fn nnet() -> Nnet {
        let components: Vec<(String, Box<dyn Component>)> = vec![
            ("affine".into(), Box::new(Affine::new((2, 3), 0.1, 0.0))),
            ("sigmoid".into(), Box::new(Sigmoid::new(3))),
        ];
        let nodes = vec![
            Node::input("input", 2),
            Node::output("output", 2, ObjectiveType::Quadratic),
            Node::output("linear", 1, ObjectiveType::Quadratic),
        ];
        Nnet::new(components, nodes).unwrap()
    }

    fn request(outputs: &[&str]) -> ComputationRequest {
        ComputationRequest {
            inputs: vec![IoSpecification {
                name: "input".into(),
                has_deriv: false,
            }],
            outputs: outputs
                .iter()
                .map(|&name| IoSpecification {
                    name: name.into(),
                    has_deriv: true,
                })
                .collect(),
            need_model_derivative: true,
            store_component_stats: false,
        }
    }

    #[test]
    fn repeated_requests_hit_the_cache() {
        let nnet = nnet();
        let mut compiler = CachingCompiler::new();

        let a = compiler.compile(&nnet, &request(&["output"])).unwrap();
        let b = compiler.compile(&nnet, &request(&["output"])).unwrap();
        let c = compiler.compile(&nnet, &request(&["output", "linear"])).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(compiler.num_compiled(), 2);
        assert_eq!(compiler.len(), 2);
        assert_eq!(c.depth, 2);
        assert_eq!(c.tap("linear").unwrap().dim, 3);
    }

    #[test]
    fn outputs_must_be_output_nodes() {
        let result = CachingCompiler::new().compile(&nnet(), &request(&["input"]));
        assert!(matches!(result, Err(MlErr::NotAnOutput(_))));
    }

    #[test]
    fn cache_survives_a_round_trip() {
        let nnet = nnet();
        let mut compiler = CachingCompiler::new();
        let compiled = compiler.compile(&nnet, &request(&["output"])).unwrap();

        for binary in [true, false] {
            let mut buf = Vec::new();
            compiler.write_cache(&mut buf, binary).unwrap();

            let mut restored = CachingCompiler::new();
            restored.read_cache(buf.as_slice()).unwrap();
            let read = restored.compile(&nnet, &request(&["output"])).unwrap();

            assert_eq!(*read, *compiled);
            assert_eq!(restored.num_compiled(), 0);
        }
    }
}
