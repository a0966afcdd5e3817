use std::{
    collections::HashSet,
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use super::{Component, UpdatableComponent};
use crate::{MlErr, Result};

/// The family of objective functions an output node is trained with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveType {
    /// `Σ output·supervision`, a cross-entropy when the output is a log-softmax.
    Linear,
    /// `-0.5 · Σ (supervision - output)²`.
    Quadratic,
}

impl FromStr for ObjectiveType {
    type Err = MlErr;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Self::Linear),
            "quadratic" => Ok(Self::Quadratic),
            other => Err(MlErr::UnsupportedObjective(other.to_string())),
        }
    }
}

impl Display for ObjectiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectiveType::Linear => f.write_str("linear"),
            ObjectiveType::Quadratic => f.write_str("quadratic"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Input {
        dim: usize,
    },
    /// Taps the chain after its first `source` components.
    Output {
        source: usize,
        objective: ObjectiveType,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
}

impl Node {
    pub fn input<S: Into<String>>(name: S, dim: usize) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Input { dim },
        }
    }

    pub fn output<S: Into<String>>(name: S, source: usize, objective: ObjectiveType) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Output { source, objective },
        }
    }

    pub fn objective_type(&self) -> Option<ObjectiveType> {
        match self.kind {
            NodeKind::Output { objective, .. } => Some(objective),
            NodeKind::Input { .. } => None,
        }
    }
}

/// A neural network: a chain of named components fed by a single input node, with any number
/// of output nodes tapping the chain at different depths.
#[derive(Debug, Clone)]
pub struct Nnet {
    components: Vec<(String, Box<dyn Component>)>,
    nodes: Vec<Node>,
    input: usize,
}

impl Nnet {
    /// Creates a new `Nnet`.
    ///
    /// # Arguments
    /// * `components` - The named components, in the order they are applied.
    /// * `nodes` - Exactly one input node plus the output nodes.
    ///
    /// # Returns
    /// A new `Nnet` or an error if names collide or dimensions don't chain.
    pub fn new<I>(components: I, nodes: Vec<Node>) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Box<dyn Component>)>,
    {
        let components: Vec<_> = components.into_iter().collect();

        let mut names = HashSet::new();
        for name in components.iter().map(|(n, _)| n).chain(nodes.iter().map(|n| &n.name)) {
            if !names.insert(name.as_str()) {
                return Err(MlErr::InvalidConfig(format!("duplicated name '{name}' in nnet")));
            }
        }

        let mut inputs = nodes.iter().enumerate().filter_map(|(i, n)| match n.kind {
            NodeKind::Input { dim } => Some((i, dim)),
            NodeKind::Output { .. } => None,
        });

        let (Some((input, mut dim)), None) = (inputs.next(), inputs.next()) else {
            return Err(MlErr::InvalidConfig("an nnet needs exactly one input node".into()));
        };

        for (name, c) in &components {
            if c.input_dim() != dim {
                return Err(MlErr::SizeMismatch {
                    what: "component input dimension",
                    got: c.input_dim(),
                    expected: dim,
                });
            }

            if c.is_updatable() && c.as_updatable().is_none() {
                return Err(MlErr::UpdatableMismatch {
                    component: name.clone(),
                });
            }

            dim = c.output_dim();
        }

        for node in &nodes {
            if let NodeKind::Output { source, .. } = node.kind {
                if source > components.len() {
                    return Err(MlErr::SizeMismatch {
                        what: "output node source",
                        got: source,
                        expected: components.len(),
                    });
                }
            }
        }

        Ok(Self {
            components,
            nodes,
            input,
        })
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn component(&self, c: usize) -> &dyn Component {
        self.components[c].1.as_ref()
    }

    pub fn component_mut(&mut self, c: usize) -> &mut dyn Component {
        self.components[c].1.as_mut()
    }

    pub fn component_name(&self, c: usize) -> &str {
        &self.components[c].0
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Looks up a node by name.
    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    pub fn node(&self, n: usize) -> &Node {
        &self.nodes[n]
    }

    pub fn is_input_node(&self, n: usize) -> bool {
        matches!(self.nodes[n].kind, NodeKind::Input { .. })
    }

    pub fn is_output_node(&self, n: usize) -> bool {
        matches!(self.nodes[n].kind, NodeKind::Output { .. })
    }

    pub fn input_node(&self) -> &Node {
        &self.nodes[self.input]
    }

    /// Returns the dimension of the values after the first `depth` components.
    pub fn dim_at(&self, depth: usize) -> usize {
        match depth {
            0 => match self.input_node().kind {
                NodeKind::Input { dim } => dim,
                NodeKind::Output { .. } => 0,
            },
            d => self.components[d - 1].1.output_dim(),
        }
    }

    /// Returns the updatable capability of a component.
    ///
    /// # Returns
    /// `None` for components that aren't updatable, an error if a component claims to be
    /// updatable without exposing the interface.
    pub fn updatable(&self, c: usize) -> Result<Option<&dyn UpdatableComponent>> {
        let (name, component) = &self.components[c];

        if !component.is_updatable() {
            return Ok(None);
        }

        component
            .as_updatable()
            .map(Some)
            .ok_or_else(|| MlErr::UpdatableMismatch {
                component: name.clone(),
            })
    }

    pub fn updatable_mut(&mut self, c: usize) -> Result<Option<&mut dyn UpdatableComponent>> {
        let (name, component) = &mut self.components[c];

        if !component.is_updatable() {
            return Ok(None);
        }

        match component.as_updatable_mut() {
            Some(uc) => Ok(Some(uc)),
            None => Err(MlErr::UpdatableMismatch {
                component: name.clone(),
            }),
        }
    }

    /// Returns the index, name and interface of every updatable component, in order.
    pub fn updatable_components(&self) -> Result<Vec<(usize, &str, &dyn UpdatableComponent)>> {
        let mut updatable = Vec::new();

        for c in 0..self.components.len() {
            if let Some(uc) = self.updatable(c)? {
                updatable.push((c, self.component_name(c), uc));
            }
        }

        Ok(updatable)
    }

    pub fn num_updatable_components(&self) -> usize {
        self.components
            .iter()
            .filter(|(_, c)| c.is_updatable())
            .count()
    }

    pub fn num_parameters(&self) -> usize {
        self.components
            .iter()
            .filter_map(|(_, c)| c.as_updatable())
            .map(|uc| uc.params().len())
            .sum()
    }

    /// Scales every parameter and every stored statistic by `alpha`.
    pub fn scale(&mut self, alpha: f32) {
        for (_, c) in &mut self.components {
            if let Some(stats) = c.stats_mut() {
                if alpha == 0.0 {
                    stats.zero();
                } else {
                    stats.scale(alpha);
                }
            }

            if let Some(uc) = c.as_updatable_mut() {
                uc.scale(alpha);
            }
        }
    }

    pub fn zero_component_stats(&mut self) {
        for (_, c) in &mut self.components {
            if let Some(stats) = c.stats_mut() {
                stats.zero();
            }
        }
    }

    pub fn freeze_natural_gradient(&mut self, freeze: bool) -> Result<()> {
        for c in 0..self.components.len() {
            if let Some(uc) = self.updatable_mut(c)? {
                uc.freeze_natural_gradient(freeze);
            }
        }

        Ok(())
    }

    /// The dot product of the parameters of two congruent networks.
    pub fn dot_product(&self, other: &Nnet) -> Result<f32> {
        self.check_congruent(other)?;

        let mut total = 0.0;
        for c in 0..self.components.len() {
            if let (Some(a), Some(b)) = (self.updatable(c)?, other.updatable(c)?) {
                total += a.dot_product(b);
            }
        }

        Ok(total)
    }

    /// Checks that `other` has the same topology as this network.
    pub fn check_congruent(&self, other: &Nnet) -> Result<()> {
        if self.components.len() != other.components.len() {
            return Err(MlErr::TopologyMismatch {
                what: "number of components",
            });
        }

        for ((_, a), (_, b)) in self.components.iter().zip(&other.components) {
            if a.type_name() != b.type_name() || a.is_updatable() != b.is_updatable() {
                return Err(MlErr::TopologyMismatch {
                    what: "component types",
                });
            }

            let len_a = a.as_updatable().map(|uc| uc.params().len());
            let len_b = b.as_updatable().map(|uc| uc.params().len());
            if len_a != len_b {
                return Err(MlErr::TopologyMismatch {
                    what: "component sizes",
                });
            }
        }

        Ok(())
    }
}
