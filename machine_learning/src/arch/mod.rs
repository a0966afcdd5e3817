mod builder;
mod component;
pub mod components;
mod nnet;

pub use builder::NnetBuilder;
pub use component::{Component, ComponentStats, Propagated, UpdatableComponent};
pub use nnet::{Nnet, Node, NodeKind, ObjectiveType};
