//! Scene module: the node directory and everything derived from it.
//!
//! # Module Organization
//!
//! - `base`: [Scene], ID directory, reference engine and event relay
//! - `graph`: petgraph snapshot of resolvable references ([ReferenceGraph])
//! - `hierarchy`: parent/child index over hierarchy nodes ([ChildrenIndex])
//! - `import`: serialization, load and import with ID remapping
//!
//! ```rust
//! use dmml_core::{
//!     node::Node,
//!     properties::NodeKind,
//!     role::ReferenceRole,
//!     scene::Scene,
//! };
//!
//! let mut scene = Scene::default();
//! let model = scene.add_node(Node::new(NodeKind::Model)).unwrap();
//! let display = scene.add_node(Node::new(NodeKind::ModelDisplay)).unwrap();
//! scene
//!     .set_and_observe_reference_id(model.as_str(), &ReferenceRole::Display, Some(display.as_str()), None)
//!     .unwrap();
//! assert_eq!(
//!     scene.reference(model.as_str(), &ReferenceRole::Display, 0).map(|n| n.id().clone()),
//!     Some(display)
//! );
//! ```

mod base;
mod graph;
mod hierarchy;
mod import;

#[cfg(test)]
mod tests;

pub use base::Scene;
pub use graph::ReferenceGraph;
pub use hierarchy::{sorting_value_between, ChildrenIndex};
