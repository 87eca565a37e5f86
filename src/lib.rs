//! # dmml-core
//!
//! The node reference graph, scene directory and hierarchy index of the DMML data model.
//!
//! ## Overview
//!
//! A [`scene::Scene`] owns a set of uniquely identified [`node::Node`]s. Nodes point at each
//! other through **references**: named, ordered, ID-based links that resolve lazily against the
//! scene. A reference to an ID that is not in the scene yet simply stays pending, and resolves
//! once a node with that ID is added.
//!
//! ### Key Features
//!
//! - **Reference roles**: well-known roles (`display`, `storage`, `transform`, `parent`,
//!   `associated`), custom roles and structured role families (`unit/length`)
//! - **Event relay**: references observe a set of events on their target and forward them to the
//!   referencing node under a role-specific kind
//! - **Referenced-ID bookkeeping**: the scene knows who points at every ID, for removal and for
//!   ID remapping on import
//! - **Hierarchy index**: a cached, lazily rebuilt parent -> children tree ordered by sorting value
//! - **Import with ID remapping**: collision-free IDs for imported nodes, references remapped to
//!   follow, strays dropped
//!
//! ## Architecture
//!
//! - **[`properties`]**: identifiers (`NodeId`, `NodeHandle`), node kinds
//! - **[`role`]**: reference roles and the per-node role registry
//! - **[`reference`]**: reference entries and the per-node reference table
//! - **[`node`]**: the node entity and its capability traits
//! - **[`scene`]**: the directory, reference engine, hierarchy index and import
//! - **[`event`]**: event kinds, event sets and scene events
//! - **[`codec`]**: the attribute grammar and the TOML scene document
//! - **[`config`]**: scene configuration
//!
//! ## Quick Start
//!
//! ```rust
//! use dmml_core::{
//!     event::{EventKind, NodeEvent},
//!     node::Node,
//!     properties::NodeKind,
//!     role::ReferenceRole,
//!     scene::Scene,
//! };
//!
//! let mut scene = Scene::default();
//!
//! // References may name nodes that do not exist yet
//! let model = scene.add_node(Node::new(NodeKind::Model).with_name("Liver")).unwrap();
//! scene
//!     .set_and_observe_reference_id(model.as_str(), &ReferenceRole::Display, Some("LiverDisplay"), None)
//!     .unwrap();
//! assert!(scene.reference(model.as_str(), &ReferenceRole::Display, 0).is_none());
//!
//! scene
//!     .add_node(Node::new(NodeKind::ModelDisplay).with_id("LiverDisplay"))
//!     .unwrap();
//! assert!(scene.reference(model.as_str(), &ReferenceRole::Display, 0).is_some());
//!
//! // Changes of the display node reach the model as DisplayModified
//! scene.take_events();
//! scene.modified("LiverDisplay").unwrap();
//! assert!(scene.take_events().iter().any(|event| matches!(
//!     event,
//!     NodeEvent::Forwarded(observer, EventKind::DisplayModified, _) if *observer == model
//! )));
//! ```
//!
//! ### Serialization
//!
//! Scenes serialize to TOML, one `[[node]]` table per node:
//!
//! ```rust
//! # use dmml_core::scene::Scene;
//! let mut scene = Scene::default();
//! let ids = scene
//!     .import(
//!         r#"
//! [[node]]
//! tag = "Model"
//! id = "vtkDMMLModelNode1"
//! references = "display:vtkDMMLModelDisplayNode1;"
//!
//! [[node]]
//! tag = "ModelDisplay"
//! id = "vtkDMMLModelDisplayNode1"
//! "#,
//!     )
//!     .unwrap();
//! assert_eq!(ids.len(), 2);
//! assert!(scene.serialize().unwrap().contains("vtkDMMLModelDisplayNode1"));
//! ```
//!
//! ## Features
//!
//! - **default**: the library
//! - **bin**: the `dmml` scene inspector (`tree`, `refs`, `import`, `check`)

pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod node;
pub mod properties;
pub mod reference;
pub mod role;
pub mod scene;
#[cfg(test)]
mod tests;

pub use error::*;
