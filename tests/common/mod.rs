//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use dmml_core::{
    node::Node,
    properties::{HierarchyProps, NodeId, NodeKind},
    role::ReferenceRole,
    scene::Scene,
};
use std::path::PathBuf;
use tempfile::TempDir;

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times. Subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// A model referencing its display node plus two helper nodes that are not part of the
/// document.
#[allow(dead_code)]
pub const MODEL_WITH_STRAYS: &str = r#"
version = 1

[[node]]
tag = "Model"
id = "vtkDMMLModelNode1"
name = "Liver"
references = "display:vtkDMMLModelDisplayNode1;helper:HelperNodeX HelperNodeY;"

[[node]]
tag = "ModelDisplay"
id = "vtkDMMLModelDisplayNode1"
name = "LiverDisplay"
"#;

/// A scene holding `vtkDMMLModelNode1` displayed through `vtkDMMLModelDisplayNode1`.
#[allow(dead_code)]
pub fn create_model_scene() -> Scene {
    init_logging();
    let mut scene = Scene::default();
    let model = scene
        .add_node(Node::new(NodeKind::Model).with_name("Kidney"))
        .unwrap();
    let display = scene
        .add_node(Node::new(NodeKind::ModelDisplay).with_name("KidneyDisplay"))
        .unwrap();
    scene
        .set_and_observe_reference_id(
            model.as_str(),
            &ReferenceRole::Display,
            Some(display.as_str()),
            None,
        )
        .unwrap();
    scene.take_events();
    scene
}

#[allow(dead_code)]
pub fn hierarchy_node(name: &str) -> Node {
    Node::new(NodeKind::Hierarchy(HierarchyProps::default())).with_name(name)
}

/// Adds a hierarchy node named `name` under `parent`.
#[allow(dead_code)]
pub fn add_child(scene: &mut Scene, parent: Option<&NodeId>, name: &str) -> NodeId {
    let id = scene.add_node(hierarchy_node(name)).unwrap();
    scene
        .set_parent_node_id(id.as_str(), parent.map(NodeId::as_str))
        .unwrap();
    id
}

/// Writes `content` to `scene.toml` in `temp_dir` and returns its path.
#[allow(dead_code)]
pub fn write_scene_file(temp_dir: &TempDir, content: &str) -> PathBuf {
    let path = temp_dir.path().join("scene.toml");
    std::fs::write(&path, content).unwrap();
    path
}
