//! Shared test utilities for Scene testing

use crate::{
    node::Node,
    properties::{HierarchyProps, NodeId, NodeKind},
    role::ReferenceRole,
    scene::Scene,
};

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn hierarchy_kind() -> NodeKind {
    NodeKind::Hierarchy(HierarchyProps::default())
}

/// A scene holding one model node already displayed through one display node.
///
/// Returns the scene plus the model and display IDs.
pub fn create_displayed_model_scene() -> (Scene, NodeId, NodeId) {
    init_logging();
    let mut scene = Scene::default();
    let model = scene
        .add_node(Node::new(NodeKind::Model).with_name("Model"))
        .unwrap();
    let display = scene
        .add_node(Node::new(NodeKind::ModelDisplay).with_name("Display"))
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
    (scene, model, display)
}

/// A hierarchy `root` with three children whose sorting values are 1, 2 and 3.
///
/// Returns the scene, the root ID and the children IDs in sibling order.
pub fn create_test_hierarchy() -> (Scene, NodeId, Vec<NodeId>) {
    init_logging();
    let mut scene = Scene::default();
    let root = scene
        .add_node(Node::new(hierarchy_kind()).with_name("root"))
        .unwrap();
    let mut children = Vec::new();
    for (i, name) in ["first", "second", "third"].iter().enumerate() {
        let mut node = Node::new(hierarchy_kind()).with_name(*name);
        node.set_sorting_value((i + 1) as f64).unwrap();
        let id = scene.add_node(node).unwrap();
        scene
            .set_parent_node_id(id.as_str(), Some(root.as_str()))
            .unwrap();
        children.push(id);
    }
    scene.take_events();
    (scene, root, children)
}
