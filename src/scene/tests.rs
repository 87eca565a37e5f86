//! Tests for the scene directory and the hierarchy index

use super::*;
use crate::{
    config::SceneConfig,
    event::NodeEvent,
    node::Node,
    properties::{NodeId, NodeKind},
    role::ReferenceRole,
    tests::helpers::*,
    DmmlError,
};
use test_log::test;

fn ids(nodes: Vec<&Node>) -> Vec<NodeId> {
    nodes.into_iter().map(|n| n.id().clone()).collect()
}

#[test]
fn test_generated_ids_are_unique_per_class() {
    let mut scene = Scene::default();
    let first = scene.add_node(Node::new(NodeKind::Model)).unwrap();
    let second = scene.add_node(Node::new(NodeKind::Model)).unwrap();
    let display = scene.add_node(Node::new(NodeKind::ModelDisplay)).unwrap();
    assert_eq!(first, "vtkDMMLModelNode1");
    assert_eq!(second, "vtkDMMLModelNode2");
    assert_eq!(display, "vtkDMMLModelDisplayNode1");

    scene
        .add_node(Node::new(NodeKind::Model).with_id("vtkDMMLModelNode3"))
        .unwrap();
    assert_eq!(scene.generate_unique_id("vtkDMMLModelNode"), "vtkDMMLModelNode4");
}

#[test]
fn test_taken_id_is_replaced() {
    let mut scene = Scene::default();
    let first = scene
        .add_node(Node::new(NodeKind::Model).with_id("Liver"))
        .unwrap();
    let second = scene
        .add_node(Node::new(NodeKind::Model).with_id("Liver"))
        .unwrap();
    assert_eq!(first, "Liver");
    assert_ne!(second, first);
    assert_eq!(scene.number_of_nodes(), 2);
    assert_eq!(
        scene.nodes().map(|n| n.id().clone()).collect::<Vec<_>>(),
        vec![first, second]
    );
}

#[test]
fn test_removed_node_can_join_another_scene() {
    let (mut scene, model, _display) = create_displayed_model_scene();
    let removed = scene.remove_node(model.as_str()).unwrap();
    let mut other = Scene::default();
    let readded = other.add_node(removed).unwrap();
    assert_eq!(readded, model);
    assert!(other.node(model.as_str()).unwrap().is_attached());
}

#[test]
fn test_singletons_merge_into_the_registered_node() {
    init_logging();
    let mut scene = Scene::default();
    let first = scene
        .add_node(Node::new(NodeKind::Selection).with_singleton_tag("Singleton"))
        .unwrap();
    let mut update = Node::new(NodeKind::Selection)
        .with_singleton_tag("Singleton")
        .with_name("Selection");
    update.set_attribute("activeVolumeID", Some("vtkDMMLScalarVolumeNode1"));
    scene.take_events();

    let merged = scene.add_node(update).unwrap();
    assert_eq!(merged, first);
    assert_eq!(scene.number_of_nodes(), 1);
    let node = scene
        .singleton_node("Singleton", "vtkDMMLSelectionNode")
        .unwrap();
    assert_eq!(node.name(), "Selection");
    assert_eq!(node.attribute("activeVolumeID"), Some("vtkDMMLScalarVolumeNode1"));
    assert_eq!(scene.take_events(), vec![NodeEvent::Modified(first)]);
}

#[test]
fn test_merging_an_identical_singleton_changes_nothing() {
    init_logging();
    let mut scene = Scene::default();
    let mut selection = Node::new(NodeKind::Selection).with_singleton_tag("Singleton");
    selection.set_attribute("activeVolumeID", Some("vtkDMMLScalarVolumeNode1"));
    let first = scene.add_node(selection.clone()).unwrap();
    let node_mtime = scene.node(first.as_str()).unwrap().mtime();
    let scene_mtime = scene.mtime();
    scene.take_events();

    assert_eq!(scene.add_node(selection).unwrap(), first);
    assert!(scene.take_events().is_empty());
    assert_eq!(scene.node(first.as_str()).unwrap().mtime(), node_mtime);
    assert_eq!(scene.mtime(), scene_mtime);
}

#[test]
fn test_clear_keeps_singletons() {
    let mut scene = Scene::default();
    let selection = scene
        .add_node(Node::new(NodeKind::Selection).with_singleton_tag("Singleton"))
        .unwrap();
    scene.add_node(Node::new(NodeKind::Model)).unwrap();
    scene.clear(false);
    assert_eq!(scene.number_of_nodes(), 1);
    assert!(scene.contains(selection.as_str()));
    // Counters survive a partial clear
    assert_eq!(scene.add_node(Node::new(NodeKind::Model)).unwrap(), "vtkDMMLModelNode2");

    scene.clear(true);
    assert_eq!(scene.number_of_nodes(), 0);
    assert_eq!(scene.add_node(Node::new(NodeKind::Model)).unwrap(), "vtkDMMLModelNode1");
}

#[test]
fn test_lookup_by_class_and_name() {
    let (mut scene, model, display) = create_displayed_model_scene();
    scene
        .add_node(Node::new(NodeKind::Model).with_name("Display"))
        .unwrap();
    assert_eq!(ids(scene.nodes_by_class("vtkDMMLModelDisplayNode")), vec![display]);
    assert_eq!(scene.nodes_by_name("Display").len(), 2);
    assert_eq!(ids(scene.nodes_by_name("Model")), vec![model]);
    assert!(scene.nodes_by_name("Nothing").is_empty());
}

#[test]
fn test_modify_reports_changes() {
    let (mut scene, model, _display) = create_displayed_model_scene();
    let before = scene.mtime();
    assert!(scene.modify(model.as_str(), |n| n.set_name("Liver")).unwrap());
    assert!(scene.mtime() > before);
    assert_eq!(scene.take_events(), vec![NodeEvent::Modified(model.clone())]);

    assert!(!scene.modify(model.as_str(), |n| n.set_name("Liver")).unwrap());
    assert!(scene.take_events().is_empty());
    assert!(matches!(
        scene.modify("Nothing", |n| n.set_name("x")),
        Err(DmmlError::NotFound(_))
    ));
}

#[test]
fn test_modify_reconciles_reference_edits() {
    let (mut scene, model, display) = create_displayed_model_scene();
    scene
        .modify(model.as_str(), |n| {
            n.remove_reference_ids(Some(&ReferenceRole::Display)).unwrap();
        })
        .unwrap();
    assert!(!scene.is_node_referenced(display.as_str()));
    let events = scene.take_events();
    assert!(events.contains(&NodeEvent::ReferenceRemoved(
        model.clone(),
        ReferenceRole::Display,
        display
    )));
    assert_eq!(events.last(), Some(&NodeEvent::Modified(model)));
}

#[test]
fn test_event_log_is_capped() {
    let mut scene = Scene::new(SceneConfig {
        event_log_limit: Some(2),
        ..Default::default()
    });
    let model = scene.add_node(Node::new(NodeKind::Model)).unwrap();
    for _ in 0..5 {
        scene.modified(model.as_str()).unwrap();
    }
    assert_eq!(scene.take_events().len(), 2);
}

#[test]
fn test_reference_graph_snapshot() {
    let (mut scene, model, display) = create_displayed_model_scene();
    let transform = scene.add_node(Node::new(NodeKind::LinearTransform)).unwrap();
    scene
        .set_and_observe_reference_id(model.as_str(), &ReferenceRole::Transform, Some(transform.as_str()), None)
        .unwrap();
    let graph = ReferenceGraph::from_scene(&scene);
    assert_eq!(graph.as_graph().node_count(), 3);
    assert_eq!(graph.as_graph().edge_count(), 2);
    assert_eq!(graph.referencers_of(&display), vec![model.clone()]);
    assert!(!graph.has_cycle());

    scene
        .set_and_observe_reference_id(transform.as_str(), &ReferenceRole::Transform, Some(transform.as_str()), None)
        .unwrap();
    assert!(ReferenceGraph::from_scene(&scene).has_cycle());
    let without_transforms =
        ReferenceGraph::from_scene_filtered(&scene, |role| *role != ReferenceRole::Transform);
    assert!(!without_transforms.has_cycle());
    assert_eq!(without_transforms.as_graph().edge_count(), 1);
}

#[test]
fn test_hierarchy_cache_rebuilds_lazily() {
    let (mut scene, root, children) = create_test_hierarchy();
    assert_eq!(scene.children_ids(root.as_str()), children);
    assert_eq!(scene.hierarchy.read().last_rebuilt, scene.nodes_mtime());

    scene
        .set_parent_node_id(children[1].as_str(), None)
        .unwrap();
    assert_eq!(scene.hierarchy.read().last_rebuilt, 0);
    assert_eq!(
        scene.children_ids(root.as_str()),
        vec![children[0].clone(), children[2].clone()]
    );

    let late = scene.add_node(Node::new(hierarchy_kind())).unwrap();
    scene.set_parent_node_id(late.as_str(), Some(root.as_str())).unwrap();
    assert_eq!(scene.children_ids(root.as_str()).last(), Some(&late));
}

#[test]
fn test_midpoint_insertion() {
    let (mut scene, root, children) = create_test_hierarchy();
    scene.set_index_in_parent(children[2].as_str(), 0).unwrap();
    assert_eq!(
        scene.node(children[2].as_str()).unwrap().hierarchy().unwrap().sorting_value,
        Some(0.0)
    );
    assert_eq!(
        scene.children_ids(root.as_str()),
        vec![children[2].clone(), children[0].clone(), children[1].clone()]
    );
    assert_eq!(scene.index_in_parent(children[2].as_str()), Some(0));

    scene.set_index_in_parent(children[2].as_str(), 1).unwrap();
    assert_eq!(
        scene.node(children[2].as_str()).unwrap().hierarchy().unwrap().sorting_value,
        Some(1.5)
    );
    assert_eq!(scene.index_in_parent(children[2].as_str()), Some(1));
}

#[test]
fn test_narrow_gap_renumbers_siblings() {
    let (mut scene, root, children) = create_test_hierarchy();
    scene
        .modify(children[1].as_str(), |n| n.set_sorting_value(1.0 + 1e-12).unwrap())
        .unwrap();
    scene.set_index_in_parent(children[2].as_str(), 1).unwrap();
    let values: Vec<Option<f64>> = children
        .iter()
        .map(|c| scene.node(c.as_str()).unwrap().hierarchy().unwrap().sorting_value)
        .collect();
    assert_eq!(values, vec![Some(1.0), Some(2.0), Some(1.5)]);
    assert_eq!(
        scene.children_ids(root.as_str()),
        vec![children[0].clone(), children[2].clone(), children[1].clone()]
    );
}

#[test]
fn test_move_in_parent_swaps_neighbours() {
    let (mut scene, root, children) = create_test_hierarchy();
    scene.move_in_parent(children[0].as_str(), 1).unwrap();
    assert_eq!(
        scene.children_ids(root.as_str()),
        vec![children[1].clone(), children[0].clone(), children[2].clone()]
    );
    scene.move_in_parent(children[2].as_str(), -5).unwrap();
    assert_eq!(
        scene.children_ids(root.as_str()),
        vec![children[2].clone(), children[1].clone(), children[0].clone()]
    );
    // Already last
    scene.move_in_parent(children[0].as_str(), 1).unwrap();
    assert_eq!(scene.index_in_parent(children[0].as_str()), Some(2));
}

#[test]
fn test_move_in_parent_breaks_ties() {
    let (mut scene, root, children) = create_test_hierarchy();
    for child in children.iter() {
        scene
            .modify(child.as_str(), |n| n.set_sorting_value(5.0).unwrap())
            .unwrap();
    }
    scene.move_in_parent(children[0].as_str(), 1).unwrap();
    assert_eq!(
        scene.children_ids(root.as_str()),
        vec![children[1].clone(), children[0].clone(), children[2].clone()]
    );
}

#[test]
fn test_hierarchy_operations_reject_plain_nodes() {
    let (mut scene, model, _display) = create_displayed_model_scene();
    assert!(matches!(
        scene.set_parent_node_id(model.as_str(), None),
        Err(DmmlError::NotHierarchy(_))
    ));
    let node = scene.add_node(Node::new(hierarchy_kind())).unwrap();
    assert!(matches!(
        scene.set_parent_node_id(node.as_str(), Some(node.as_str())),
        Err(DmmlError::SelfParent(_))
    ));
    assert!(matches!(
        scene.set_index_in_parent("Nothing", 0),
        Err(DmmlError::NotFound(_))
    ));
    // No parent: nothing to do
    scene.set_index_in_parent(node.as_str(), 3).unwrap();
    scene.move_in_parent(node.as_str(), 1).unwrap();
    assert_eq!(scene.index_in_parent(node.as_str()), None);
}

#[test]
fn test_sorting_value_between() {
    assert_eq!(sorting_value_between(None, None), 1.0);
    assert_eq!(sorting_value_between(None, Some(1.0)), 0.0);
    assert_eq!(sorting_value_between(Some(3.0), None), 4.0);
    assert_eq!(sorting_value_between(Some(1.0), Some(2.0)), 1.5);
}
