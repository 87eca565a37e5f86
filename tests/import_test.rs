//! Scene import, load and serialization tests

mod common;

use common::*;
use dmml_core::{
    config::SceneConfig,
    event::NodeEvent,
    node::{Displayable, Hierarchical, Node},
    properties::NodeKind,
    role::{ReferenceRole, RoleFamily},
    scene::{ChildrenIndex, Scene},
};
use tempfile::TempDir;
use test_log::test;

#[test]
fn test_import_remaps_colliding_ids() {
    let mut scene = create_model_scene();
    let imported = scene.import(MODEL_WITH_STRAYS).unwrap();
    assert_eq!(imported, vec!["vtkDMMLModelNode2", "vtkDMMLModelDisplayNode2"]);

    let model = scene.node("vtkDMMLModelNode2").unwrap();
    assert_eq!(model.name(), "Liver");
    assert_eq!(model.display_node_ids(), vec!["vtkDMMLModelDisplayNode2"]);
    assert_eq!(model.total_reference_count(), 1);
    assert_eq!(
        scene
            .reference("vtkDMMLModelNode2", &ReferenceRole::Display, 0)
            .map(Node::name),
        Some("LiverDisplay")
    );

    // The pre-existing nodes are untouched
    assert_eq!(
        scene.reference_id("vtkDMMLModelNode1", &ReferenceRole::Display, 0),
        Some("vtkDMMLModelDisplayNode1".into())
    );
    assert_eq!(scene.number_of_nodes(), 4);
    assert!(!scene.is_node_referenced("HelperNodeX"));
}

#[test]
fn test_import_events_bracket_the_additions() {
    let mut scene = create_model_scene();
    scene.import(MODEL_WITH_STRAYS).unwrap();
    let events = scene.take_events();
    assert_eq!(events.first(), Some(&NodeEvent::ImportStarted));
    assert_eq!(events.last(), Some(&NodeEvent::ImportEnded));
    let added: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            NodeEvent::NodeAdded(id) => Some(id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(added, vec!["vtkDMMLModelNode2", "vtkDMMLModelDisplayNode2"]);
}

#[test]
fn test_import_without_pruning_keeps_references_into_the_scene() {
    let helper = ReferenceRole::Custom("helper".to_string());
    for (prune, expected) in [(true, vec![]), (false, vec!["HelperNodeX"])] {
        init_logging();
        let mut scene = Scene::new(SceneConfig {
            prune_unimported_references: prune,
            ..Default::default()
        });
        scene
            .add_node(Node::new(NodeKind::Model).with_id("HelperNodeX"))
            .unwrap();
        scene.import(MODEL_WITH_STRAYS).unwrap();
        // HelperNodeY is neither imported nor in the scene
        assert_eq!(scene.reference_ids("vtkDMMLModelNode1", &helper), expected);
        assert_eq!(scene.is_node_referenced("HelperNodeX"), !prune);
    }
}

#[test]
fn test_import_into_empty_scene_keeps_ids() {
    init_logging();
    let mut scene = Scene::default();
    let imported = scene.import(MODEL_WITH_STRAYS).unwrap();
    assert_eq!(imported, vec!["vtkDMMLModelNode1", "vtkDMMLModelDisplayNode1"]);
    assert!(scene
        .reference("vtkDMMLModelNode1", &ReferenceRole::Display, 0)
        .is_some());
    // Generated IDs do not collide with imported ones
    assert_eq!(
        scene.add_node(Node::new(NodeKind::Model)).unwrap(),
        "vtkDMMLModelNode2"
    );
}

#[test]
fn test_import_skips_unknown_tags() {
    init_logging();
    let mut scene = Scene::default();
    let imported = scene
        .import(
            r#"
[[node]]
tag = "Annotation"
id = "vtkDMMLAnnotationNode1"

[[node]]
tag = "Model"
id = "vtkDMMLModelNode1"
references = "helper:vtkDMMLAnnotationNode1;"
"#,
        )
        .unwrap();
    assert_eq!(imported, vec!["vtkDMMLModelNode1"]);
    assert_eq!(
        scene.node("vtkDMMLModelNode1").unwrap().total_reference_count(),
        0
    );
}

#[test]
fn test_import_merges_singletons() {
    init_logging();
    let mut scene = Scene::default();
    let selection = scene
        .add_node(Node::new(NodeKind::Selection).with_singleton_tag("Singleton"))
        .unwrap();
    let imported = scene
        .import(&format!(
            r#"
[[node]]
tag = "Selection"
id = "{selection}"
name = "Imported"
singletonTag = "Singleton"

[[node]]
tag = "Model"
id = "vtkDMMLModelNode1"
references = "helper:{selection};"
"#
        ))
        .unwrap();
    assert_eq!(imported, vec![selection.clone(), "vtkDMMLModelNode1".into()]);
    assert_eq!(scene.number_of_nodes(), 2);
    assert_eq!(scene.node(selection.as_str()).unwrap().name(), "Imported");
    assert_eq!(
        scene.reference_ids("vtkDMMLModelNode1", &ReferenceRole::Custom("helper".into())),
        vec![selection]
    );
}

#[test]
fn test_serialized_scene_loads_back() {
    let mut scene = create_model_scene();
    let root = add_child(&mut scene, None, "root");
    let child = add_child(&mut scene, Some(&root), "child");
    scene
        .set_associated_node_id(child.as_str(), Some("vtkDMMLModelNode1"))
        .unwrap();
    let text = scene.serialize().unwrap();

    let mut copy = Scene::default();
    copy.add_node(Node::new(NodeKind::Unit)).unwrap();
    let loaded = copy.load(&text).unwrap();
    assert_eq!(loaded.len(), 4);
    assert_eq!(copy.number_of_nodes(), 4);
    assert!(copy
        .reference("vtkDMMLModelNode1", &ReferenceRole::Display, 0)
        .is_some());
    assert_eq!(copy.children_ids(root.as_str()), vec![child.clone()]);
    assert_eq!(
        copy.associated_hierarchy_node("vtkDMMLModelNode1")
            .map(|n| n.id().clone()),
        Some(child.clone())
    );
    assert_eq!(
        copy.node(child.as_str()).unwrap().hierarchy().unwrap().sorting_value,
        scene.node(child.as_str()).unwrap().hierarchy().unwrap().sorting_value
    );
    assert_eq!(copy.serialize().unwrap(), text);
}

#[test]
fn test_load_from_file() {
    init_logging();
    let temp_dir = TempDir::new().unwrap();
    let path = write_scene_file(&temp_dir, MODEL_WITH_STRAYS);
    let text = std::fs::read_to_string(path).unwrap();
    let mut scene = Scene::default();
    scene.load(&text).unwrap();
    assert_eq!(scene.number_of_nodes(), 2);
}

#[test]
fn test_malformed_documents_are_rejected() {
    init_logging();
    let mut scene = create_model_scene();
    assert!(scene.import("[[node]]\nid = \"x\"\n").is_err());
    assert!(scene
        .import("[[node]]\ntag = \"Model\"\nreferences = \"display-without-separator\"\n")
        .is_err());
    assert_eq!(scene.number_of_nodes(), 2);
    assert!(scene.take_events().is_empty());
}

#[test]
fn test_import_drops_self_parent_references() {
    init_logging();
    let mut scene = Scene::default();
    let imported = scene
        .import(
            r#"
[[node]]
tag = "Hierarchy"
id = "vtkDMMLHierarchyNode1"
references = "parent:vtkDMMLHierarchyNode1;"
"#,
        )
        .unwrap();
    assert_eq!(imported, vec!["vtkDMMLHierarchyNode1"]);
    let node = scene.node("vtkDMMLHierarchyNode1").unwrap();
    assert_eq!(node.parent_node_id(), None);
    assert!(scene.children_ids("vtkDMMLHierarchyNode1").is_empty());
    assert!(scene.all_children_nodes("vtkDMMLHierarchyNode1").is_empty());
}

#[test]
fn test_import_rejects_ids_holding_separators() {
    let mut scene = create_model_scene();
    assert!(scene
        .import("[[node]]\ntag = \"Model\"\nid = \"two words\"\n")
        .is_err());
    assert!(scene
        .import("[[node]]\ntag = \"Model\"\nreferences = \"a b:vtkDMMLModelNode1;\"\n")
        .is_err());
    assert_eq!(scene.number_of_nodes(), 2);
}

#[test]
fn test_custom_and_family_roles_survive_serialization() {
    let mut scene = create_model_scene();
    let overlay = ReferenceRole::Custom("overlay-2".to_string());
    let length = RoleFamily::new("unit").member("length");
    let unit = scene.add_node(Node::new(NodeKind::Unit).with_id("unit:mm")).unwrap();
    scene
        .add_reference_id("vtkDMMLModelNode1", &overlay, "vtkDMMLModelDisplayNode1", None)
        .unwrap();
    scene
        .add_reference_id("vtkDMMLModelNode1", &overlay, unit.as_str(), None)
        .unwrap();
    scene
        .set_reference_id("vtkDMMLModelNode1", &length, 0, Some(unit.as_str()), None)
        .unwrap();
    let text = scene.serialize().unwrap();

    let mut copy = Scene::default();
    copy.load(&text).unwrap();
    assert_eq!(
        copy.reference_ids("vtkDMMLModelNode1", &overlay),
        vec!["vtkDMMLModelDisplayNode1".into(), unit.clone()]
    );
    assert_eq!(copy.reference_ids("vtkDMMLModelNode1", &length), vec![unit.clone()]);
    assert_eq!(
        copy.reference("vtkDMMLModelNode1", &length, 0).map(|n| n.id().clone()),
        Some(unit)
    );
    assert_eq!(copy.serialize().unwrap(), text);
}
