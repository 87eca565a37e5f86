/// [crate::properties] contains the basic building blocks of a [crate::scene::Scene]: node
/// identifiers, the handles used to cache reference resolution, and the closed set of node kinds.
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{
    borrow::Borrow,
    collections::BTreeMap,
    fmt::{Display, Formatter},
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{
    event::{EventKind, EventSet},
    role::{ReferenceRole, RoleFamily, RoleRegistry},
    DmmlError,
};

/// Node ID
///
/// Unique within a scene, assigned once and immutable while the node is attached. The empty ID
/// means "unassigned" on nodes and "cleared" on references.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        NodeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// IDs are written whitespace-separated and `;`-terminated in the `references` attribute, so
    /// neither may appear inside one.
    pub fn validate(&self) -> Result<(), DmmlError> {
        if self.0.chars().any(|c| c.is_whitespace() || c == ';') {
            return Err(DmmlError::InvalidId(self.0.clone()));
        }
        Ok(())
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        NodeId(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        NodeId(id)
    }
}

impl From<&NodeId> for NodeId {
    fn from(id: &NodeId) -> Self {
        id.clone()
    }
}

impl PartialEq<str> for NodeId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for NodeId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_SCENE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [crate::scene::Scene].
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SceneId(u64);

impl SceneId {
    pub(crate) fn next() -> Self {
        SceneId(NEXT_SCENE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifies one attachment of a node to a scene. A node removed and re-added (or a different
/// node added under the same ID) receives a new handle, so a cached handle is valid only while it
/// equals the handle of the node currently registered under the reference's ID.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeHandle {
    pub scene: SceneId,
    pub serial: u64,
}

/// Properties specific to hierarchy nodes. The parent and associated node links are reference
/// roles ([ReferenceRole::Parent], [ReferenceRole::Associated]), not fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyProps {
    /// Defines sibling order. `None` until the scene issues a value on insertion.
    pub sorting_value: Option<f64>,
    pub allow_multiple_children: bool,
    pub expanded: bool,
}

impl Default for HierarchyProps {
    fn default() -> Self {
        HierarchyProps {
            sorting_value: None,
            allow_multiple_children: true,
            expanded: true,
        }
    }
}

/// [NodeKind] is the closed set of node types this data model knows how to create, name, and
/// serialize. Behavior that varies per type (`tag_name`, `class_name`, default reference roles,
/// default storage) dispatches on this enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Model,
    ModelDisplay,
    ModelStorage,
    ScalarVolume,
    ScalarVolumeDisplay,
    VolumeArchetypeStorage,
    LinearTransform,
    /// Application-wide selection state, usually a singleton. Holds the `unit/` role family.
    Selection,
    Unit,
    Hierarchy(HierarchyProps),
}

static NODE_KINDS: Lazy<Vec<NodeKind>> = Lazy::new(|| {
    vec![
        NodeKind::Model,
        NodeKind::ModelDisplay,
        NodeKind::ModelStorage,
        NodeKind::ScalarVolume,
        NodeKind::ScalarVolumeDisplay,
        NodeKind::VolumeArchetypeStorage,
        NodeKind::LinearTransform,
        NodeKind::Selection,
        NodeKind::Unit,
        NodeKind::Hierarchy(HierarchyProps::default()),
    ]
});

pub const ATTR_SORTING_VALUE: &str = "sortingValue";
pub const ATTR_ALLOW_MULTIPLE_CHILDREN: &str = "allowMultipleChildren";
pub const ATTR_EXPANDED: &str = "expanded";

impl NodeKind {
    /// All kinds, in registration order.
    pub fn all() -> &'static [NodeKind] {
        &NODE_KINDS
    }

    /// Creates a fresh kind value for a serialized tag name, None if the tag is unknown.
    pub fn create_node_instance(tag: &str) -> Option<NodeKind> {
        NODE_KINDS.iter().find(|kind| kind.tag_name() == tag).cloned()
    }

    /// The element name used when the node is serialized.
    pub fn tag_name(&self) -> &'static str {
        match self {
            NodeKind::Model => "Model",
            NodeKind::ModelDisplay => "ModelDisplay",
            NodeKind::ModelStorage => "ModelStorage",
            NodeKind::ScalarVolume => "Volume",
            NodeKind::ScalarVolumeDisplay => "VolumeDisplay",
            NodeKind::VolumeArchetypeStorage => "VolumeArchetypeStorage",
            NodeKind::LinearTransform => "LinearTransform",
            NodeKind::Selection => "Selection",
            NodeKind::Unit => "Unit",
            NodeKind::Hierarchy(_) => "Hierarchy",
        }
    }

    /// The class name, used as the stem of generated node IDs.
    pub fn class_name(&self) -> &'static str {
        match self {
            NodeKind::Model => "vtkDMMLModelNode",
            NodeKind::ModelDisplay => "vtkDMMLModelDisplayNode",
            NodeKind::ModelStorage => "vtkDMMLModelStorageNode",
            NodeKind::ScalarVolume => "vtkDMMLScalarVolumeNode",
            NodeKind::ScalarVolumeDisplay => "vtkDMMLScalarVolumeDisplayNode",
            NodeKind::VolumeArchetypeStorage => "vtkDMMLVolumeArchetypeStorageNode",
            NodeKind::LinearTransform => "vtkDMMLLinearTransformNode",
            NodeKind::Selection => "vtkDMMLSelectionNode",
            NodeKind::Unit => "vtkDMMLUnitNode",
            NodeKind::Hierarchy(_) => "vtkDMMLHierarchyNode",
        }
    }

    pub fn is_displayable(&self) -> bool {
        matches!(self, NodeKind::Model | NodeKind::ScalarVolume)
    }

    pub fn is_storable(&self) -> bool {
        matches!(
            self,
            NodeKind::Model | NodeKind::ScalarVolume | NodeKind::LinearTransform
        )
    }

    pub fn is_transformable(&self) -> bool {
        matches!(
            self,
            NodeKind::Model | NodeKind::ScalarVolume | NodeKind::LinearTransform
        )
    }

    pub fn is_hierarchy(&self) -> bool {
        matches!(self, NodeKind::Hierarchy(_))
    }

    /// The storage node kind that can read and write this kind, if it is storable.
    pub fn default_storage_kind(&self) -> Option<NodeKind> {
        match self {
            NodeKind::Model => Some(NodeKind::ModelStorage),
            NodeKind::ScalarVolume => Some(NodeKind::VolumeArchetypeStorage),
            _ => None,
        }
    }

    /// The reference roles every node of this kind declares on creation.
    pub fn default_roles(&self) -> RoleRegistry {
        let mut roles = RoleRegistry::default();
        if self.is_displayable() {
            roles.declare(
                ReferenceRole::Display,
                Some("displayNodeRef"),
                Some(EventKind::Modified.into()),
            );
            roles.set_forward_as(&ReferenceRole::Display, EventKind::DisplayModified);
        }
        if self.is_storable() {
            roles.declare(ReferenceRole::Storage, Some("storageNodeRef"), None);
            roles.set_forward_as(&ReferenceRole::Storage, EventKind::StorageModified);
        }
        if self.is_transformable() {
            roles.declare(
                ReferenceRole::Transform,
                Some("transformNodeRef"),
                Some(EventKind::Modified | EventKind::TransformModified),
            );
            roles.set_forward_as(&ReferenceRole::Transform, EventKind::TransformModified);
        }
        match self {
            NodeKind::Hierarchy(_) => {
                roles.declare(ReferenceRole::Parent, Some("parentNodeRef"), None);
                roles.set_forward_as(&ReferenceRole::Parent, EventKind::HierarchyModified);
                roles.declare(
                    ReferenceRole::Associated,
                    Some("associatedNodeRef"),
                    Some(EventKind::Modified.into()),
                );
                roles.set_forward_as(&ReferenceRole::Associated, EventKind::HierarchyModified);
            }
            NodeKind::Selection => {
                roles.declare_family(RoleFamily::new("unit"), "UnitRef", Some(EventSet::empty()));
            }
            _ => {}
        }
        roles
    }

    pub fn hierarchy(&self) -> Option<&HierarchyProps> {
        match self {
            NodeKind::Hierarchy(props) => Some(props),
            _ => None,
        }
    }

    pub fn hierarchy_mut(&mut self) -> Option<&mut HierarchyProps> {
        match self {
            NodeKind::Hierarchy(props) => Some(props),
            _ => None,
        }
    }

    /// Writes the kind specific attributes.
    pub fn write_attributes(&self, attributes: &mut BTreeMap<String, String>) {
        if let NodeKind::Hierarchy(props) = self {
            if let Some(value) = props.sorting_value {
                attributes.insert(ATTR_SORTING_VALUE.to_string(), value.to_string());
            }
            attributes.insert(
                ATTR_ALLOW_MULTIPLE_CHILDREN.to_string(),
                props.allow_multiple_children.to_string(),
            );
            attributes.insert(ATTR_EXPANDED.to_string(), props.expanded.to_string());
        }
    }

    /// Reads one kind specific attribute. Returns false if the key is not one of this kind's.
    pub fn read_attribute(&mut self, key: &str, value: &str) -> Result<bool, DmmlError> {
        let NodeKind::Hierarchy(props) = self else {
            return Ok(false);
        };
        match key {
            ATTR_SORTING_VALUE => props.sorting_value = Some(value.trim().parse::<f64>()?),
            ATTR_ALLOW_MULTIPLE_CHILDREN => props.allow_multiple_children = parse_flag(value)?,
            ATTR_EXPANDED => props.expanded = parse_flag(value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.tag_name())
    }
}

/// Parses the boolean attribute spellings found in scene files.
pub fn parse_flag(value: &str) -> Result<bool, DmmlError> {
    match value.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(DmmlError::Serialization(format!(
            "Invalid boolean attribute value '{other}'"
        ))),
    }
}
