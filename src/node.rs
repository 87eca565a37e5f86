//! The scene graph node.
//!
//! A [Node] works standalone: its ID, attributes and references can all be edited before it is
//! added to a [crate::scene::Scene]. Standalone edits never emit events and leave every reference
//! [crate::reference::Resolution::Unresolved]. Once attached, route edits through the scene
//! (`Scene::set_reference_id`, `Scene::modify`) so resolution, observation and events stay
//! consistent.

use std::collections::BTreeMap;

use crate::{
    codec,
    event::EventSet,
    properties::{parse_flag, HierarchyProps, NodeHandle, NodeId, NodeKind},
    reference::{Reference, ReferenceChange, ReferenceTable, Resolution},
    role::{ReferenceRole, RoleFamily, RoleRegistry},
    DmmlError,
};

pub const ATTR_ID: &str = "id";
pub const ATTR_NAME: &str = "name";
pub const ATTR_SINGLETON_TAG: &str = "singletonTag";
pub const ATTR_HIDE_FROM_EDITORS: &str = "hideFromEditors";
pub const ATTR_SELECTABLE: &str = "selectable";
pub const ATTR_ATTRIBUTES: &str = "attributes";
pub const ATTR_REFERENCES: &str = "references";

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    id: NodeId,
    name: String,
    kind: NodeKind,
    attributes: BTreeMap<String, String>,
    singleton_tag: Option<String>,
    hide_from_editors: bool,
    selectable: bool,
    roles: RoleRegistry,
    references: ReferenceTable,
    handle: Option<NodeHandle>,
    mtime: u64,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Node {
            id: NodeId::default(),
            name: String::new(),
            roles: kind.default_roles(),
            kind,
            attributes: BTreeMap::new(),
            singleton_tag: None,
            hide_from_editors: false,
            selectable: true,
            references: ReferenceTable::default(),
            handle: None,
            mtime: 0,
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_id<I: Into<NodeId>>(mut self, id: I) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_singleton_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.singleton_tag = Some(tag.into());
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Assigns the ID. IDs are immutable while the node belongs to a scene.
    pub fn set_id<I: Into<NodeId>>(&mut self, id: I) -> Result<(), DmmlError> {
        if self.is_attached() {
            tracing::error!("Cannot change the ID of attached node {}", self.id);
            return Err(DmmlError::Custom(format!(
                "node {} is attached to a scene, its ID is immutable",
                self.id
            )));
        }
        let id = id.into();
        id.validate()
            .inspect_err(|e| tracing::error!("set_id on {}: {e}", self.id))?;
        self.id = id;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name<S: Into<String>>(&mut self, name: S) {
        let name = name.into();
        if self.name != name {
            self.name = name;
            self.modified();
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn class_name(&self) -> &'static str {
        self.kind.class_name()
    }

    pub fn tag_name(&self) -> &'static str {
        self.kind.tag_name()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Sets or, given None, removes a free-form attribute.
    pub fn set_attribute(&mut self, key: &str, value: Option<&str>) {
        let changed = match value {
            Some(value) => {
                self.attributes.insert(key.to_string(), value.to_string()).as_deref() != Some(value)
            }
            None => self.attributes.remove(key).is_some(),
        };
        if changed {
            self.modified();
        }
    }

    pub fn singleton_tag(&self) -> Option<&str> {
        self.singleton_tag.as_deref()
    }

    pub fn is_singleton(&self) -> bool {
        self.singleton_tag.is_some()
    }

    pub fn hide_from_editors(&self) -> bool {
        self.hide_from_editors
    }

    pub fn set_hide_from_editors(&mut self, hide: bool) {
        if self.hide_from_editors != hide {
            self.hide_from_editors = hide;
            self.modified();
        }
    }

    pub fn selectable(&self) -> bool {
        self.selectable
    }

    pub fn set_selectable(&mut self, selectable: bool) {
        if self.selectable != selectable {
            self.selectable = selectable;
            self.modified();
        }
    }

    pub fn hierarchy(&self) -> Option<&HierarchyProps> {
        self.kind.hierarchy()
    }

    fn hierarchy_props_mut(&mut self) -> Result<&mut HierarchyProps, DmmlError> {
        let id = self.id.clone();
        self.kind
            .hierarchy_mut()
            .ok_or(DmmlError::NotHierarchy(id.to_string()))
    }

    pub fn set_sorting_value(&mut self, value: f64) -> Result<(), DmmlError> {
        let props = self.hierarchy_props_mut()?;
        if props.sorting_value != Some(value) {
            props.sorting_value = Some(value);
            self.modified();
        }
        Ok(())
    }

    pub fn set_expanded(&mut self, expanded: bool) -> Result<(), DmmlError> {
        let props = self.hierarchy_props_mut()?;
        if props.expanded != expanded {
            props.expanded = expanded;
            self.modified();
        }
        Ok(())
    }

    pub fn set_allow_multiple_children(&mut self, allow: bool) -> Result<(), DmmlError> {
        let props = self.hierarchy_props_mut()?;
        if props.allow_multiple_children != allow {
            props.allow_multiple_children = allow;
            self.modified();
        }
        Ok(())
    }

    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    pub fn declare_reference_role(
        &mut self,
        role: ReferenceRole,
        attribute_name: Option<&str>,
        events: Option<EventSet>,
    ) -> Result<(), DmmlError> {
        if let Err(e) = role.validate() {
            tracing::error!("declare_reference_role on {}: {e}", self.id);
            return Err(e);
        }
        self.roles.declare(role, attribute_name, events);
        Ok(())
    }

    pub fn declare_reference_family(
        &mut self,
        family: RoleFamily,
        attribute_suffix: &str,
        events: Option<EventSet>,
    ) {
        self.roles.declare_family(family, attribute_suffix, events);
    }

    pub fn references(&self) -> &ReferenceTable {
        &self.references
    }

    pub(crate) fn references_mut(&mut self) -> &mut ReferenceTable {
        &mut self.references
    }

    pub fn handle(&self) -> Option<NodeHandle> {
        self.handle
    }

    pub fn is_attached(&self) -> bool {
        self.handle.is_some()
    }

    /// Modification counter, bumped by every change of the node's own state.
    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    pub fn modified(&mut self) {
        self.mtime += 1;
    }

    /// True when a parent reference targets the node's own ID.
    pub fn is_own_parent_referenced(&self) -> bool {
        !self.id.is_empty() && self.references.ids(&ReferenceRole::Parent).contains(&self.id)
    }

    fn is_own_parent(&self, role: &ReferenceRole, target: &NodeId) -> bool {
        *role == ReferenceRole::Parent && !self.id.is_empty() && *target == self.id
    }

    fn check_role(&self, role: &ReferenceRole) -> Result<(), DmmlError> {
        role.validate().inspect_err(|e| {
            tracing::error!("Reference operation on {}: {e}", self.id);
        })
    }

    /// Sets the slot `index` of `role` to `id`. See [ReferenceTable::set] for the slot semantics.
    /// Without explicit `events` the role's default event set is observed.
    pub fn set_reference_id(
        &mut self,
        role: &ReferenceRole,
        index: usize,
        id: Option<&str>,
        events: Option<EventSet>,
    ) -> Result<Option<ReferenceChange>, DmmlError> {
        self.check_role(role)?;
        let id = id.map(NodeId::from).filter(|id| !id.is_empty());
        if let Some(id) = &id {
            id.validate().inspect_err(|e| {
                tracing::error!("Reference operation on {}: {e}", self.id);
            })?;
            if self.is_own_parent(role, id) {
                tracing::error!("Refusing to make {id} its own parent");
                return Err(DmmlError::SelfParent(id.to_string()));
            }
        }
        let events = events.unwrap_or_else(|| self.roles.default_events(role));
        let change = self.references.set(role, index, id, events);
        if change.is_some() {
            self.modified();
        }
        Ok(change)
    }

    pub fn add_reference_id(
        &mut self,
        role: &ReferenceRole,
        id: &str,
        events: Option<EventSet>,
    ) -> Result<Option<ReferenceChange>, DmmlError> {
        let index = self.references.len(role);
        self.set_reference_id(role, index, Some(id), events)
    }

    /// Removes the slot `index` of `role`, shrinking the list.
    pub fn remove_nth_reference_id(
        &mut self,
        role: &ReferenceRole,
        index: usize,
    ) -> Result<Option<ReferenceChange>, DmmlError> {
        self.check_role(role)?;
        let Some(removed) = self.references.remove_nth(role, index) else {
            tracing::error!(
                "remove_nth_reference_id on {}: no slot {index} under '{role}'",
                self.id
            );
            return Err(DmmlError::InvalidIndex {
                role: role.to_string(),
                index,
            });
        };
        self.modified();
        Ok(removed.target().map(|old| ReferenceChange {
            role: role.clone(),
            index,
            old: Some(old.clone()),
            new: None,
        }))
    }

    /// Clears every reference under `role` (every role if None) and drops the emptied slots.
    pub fn remove_reference_ids(
        &mut self,
        role: Option<&ReferenceRole>,
    ) -> Result<Vec<ReferenceChange>, DmmlError> {
        let roles: Vec<ReferenceRole> = match role {
            Some(role) => {
                self.check_role(role)?;
                vec![role.clone()]
            }
            None => self.references.roles().cloned().collect(),
        };
        let mut changes = Vec::new();
        for cleared in roles {
            for index in 0..self.references.len(&cleared) {
                changes.extend(self.set_reference_id(&cleared, index, None, None)?);
            }
        }
        self.references.compact(role);
        Ok(changes)
    }

    /// Points every reference targeting `old` at `new` instead, keeping each entry's events. A
    /// parent slot that would end up pointing at the node itself is left alone.
    pub fn update_reference_id(&mut self, old: &str, new: &str) -> Vec<ReferenceChange> {
        let old = NodeId::from(old);
        let target = NodeId::from(new);
        let mut changes = Vec::new();
        for (role, index) in self.references.slots_targeting(&old) {
            if self.is_own_parent(&role, &target) {
                tracing::warn!("Not redirecting the parent of {} to itself", self.id);
                continue;
            }
            let events = self
                .references
                .get(&role, index)
                .map(Reference::events)
                .unwrap_or_default();
            changes.extend(self.references.set(&role, index, Some(target.clone()), events));
        }
        if !changes.is_empty() {
            self.modified();
        }
        changes
    }

    /// Maps every target through `f`. Returning None drops the reference, emptied slots are
    /// removed. So is a parent reference mapped onto the node itself.
    pub fn retarget_references<F>(&mut self, mut f: F) -> Vec<ReferenceChange>
    where
        F: FnMut(&NodeId) -> Option<NodeId>,
    {
        let slots: Vec<(ReferenceRole, usize, NodeId, EventSet)> = self
            .references
            .iter()
            .filter_map(|(index, r)| {
                r.target()
                    .map(|target| (r.role().clone(), index, target.clone(), r.events()))
            })
            .collect();
        let mut changes = Vec::new();
        for (role, index, target, events) in slots {
            let new = f(&target).filter(|new| {
                let own = self.is_own_parent(&role, new);
                if own {
                    tracing::warn!("Dropping parent reference of {} onto itself", self.id);
                }
                !own
            });
            if new.as_ref() != Some(&target) {
                changes.extend(self.references.set(&role, index, new, events));
            }
        }
        if !changes.is_empty() {
            self.references.compact(None);
            self.modified();
        }
        changes
    }

    pub fn reference_id(&self, role: &ReferenceRole, index: usize) -> Option<&NodeId> {
        self.references.get(role, index).and_then(Reference::target)
    }

    pub fn reference_ids(&self, role: &ReferenceRole) -> Vec<NodeId> {
        self.references.ids(role)
    }

    /// Non-empty references under `role`.
    pub fn reference_count(&self, role: &ReferenceRole) -> usize {
        self.references.count(role)
    }

    /// Non-empty references under every role.
    pub fn total_reference_count(&self) -> usize {
        self.references
            .roles()
            .map(|role| self.references.count(role))
            .sum()
    }

    pub fn has_reference_id(&self, id: &str) -> bool {
        self.references.references_target(&NodeId::from(id))
    }

    pub(crate) fn attach(&mut self, handle: NodeHandle) {
        self.handle = Some(handle);
    }

    /// Forgets the scene, every reference falls back to unresolved.
    pub(crate) fn detach(&mut self) {
        self.handle = None;
        for reference in self.references.iter_mut() {
            reference.set_resolution(Resolution::Unresolved);
        }
    }

    /// Copies everything but identity and attachment from `other`. Used to merge a singleton into
    /// the instance already registered in a scene. Returns false, leaving the node untouched, when
    /// `other` carries the same content.
    pub(crate) fn copy_content_from(&mut self, other: &Node) -> bool {
        let same = self.name == other.name
            && self.kind == other.kind
            && self.attributes == other.attributes
            && self.hide_from_editors == other.hide_from_editors
            && self.selectable == other.selectable
            && self.roles == other.roles
            && self.references.same_entries(&other.references);
        if same {
            return false;
        }
        self.name = other.name.clone();
        self.kind = other.kind.clone();
        self.attributes = other.attributes.clone();
        self.hide_from_editors = other.hide_from_editors;
        self.selectable = other.selectable;
        self.roles = other.roles.clone();
        self.references = other.references.clone();
        for reference in self.references.iter_mut() {
            reference.set_resolution(Resolution::Unresolved);
        }
        self.modified();
        true
    }

    /// Builds a node from its serialized attributes.
    ///
    /// The `references` attribute wins over legacy per-role attributes (`displayNodeRef`) naming
    /// the same role.
    pub fn from_attributes(
        mut kind: NodeKind,
        attributes: &BTreeMap<String, String>,
    ) -> Result<Node, DmmlError> {
        let mut legacy: Vec<(ReferenceRole, &str)> = Vec::new();
        let mut references: Vec<(ReferenceRole, Vec<NodeId>)> = Vec::new();
        let mut node_attributes = BTreeMap::new();
        let mut node = Node::new(kind.clone());

        for (key, value) in attributes.iter() {
            match key.as_str() {
                ATTR_ID => {
                    let id = NodeId::from(value.as_str());
                    id.validate()?;
                    node.id = id;
                }
                ATTR_NAME => node.name = value.clone(),
                ATTR_SINGLETON_TAG => node.singleton_tag = Some(value.clone()),
                ATTR_HIDE_FROM_EDITORS => node.hide_from_editors = parse_flag(value)?,
                ATTR_SELECTABLE => node.selectable = parse_flag(value)?,
                ATTR_ATTRIBUTES => node_attributes = codec::decode_attributes(value)?,
                ATTR_REFERENCES => references = codec::decode_references(value)?,
                other => {
                    if kind.read_attribute(other, value)? {
                        continue;
                    }
                    match node.roles.role_for_attribute(other) {
                        Some(role) => legacy.push((role, value.as_str())),
                        None => tracing::debug!(
                            "Ignoring unknown attribute '{other}' on {} node",
                            kind.tag_name()
                        ),
                    }
                }
            }
        }
        node.kind = kind;
        node.attributes = node_attributes;

        let explicit: Vec<ReferenceRole> = references.iter().map(|(r, _)| r.clone()).collect();
        for (role, value) in legacy {
            if explicit.contains(&role) {
                continue;
            }
            let ids = value.split_whitespace().map(NodeId::from).collect();
            references.push((role, ids));
        }
        for (role, ids) in references {
            if !node.roles.is_declared(&role) {
                node.roles.declare(role.clone(), None, None);
            }
            for id in ids {
                if node.is_own_parent(&role, &id) {
                    tracing::warn!("Dropping self-parent reference of {}", node.id);
                    continue;
                }
                node.add_reference_id(&role, id.as_str(), None)?;
            }
        }
        node.mtime = 0;
        Ok(node)
    }

    /// Serialized attributes, the inverse of [Node::from_attributes].
    pub fn write_attributes(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        out.insert(ATTR_ID.to_string(), self.id.to_string());
        out.insert(ATTR_NAME.to_string(), self.name.clone());
        if let Some(tag) = &self.singleton_tag {
            out.insert(ATTR_SINGLETON_TAG.to_string(), tag.clone());
        }
        out.insert(
            ATTR_HIDE_FROM_EDITORS.to_string(),
            self.hide_from_editors.to_string(),
        );
        out.insert(ATTR_SELECTABLE.to_string(), self.selectable.to_string());
        if !self.attributes.is_empty() {
            out.insert(
                ATTR_ATTRIBUTES.to_string(),
                codec::encode_attributes(&self.attributes),
            );
        }
        let references = codec::encode_references(&self.references);
        if !references.is_empty() {
            out.insert(ATTR_REFERENCES.to_string(), references);
        }
        self.kind.write_attributes(&mut out);
        out
    }
}

/// Nodes that can be shown through display nodes.
pub trait Displayable {
    fn display_node_id(&self, index: usize) -> Option<&NodeId>;
    fn display_node_ids(&self) -> Vec<NodeId>;
    fn number_of_display_nodes(&self) -> usize;
}

/// Nodes whose content a storage node reads and writes.
pub trait Storable {
    fn storage_node_id(&self) -> Option<&NodeId>;
    fn default_storage_kind(&self) -> Option<NodeKind>;
}

/// Nodes that take part in the hierarchy index.
pub trait Hierarchical {
    fn parent_node_id(&self) -> Option<&NodeId>;
    fn associated_node_id(&self) -> Option<&NodeId>;
    fn sorting_value(&self) -> Option<f64>;
}

impl Displayable for Node {
    fn display_node_id(&self, index: usize) -> Option<&NodeId> {
        if !self.kind.is_displayable() {
            return None;
        }
        self.reference_id(&ReferenceRole::Display, index)
    }

    fn display_node_ids(&self) -> Vec<NodeId> {
        if !self.kind.is_displayable() {
            return Vec::new();
        }
        self.reference_ids(&ReferenceRole::Display)
    }

    fn number_of_display_nodes(&self) -> usize {
        self.display_node_ids().len()
    }
}

impl Storable for Node {
    fn storage_node_id(&self) -> Option<&NodeId> {
        if !self.kind.is_storable() {
            return None;
        }
        self.reference_id(&ReferenceRole::Storage, 0)
    }

    fn default_storage_kind(&self) -> Option<NodeKind> {
        self.kind.default_storage_kind()
    }
}

impl Hierarchical for Node {
    fn parent_node_id(&self) -> Option<&NodeId> {
        if !self.kind.is_hierarchy() {
            return None;
        }
        self.reference_id(&ReferenceRole::Parent, 0)
    }

    fn associated_node_id(&self) -> Option<&NodeId> {
        if !self.kind.is_hierarchy() {
            return None;
        }
        self.reference_id(&ReferenceRole::Associated, 0)
    }

    fn sorting_value(&self) -> Option<f64> {
        self.kind.hierarchy().and_then(|props| props.sorting_value)
    }
}
