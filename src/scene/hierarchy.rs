//! Hierarchy index.
//!
//! Hierarchy nodes arrange arbitrary nodes into a tree through their `parent` and `associated`
//! reference roles. Sibling order is defined by each hierarchy node's sorting value alone.
//!
//! The parent -> children and associated -> hierarchy maps are derived data cached inside the
//! [Scene]. Any parent or associated link change resets the cache timestamp to zero. The next
//! query rebuilds both maps with one scan whenever the scene's node-collection timestamp is
//! newer than the cache.

use std::collections::{BTreeMap, BTreeSet};

use super::Scene;
use crate::{
    node::{Hierarchical, Node},
    properties::NodeId,
    role::ReferenceRole,
    DmmlError,
};

#[derive(Debug, Default)]
pub struct HierarchyCache {
    /// Children in scene insertion order, sorted at query time.
    pub(super) children_by_parent: BTreeMap<NodeId, Vec<NodeId>>,
    pub(super) hierarchy_by_associated: BTreeMap<NodeId, NodeId>,
    pub(super) last_rebuilt: u64,
}

/// Parent -> children lookups over the hierarchy nodes of a scene.
pub trait ChildrenIndex {
    /// Direct children of `parent`, ordered by sorting value. Ties keep arrival order.
    fn children_ids(&self, parent: &str) -> Vec<NodeId>;
    /// The first hierarchy node, in scene order, associated with `associated`.
    fn hierarchy_for_associated(&self, associated: &str) -> Option<NodeId>;
}

/// Sorting value for a node placed between `prev` and `next`.
pub fn sorting_value_between(prev: Option<f64>, next: Option<f64>) -> f64 {
    match (prev, next) {
        (None, None) => 1.0,
        (None, Some(next)) => next - 1.0,
        (Some(prev), None) => prev + 1.0,
        (Some(prev), Some(next)) => prev + (next - prev) / 2.0,
    }
}

impl ChildrenIndex for Scene {
    fn children_ids(&self, parent: &str) -> Vec<NodeId> {
        self.ensure_hierarchy_index();
        let mut children = self
            .hierarchy
            .read()
            .children_by_parent
            .get(parent)
            .cloned()
            .unwrap_or_default();
        children.sort_by(|a, b| self.sorting_value_of(a).total_cmp(&self.sorting_value_of(b)));
        children
    }

    fn hierarchy_for_associated(&self, associated: &str) -> Option<NodeId> {
        self.ensure_hierarchy_index();
        self.hierarchy
            .read()
            .hierarchy_by_associated
            .get(associated)
            .cloned()
    }
}

impl Scene {
    fn ensure_hierarchy_index(&self) {
        if self.hierarchy.read().last_rebuilt >= self.nodes_mtime() {
            return;
        }
        let mut cache = self.hierarchy.write();
        if cache.last_rebuilt >= self.nodes_mtime() {
            return;
        }
        cache.children_by_parent.clear();
        cache.hierarchy_by_associated.clear();
        for node in self.nodes().filter(|n| n.kind().is_hierarchy()) {
            if let Some(parent) = node.parent_node_id() {
                if parent != node.id() && self.nodes.contains_key(parent) {
                    cache
                        .children_by_parent
                        .entry(parent.clone())
                        .or_default()
                        .push(node.id().clone());
                }
            }
            if let Some(associated) = node.associated_node_id() {
                cache
                    .hierarchy_by_associated
                    .entry(associated.clone())
                    .or_insert_with(|| node.id().clone());
            }
        }
        cache.last_rebuilt = self.nodes_mtime();
        tracing::trace!(
            "Rebuilt hierarchy index of scene {:?}: {} parents",
            self.id(),
            cache.children_by_parent.len()
        );
    }

    fn sorting_value_of(&self, id: &NodeId) -> f64 {
        self.nodes
            .get(id)
            .and_then(Hierarchical::sorting_value)
            .unwrap_or_default()
    }

    fn hierarchy_node(&self, id: &str) -> Result<&Node, DmmlError> {
        let Some(node) = self.nodes.get(id) else {
            tracing::debug!("Hierarchy node {id} is not in the scene");
            return Err(DmmlError::NotFound(format!("node {id}")));
        };
        if !node.kind().is_hierarchy() {
            tracing::error!("{id} is a {} node, not a hierarchy node", node.tag_name());
            return Err(DmmlError::NotHierarchy(id.to_string()));
        }
        Ok(node)
    }

    /// Sets or, given None, clears the parent of hierarchy node `id`.
    pub fn set_parent_node_id(&mut self, id: &str, parent: Option<&str>) -> Result<(), DmmlError> {
        self.hierarchy_node(id)?;
        if parent == Some(id) {
            tracing::error!("Refusing to make {id} its own parent");
            return Err(DmmlError::SelfParent(id.to_string()));
        }
        self.set_and_observe_reference_id(id, &ReferenceRole::Parent, parent, None)?;
        Ok(())
    }

    pub fn parent_node(&self, id: &str) -> Option<&Node> {
        self.reference(id, &ReferenceRole::Parent, 0)
            .filter(|parent| parent.kind().is_hierarchy())
    }

    /// The root of the tree `id` belongs to, `id` itself when it has no parent.
    pub fn top_parent_node(&self, id: &str) -> Option<&Node> {
        let mut current = self.hierarchy_node(id).ok()?;
        let mut visited = BTreeSet::new();
        visited.insert(current.id().clone());
        while let Some(parent) = self.parent_node(current.id().as_str()) {
            if !visited.insert(parent.id().clone()) {
                tracing::warn!("Hierarchy cycle through {}", parent.id());
                break;
            }
            current = parent;
        }
        Some(current)
    }

    pub fn children_nodes(&self, id: &str) -> Vec<&Node> {
        self.children_ids(id)
            .iter()
            .filter_map(|child| self.nodes.get(child))
            .collect()
    }

    /// Every descendant of `id`, depth first, parents before their children. `id` itself is not
    /// included.
    pub fn all_children_nodes(&self, id: &str) -> Vec<&Node> {
        let mut out = Vec::new();
        let mut visited = BTreeSet::new();
        visited.insert(NodeId::from(id));
        self.collect_children(id, &mut visited, &mut out);
        out
    }

    fn collect_children<'a>(
        &'a self,
        id: &str,
        visited: &mut BTreeSet<NodeId>,
        out: &mut Vec<&'a Node>,
    ) {
        for child in self.children_ids(id) {
            if !visited.insert(child.clone()) {
                continue;
            }
            if let Some(node) = self.nodes.get(&child) {
                out.push(node);
                self.collect_children(child.as_str(), visited, out);
            }
        }
    }

    pub fn index_in_parent(&self, id: &str) -> Option<usize> {
        let parent = self.parent_node(id)?;
        self.children_ids(parent.id().as_str())
            .iter()
            .position(|child| child == id)
    }

    fn set_sorting_value(&mut self, id: &str, value: f64) -> Result<(), DmmlError> {
        let mut result = Ok(());
        self.modify(id, |node| result = node.set_sorting_value(value))?;
        result
    }

    /// Moves `id` to position `index` among its siblings by giving it a sorting value between
    /// its new neighbours. Siblings are renumbered `1..=n` once the gap gets too narrow.
    pub fn set_index_in_parent(&mut self, id: &str, index: usize) -> Result<(), DmmlError> {
        self.hierarchy_node(id)?;
        let Some(parent) = self.parent_node(id).map(|p| p.id().clone()) else {
            tracing::debug!("set_index_in_parent: {id} has no parent");
            return Ok(());
        };
        let siblings: Vec<NodeId> = self
            .children_ids(parent.as_str())
            .into_iter()
            .filter(|sibling| sibling != id)
            .collect();
        let index = index.min(siblings.len());

        let value_at = |scene: &Scene, i: usize| siblings.get(i).map(|s| scene.sorting_value_of(s));
        let prev = index.checked_sub(1).and_then(|i| value_at(self, i));
        let next = value_at(self, index);
        let mut value = sorting_value_between(prev, next);

        if let (Some(prev), Some(next)) = (prev, next) {
            if next - prev < self.config.min_sorting_gap || value <= prev || value >= next {
                tracing::debug!("Renumbering the {} children of {parent}", siblings.len() + 1);
                for (i, sibling) in siblings.iter().enumerate() {
                    self.set_sorting_value(sibling.as_str(), (i + 1) as f64)?;
                }
                value = sorting_value_between(Some(index as f64), Some((index + 1) as f64));
            }
        }
        self.set_sorting_value(id, value)
    }

    /// Moves `id` by `increment` positions, one swap with the adjacent sibling per step.
    pub fn move_in_parent(&mut self, id: &str, increment: i32) -> Result<(), DmmlError> {
        self.hierarchy_node(id)?;
        let Some(parent) = self.parent_node(id).map(|p| p.id().clone()) else {
            tracing::debug!("move_in_parent: {id} has no parent");
            return Ok(());
        };
        for _ in 0..increment.unsigned_abs() {
            let siblings = self.children_ids(parent.as_str());
            let Some(position) = siblings.iter().position(|s| s == id) else {
                break;
            };
            let target = if increment > 0 {
                position + 1
            } else if let Some(target) = position.checked_sub(1) {
                target
            } else {
                break;
            };
            let Some(neighbour) = siblings.get(target).cloned() else {
                break;
            };
            let own_value = self.sorting_value_of(&NodeId::from(id));
            let neighbour_value = self.sorting_value_of(&neighbour);
            if own_value == neighbour_value {
                self.set_index_in_parent(id, target)?;
            } else {
                self.set_sorting_value(id, neighbour_value)?;
                self.set_sorting_value(neighbour.as_str(), own_value)?;
            }
        }
        Ok(())
    }

    /// Removes the direct children of `id`. Their own children are re-parented to `id`.
    pub fn remove_hierarchy_children_nodes(&mut self, id: &str) -> Result<Vec<Node>, DmmlError> {
        self.hierarchy_node(id)?;
        let mut removed = Vec::new();
        for child in self.children_ids(id) {
            for grandchild in self.children_ids(child.as_str()) {
                self.set_parent_node_id(grandchild.as_str(), Some(id))?;
            }
            removed.push(self.remove_node(child.as_str())?);
        }
        Ok(removed)
    }

    /// Removes the whole subtree below `id`, deepest nodes first.
    pub fn remove_all_hierarchy_children_nodes(
        &mut self,
        id: &str,
    ) -> Result<Vec<Node>, DmmlError> {
        self.hierarchy_node(id)?;
        let subtree: Vec<NodeId> = self
            .all_children_nodes(id)
            .iter()
            .map(|node| node.id().clone())
            .collect();
        let mut removed = Vec::with_capacity(subtree.len());
        for child in subtree.iter().rev() {
            removed.push(self.remove_node(child.as_str())?);
        }
        Ok(removed)
    }

    /// The hierarchy node organizing `associated`, if any.
    pub fn associated_hierarchy_node(&self, associated: &str) -> Option<&Node> {
        self.hierarchy_for_associated(associated)
            .and_then(|id| self.nodes.get(&id))
    }

    pub fn set_associated_node_id(
        &mut self,
        id: &str,
        associated: Option<&str>,
    ) -> Result<(), DmmlError> {
        self.hierarchy_node(id)?;
        self.set_and_observe_reference_id(id, &ReferenceRole::Associated, associated, None)?;
        Ok(())
    }

    /// Associated nodes of every descendant of `id`, in descendant order.
    pub fn associated_children_nodes(&self, id: &str) -> Vec<&Node> {
        self.all_children_nodes(id)
            .into_iter()
            .filter_map(|child| self.reference(child.id().as_str(), &ReferenceRole::Associated, 0))
            .collect()
    }
}
