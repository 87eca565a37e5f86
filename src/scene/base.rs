use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::mpsc::Sender,
};

use super::{graph::ReferenceGraph, hierarchy::HierarchyCache};
use crate::{
    config::{DanglingReferencePolicy, SceneConfig},
    event::{EventKind, EventSet, NodeEvent},
    node::{Node, Storable},
    properties::{NodeHandle, NodeId, SceneId},
    reference::{ReferenceChange, Resolution},
    role::ReferenceRole,
    DmmlError,
};

/// The scene directory.
///
/// Owns every attached [Node] by ID, brokers reference resolution, tracks which IDs are
/// referenced and by whom, and relays node events to the nodes observing them.
///
/// Events are queued and drained in order by the outermost emitting call. A forwarded event is
/// relayed on to the nodes observing its receiver, so changes travel along reference chains. Each
/// (receiver, kind, source) triple is delivered at most once per drain, which bounds relaying
/// around reference cycles.
#[derive(Debug)]
pub struct Scene {
    id: SceneId,
    pub(super) config: SceneConfig,
    pub(super) nodes: BTreeMap<NodeId, Node>,
    pub(super) order: Vec<NodeId>,
    /// referenced ID -> referencing node IDs
    referenced_ids: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// target -> observer -> consolidated observed events
    observers: BTreeMap<NodeId, BTreeMap<NodeId, EventSet>>,
    /// observer -> targets
    observing: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// (class name, singleton tag) -> ID
    singletons: BTreeMap<(String, String), NodeId>,
    /// Every ID ever issued to a singleton. Survives removal of the singleton.
    singleton_ids: BTreeSet<NodeId>,
    id_counters: BTreeMap<String, u64>,
    next_serial: u64,
    mtime: u64,
    nodes_mtime: u64,
    pub(super) max_sorting_value: f64,
    pub(super) hierarchy: RwLock<HierarchyCache>,
    queue: VecDeque<NodeEvent>,
    dispatching: bool,
    events: VecDeque<NodeEvent>,
    sender: Option<Sender<NodeEvent>>,
}

impl Default for Scene {
    fn default() -> Self {
        Scene::new(SceneConfig::default())
    }
}

impl Scene {
    pub fn new(config: SceneConfig) -> Self {
        Scene {
            id: SceneId::next(),
            config,
            nodes: BTreeMap::new(),
            order: Vec::new(),
            referenced_ids: BTreeMap::new(),
            observers: BTreeMap::new(),
            observing: BTreeMap::new(),
            singletons: BTreeMap::new(),
            singleton_ids: BTreeSet::new(),
            id_counters: BTreeMap::new(),
            next_serial: 0,
            mtime: 0,
            nodes_mtime: 0,
            max_sorting_value: 0.0,
            hierarchy: RwLock::new(HierarchyCache::default()),
            queue: VecDeque::new(),
            dispatching: false,
            events: VecDeque::new(),
            sender: None,
        }
    }

    pub fn id(&self) -> SceneId {
        self.id
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SceneConfig) {
        self.config = config;
    }

    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    /// Advances whenever a node is added or removed.
    pub fn nodes_mtime(&self) -> u64 {
        self.nodes_mtime
    }

    fn touch(&mut self) {
        self.mtime += 1;
    }

    fn touch_nodes(&mut self) {
        self.touch();
        self.nodes_mtime = self.mtime;
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Attached nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn number_of_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes_by_class(&self, class_name: &str) -> Vec<&Node> {
        self.nodes()
            .filter(|node| node.class_name() == class_name)
            .collect()
    }

    pub fn nodes_by_name(&self, name: &str) -> Vec<&Node> {
        self.nodes().filter(|node| node.name() == name).collect()
    }

    pub fn singleton_node(&self, tag: &str, class_name: &str) -> Option<&Node> {
        self.singletons
            .get(&(class_name.to_string(), tag.to_string()))
            .and_then(|id| self.nodes.get(id))
    }

    pub(super) fn singleton_id(&self, class_name: &str, tag: &str) -> Option<&NodeId> {
        self.singletons
            .get(&(class_name.to_string(), tag.to_string()))
    }

    /// True for IDs issued to singletons of this scene, present or not.
    pub fn is_singleton_id(&self, id: &str) -> bool {
        self.singleton_ids.contains(id)
    }

    pub(super) fn existing_id(&self, id: &str) -> Result<NodeId, DmmlError> {
        if self.nodes.contains_key(id) {
            Ok(NodeId::from(id))
        } else {
            tracing::debug!("Node {id} is not in scene {:?}", self.id);
            Err(DmmlError::NotFound(format!("node {id}")))
        }
    }

    /// `{class_name}{n}` for the smallest per-class counter value not yet taken.
    pub fn generate_unique_id(&mut self, class_name: &str) -> NodeId {
        self.unique_id_avoiding(class_name, &BTreeSet::new())
    }

    pub(super) fn unique_id_avoiding(
        &mut self,
        class_name: &str,
        claimed: &BTreeSet<NodeId>,
    ) -> NodeId {
        loop {
            let counter = self.id_counters.entry(class_name.to_string()).or_default();
            *counter += 1;
            let candidate = NodeId::from(format!("{class_name}{counter}"));
            if !self.nodes.contains_key(&candidate)
                && !claimed.contains(&candidate)
                && !self.singleton_ids.contains(&candidate)
            {
                return candidate;
            }
        }
    }

    /// Attaches `node` and returns its ID.
    ///
    /// An empty or already taken ID is replaced by a generated one. A singleton whose (class, tag)
    /// is already registered is merged into the registered node, whose ID is returned.
    pub fn add_node(&mut self, mut node: Node) -> Result<NodeId, DmmlError> {
        if node.is_attached() {
            tracing::error!("Node {} already belongs to a scene", node.id());
            return Err(DmmlError::Custom(format!(
                "node {} already belongs to a scene",
                node.id()
            )));
        }

        let singleton_key = node
            .singleton_tag()
            .map(|tag| (node.class_name().to_string(), tag.to_string()));
        if let Some(key) = &singleton_key {
            if let Some(existing) = self.singletons.get(key).cloned() {
                tracing::debug!("Merging singleton {} into {existing}", key.1);
                self.merge_into(&existing, &node)?;
                return Ok(existing);
            }
            if node.id().is_empty() {
                node.set_id(format!("{}{}", key.0, key.1))?;
            }
        }
        if node.id().is_empty() || self.nodes.contains_key(node.id()) {
            let id = self.generate_unique_id(node.class_name());
            if !node.id().is_empty() {
                tracing::debug!("ID {} is taken, assigning {id}", node.id());
            }
            node.set_id(id)?;
        }
        node.id().validate().inspect_err(|e| tracing::error!("add_node: {e}"))?;
        if node.is_own_parent_referenced() {
            tracing::error!("Node {} names itself as its parent", node.id());
            return Err(DmmlError::SelfParent(node.id().to_string()));
        }

        if let Some(props) = node.hierarchy() {
            match props.sorting_value {
                Some(value) => self.max_sorting_value = self.max_sorting_value.max(value),
                None => {
                    self.max_sorting_value += 1.0;
                    node.set_sorting_value(self.max_sorting_value)?;
                }
            }
        }

        let id = node.id().clone();
        self.next_serial += 1;
        node.attach(NodeHandle {
            scene: self.id,
            serial: self.next_serial,
        });
        let targets: Vec<NodeId> = node
            .references()
            .iter()
            .filter_map(|(_, r)| r.target().cloned())
            .collect();
        self.nodes.insert(id.clone(), node);
        self.order.push(id.clone());
        if let Some(key) = singleton_key {
            self.singletons.insert(key, id.clone());
            self.singleton_ids.insert(id.clone());
        }
        for target in targets {
            self.register_reference(&target, &id);
        }
        self.touch_nodes();
        tracing::debug!("Added node {id}");

        self.emit(NodeEvent::NodeAdded(id.clone()));
        self.refresh_referencer(&id);
        for referencer in self.referencing_nodes(id.as_str()) {
            if referencer != id {
                self.refresh_referencer(&referencer);
            }
        }
        Ok(id)
    }

    fn merge_into(&mut self, existing: &NodeId, source: &Node) -> Result<(), DmmlError> {
        let before = self.resolved_targets(existing);
        let target = self
            .nodes
            .get_mut(existing)
            .ok_or_else(|| DmmlError::NotFound(format!("node {existing}")))?;
        let old_references = target.references().clone();
        if !target.copy_content_from(source) {
            tracing::debug!("Singleton {existing} already holds the merged content");
            return Ok(());
        }
        let changes = old_references.diff(target.references());
        if changes.is_empty() {
            self.resolve_node_references(existing);
            self.refresh_observations(existing);
            self.touch();
            self.emit(NodeEvent::Modified(existing.clone()));
        } else {
            self.after_reference_changes(existing, &before, &changes);
        }
        Ok(())
    }

    /// Detaches the node and hands it back.
    ///
    /// References pointing at it are invalidated. Under [DanglingReferencePolicy::KeepId] they keep
    /// the ID and resolve again when a node with that ID is added.
    pub fn remove_node(&mut self, id: &str) -> Result<Node, DmmlError> {
        let id = self.existing_id(id)?;
        self.emit(NodeEvent::NodeAboutToBeRemoved(id.clone()));

        let referencers: Vec<NodeId> = self
            .referencing_nodes(id.as_str())
            .into_iter()
            .filter(|referencer| *referencer != id)
            .collect();
        if self.config.dangling_references == DanglingReferencePolicy::ClearId {
            for referencer in referencers.iter() {
                self.mutate_references(referencer, |node| {
                    Ok(node.retarget_references(|t| (*t != id).then(|| t.clone())))
                })?;
            }
        }

        let Some(mut node) = self.nodes.remove(&id) else {
            return Err(DmmlError::NotFound(format!("node {id}")));
        };
        self.order.retain(|other| *other != id);
        for (_, reference) in node.references().iter() {
            if let Some(target) = reference.target() {
                self.unregister_reference(target, &id);
            }
        }
        self.singletons.retain(|_, singleton| *singleton != id);
        self.drop_observations(&id);
        node.detach();
        self.touch_nodes();
        if node.kind().is_hierarchy() {
            self.invalidate_hierarchy();
        }
        tracing::debug!("Removed node {id}");

        for referencer in referencers.iter() {
            self.refresh_referencer(referencer);
        }
        self.emit(NodeEvent::NodeRemoved(id));
        Ok(node)
    }

    /// Removes every node, singletons only if `remove_singletons`.
    pub fn clear(&mut self, remove_singletons: bool) {
        let ids: Vec<NodeId> = self
            .order
            .iter()
            .rev()
            .filter(|id| {
                remove_singletons || !self.nodes.get(*id).is_some_and(Node::is_singleton)
            })
            .cloned()
            .collect();
        for id in ids {
            if let Err(e) = self.remove_node(id.as_str()) {
                tracing::warn!("Could not remove {id} while clearing the scene: {e}");
            }
        }
        if remove_singletons {
            self.singleton_ids.clear();
            self.id_counters.clear();
            self.max_sorting_value = 0.0;
        }
        self.invalidate_hierarchy();
    }

    /// Applies `f` to the node, then reconciles references and emits `Modified` if anything
    /// changed. Returns whether the node changed.
    pub fn modify<F>(&mut self, id: &str, f: F) -> Result<bool, DmmlError>
    where
        F: FnOnce(&mut Node),
    {
        let id = self.existing_id(id)?;
        let before = self.resolved_targets(&id);
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| DmmlError::NotFound(format!("node {id}")))?;
        let old_references = node.references().clone();
        let old_mtime = node.mtime();
        f(node);
        let changes = old_references.diff(node.references());
        let changed = node.mtime() != old_mtime || !changes.is_empty();
        let sorting_value = node.hierarchy().and_then(|props| props.sorting_value);
        let is_hierarchy = node.kind().is_hierarchy();

        if let Some(value) = sorting_value {
            self.max_sorting_value = self.max_sorting_value.max(value);
        }
        if !changes.is_empty() {
            self.after_reference_changes(&id, &before, &changes);
        } else {
            self.refresh_observations(&id);
            if changed {
                self.touch();
                self.emit(NodeEvent::Modified(id.clone()));
            }
        }
        if changed && is_hierarchy {
            self.invalidate_hierarchy();
        }
        Ok(changed)
    }

    /// Marks the node modified and relays `Modified` to its observers.
    pub fn modified(&mut self, id: &str) -> Result<(), DmmlError> {
        let id = self.existing_id(id)?;
        if let Some(node) = self.nodes.get_mut(&id) {
            node.modified();
        }
        self.touch();
        self.emit(NodeEvent::Modified(id));
        Ok(())
    }

    /// Sets slot `index` of `role` on `node` and returns the resolved target's ID.
    ///
    /// None or an empty `id` clears the slot in place. Fires `ReferenceAdded`,
    /// `ReferenceModified` or `ReferenceRemoved` according to what the slot resolved to before and
    /// after, the role's derived event, and one `Modified` when the ID changed.
    pub fn set_reference_id(
        &mut self,
        node: &str,
        role: &ReferenceRole,
        index: usize,
        id: Option<&str>,
        events: Option<EventSet>,
    ) -> Result<Option<NodeId>, DmmlError> {
        let node_id = self.existing_id(node)?;
        let changes = self.mutate_references(&node_id, |n| {
            Ok(n.set_reference_id(role, index, id, events)?
                .into_iter()
                .collect())
        })?;
        let slot = changes.first().map(|c| c.index).unwrap_or(index);
        Ok(self.reference(node, role, slot).map(|n| n.id().clone()))
    }

    /// Slot 0 of `role`, observing the role's default events unless `events` is given.
    pub fn set_and_observe_reference_id(
        &mut self,
        node: &str,
        role: &ReferenceRole,
        id: Option<&str>,
        events: Option<EventSet>,
    ) -> Result<Option<NodeId>, DmmlError> {
        self.set_reference_id(node, role, 0, id, events)
    }

    pub fn add_reference_id(
        &mut self,
        node: &str,
        role: &ReferenceRole,
        id: &str,
        events: Option<EventSet>,
    ) -> Result<Option<NodeId>, DmmlError> {
        let node_id = self.existing_id(node)?;
        let changes = self.mutate_references(&node_id, |n| {
            Ok(n.add_reference_id(role, id, events)?.into_iter().collect())
        })?;
        Ok(changes
            .first()
            .and_then(|c| self.reference(node, role, c.index))
            .map(|n| n.id().clone()))
    }

    pub fn remove_nth_reference_id(
        &mut self,
        node: &str,
        role: &ReferenceRole,
        index: usize,
    ) -> Result<(), DmmlError> {
        let node_id = self.existing_id(node)?;
        self.mutate_references(&node_id, |n| {
            Ok(n.remove_nth_reference_id(role, index)?.into_iter().collect())
        })?;
        Ok(())
    }

    /// Clears every reference under `role`, or under every role when None.
    pub fn remove_reference_ids(
        &mut self,
        node: &str,
        role: Option<&ReferenceRole>,
    ) -> Result<(), DmmlError> {
        let node_id = self.existing_id(node)?;
        self.mutate_references(&node_id, |n| n.remove_reference_ids(role))?;
        Ok(())
    }

    pub fn update_reference_id(&mut self, node: &str, old: &str, new: &str) -> Result<(), DmmlError> {
        let node_id = self.existing_id(node)?;
        NodeId::from(new)
            .validate()
            .inspect_err(|e| tracing::error!("update_reference_id on {node_id}: {e}"))?;
        self.mutate_references(&node_id, |n| Ok(n.update_reference_id(old, new)))?;
        Ok(())
    }

    /// Drops references whose target is not in the scene. Singleton IDs are kept. Returns the
    /// number of dropped references.
    pub fn update_references(&mut self, node: &str) -> Result<usize, DmmlError> {
        let node_id = self.existing_id(node)?;
        let dangling: BTreeSet<NodeId> = self
            .nodes
            .get(&node_id)
            .map(|n| {
                n.references()
                    .iter()
                    .filter_map(|(_, r)| r.target())
                    .filter(|t| !self.nodes.contains_key(*t) && !self.singleton_ids.contains(*t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if dangling.is_empty() {
            return Ok(0);
        }
        tracing::debug!("Dropping references of {node_id} to {dangling:?}");
        let changes = self.mutate_references(&node_id, |n| {
            Ok(n.retarget_references(|t| (!dangling.contains(t)).then(|| t.clone())))
        })?;
        Ok(changes.len())
    }

    /// The node slot `index` of `role` points at, if a node with that ID is in this scene.
    ///
    /// The lookup goes by ID. The cached [Resolution] of the slot only decides whether the node
    /// is observed, and every scene operation that adds or removes its target refreshes it.
    pub fn reference(&self, node: &str, role: &ReferenceRole, index: usize) -> Option<&Node> {
        let target = self.nodes.get(node)?.reference_id(role, index)?;
        self.nodes.get(target)
    }

    pub fn reference_id(&self, node: &str, role: &ReferenceRole, index: usize) -> Option<NodeId> {
        self.nodes.get(node)?.reference_id(role, index).cloned()
    }

    pub fn reference_ids(&self, node: &str, role: &ReferenceRole) -> Vec<NodeId> {
        self.nodes
            .get(node)
            .map(|n| n.reference_ids(role))
            .unwrap_or_default()
    }

    pub fn reference_count(&self, node: &str, role: &ReferenceRole) -> usize {
        self.nodes
            .get(node)
            .map(|n| n.reference_count(role))
            .unwrap_or_default()
    }

    /// Records that `referencing` points at `id`. Idempotent per pair.
    pub fn add_referenced_node_id(&mut self, id: &str, referencing: &str) {
        if id.is_empty() {
            return;
        }
        self.referenced_ids
            .entry(NodeId::from(id))
            .or_default()
            .insert(NodeId::from(referencing));
    }

    /// Forgets one (id, referencing) pair. The ID stops being tracked with its last referencer.
    pub fn remove_referenced_node_id(&mut self, id: &str, referencing: &str) {
        if let Some(referencers) = self.referenced_ids.get_mut(id) {
            referencers.remove(referencing);
            if referencers.is_empty() {
                self.referenced_ids.remove(id);
            }
        }
    }

    pub fn is_node_referenced(&self, id: &str) -> bool {
        self.referenced_ids.contains_key(id)
    }

    pub fn referencing_nodes(&self, id: &str) -> Vec<NodeId> {
        self.referenced_ids
            .get(id)
            .map(|referencers| referencers.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn register_reference(&mut self, target: &NodeId, referencing: &NodeId) {
        self.add_referenced_node_id(target.as_str(), referencing.as_str());
    }

    fn unregister_reference(&mut self, target: &NodeId, referencing: &NodeId) {
        self.remove_referenced_node_id(target.as_str(), referencing.as_str());
    }

    /// `id` first, then every node reachable through resolvable references, depth first.
    pub fn referenced_nodes(&self, id: &str) -> Vec<NodeId> {
        ReferenceGraph::from_scene(self).reachable_from(&NodeId::from(id))
    }

    /// Adds the default storage node for the node's kind and references it through the storage
    /// role. Returns the storage node's ID, None if the kind is not storable.
    pub fn create_default_storage_node(&mut self, id: &str) -> Result<Option<NodeId>, DmmlError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| DmmlError::NotFound(format!("node {id}")))?;
        if let Some(existing) = node.storage_node_id() {
            return Ok(Some(existing.clone()));
        }
        let Some(kind) = node.default_storage_kind() else {
            return Ok(None);
        };
        let storage = self.add_node(Node::new(kind))?;
        self.set_and_observe_reference_id(id, &ReferenceRole::Storage, Some(storage.as_str()), None)?;
        Ok(Some(storage))
    }

    /// Drains the retained event log.
    pub fn take_events(&mut self) -> Vec<NodeEvent> {
        self.events.drain(..).collect()
    }

    /// Every delivered event is also sent to `sender` until its receiver hangs up.
    pub fn set_event_sender(&mut self, sender: Sender<NodeEvent>) {
        self.sender = Some(sender);
    }

    pub(super) fn invalidate_hierarchy(&self) {
        self.hierarchy.write().last_rebuilt = 0;
    }

    pub(super) fn emit(&mut self, event: NodeEvent) {
        self.queue.push_back(event);
        if self.dispatching {
            return;
        }
        self.dispatching = true;
        let mut forwarded: BTreeSet<(NodeId, EventKind, NodeId)> = BTreeSet::new();
        while let Some(event) = self.queue.pop_front() {
            if let NodeEvent::Forwarded(receiver, kind, source) = &event {
                if !forwarded.insert((receiver.clone(), *kind, source.clone())) {
                    tracing::trace!("{event} already delivered in this dispatch");
                    continue;
                }
            }
            let relayed = self.relay(&event);
            self.deliver(event);
            self.queue.extend(relayed);
        }
        self.dispatching = false;
    }

    fn deliver(&mut self, event: NodeEvent) {
        tracing::trace!("{event}");
        if let Some(sender) = &self.sender {
            if sender.send(event.clone()).is_err() {
                tracing::debug!("Event receiver of scene {:?} hung up", self.id);
                self.sender = None;
            }
        }
        self.events.push_back(event);
        if let Some(limit) = self.config.event_log_limit {
            while self.events.len() > limit {
                self.events.pop_front();
            }
        }
    }

    /// Forwarded copies of `event` for every node observing its kind on the node it happened to.
    /// For a forwarded event that is its receiver. Each referencing role contributes its derived
    /// kind, duplicates collapse.
    fn relay(&self, event: &NodeEvent) -> Vec<NodeEvent> {
        let Some(source) = event.node() else {
            return Vec::new();
        };
        let Some(observers) = self.observers.get(source) else {
            return Vec::new();
        };
        let kind = event.kind();
        let mut relayed = Vec::new();
        for (observer_id, observed) in observers.iter() {
            if !observed.contains(kind) {
                continue;
            }
            let Some(observer) = self.nodes.get(observer_id) else {
                continue;
            };
            let mut kinds = BTreeSet::new();
            for (_, reference) in observer.references().iter() {
                if reference.is_resolved()
                    && reference.target() == Some(source)
                    && reference.events().contains(kind)
                {
                    kinds.insert(observer.roles().forward_as(reference.role()).unwrap_or(kind));
                }
            }
            relayed.extend(
                kinds
                    .into_iter()
                    .map(|k| NodeEvent::Forwarded(observer_id.clone(), k, source.clone())),
            );
        }
        relayed
    }

    fn resolved_targets(&self, id: &NodeId) -> BTreeSet<(ReferenceRole, NodeId)> {
        self.nodes
            .get(id)
            .map(|node| {
                node.references()
                    .iter()
                    .filter(|(_, r)| r.is_resolved())
                    .filter_map(|(_, r)| r.target().map(|t| (r.role().clone(), t.clone())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Recomputes every slot's resolution from its ID and the directory.
    fn resolve_node_references(&mut self, id: &NodeId) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let handles: BTreeMap<NodeId, NodeHandle> = node
            .references()
            .iter()
            .filter_map(|(_, r)| r.target())
            .filter_map(|t| {
                self.nodes
                    .get(t)
                    .and_then(Node::handle)
                    .map(|handle| (t.clone(), handle))
            })
            .collect();
        if let Some(node) = self.nodes.get_mut(id) {
            for reference in node.references_mut().iter_mut() {
                let resolution = reference
                    .target()
                    .and_then(|t| handles.get(t))
                    .map_or(Resolution::Unresolved, |h| Resolution::Resolved(*h));
                reference.set_resolution(resolution);
            }
        }
    }

    fn drop_observations(&mut self, observer: &NodeId) {
        if let Some(previous) = self.observing.remove(observer) {
            for target in previous {
                if let Some(observers) = self.observers.get_mut(&target) {
                    observers.remove(observer);
                    if observers.is_empty() {
                        self.observers.remove(&target);
                    }
                }
            }
        }
    }

    /// Re-subscribes `observer` to the union of events over its resolved references per target.
    fn refresh_observations(&mut self, observer: &NodeId) {
        let observed = self
            .nodes
            .get(observer)
            .map(|node| node.references().observed_events())
            .unwrap_or_default();
        self.drop_observations(observer);
        let mut targets = BTreeSet::new();
        for (target, events) in observed {
            if events.is_empty() {
                continue;
            }
            self.observers
                .entry(target.clone())
                .or_default()
                .insert(observer.clone(), events);
            targets.insert(target);
        }
        if !targets.is_empty() {
            self.observing.insert(observer.clone(), targets);
        }
    }

    /// Re-resolves `id` after nodes came or went, reporting every slot that started or stopped
    /// resolving.
    fn refresh_referencer(&mut self, id: &NodeId) {
        if !self.nodes.contains_key(id) {
            return;
        }
        let before = self.resolved_targets(id);
        self.resolve_node_references(id);
        self.refresh_observations(id);
        let after = self.resolved_targets(id);
        if before == after {
            return;
        }

        let mut events = Vec::new();
        let mut hierarchy_changed = false;
        for (role, target) in after.difference(&before) {
            events.push(NodeEvent::ReferenceAdded(id.clone(), role.clone(), target.clone()));
            events.extend(self.derived_event(id, role, target));
            hierarchy_changed |= role.is_hierarchy_link();
        }
        for (role, target) in before.difference(&after) {
            events.push(NodeEvent::ReferenceRemoved(id.clone(), role.clone(), target.clone()));
            events.extend(self.derived_event(id, role, target));
            hierarchy_changed |= role.is_hierarchy_link();
        }
        if hierarchy_changed {
            self.invalidate_hierarchy();
        }
        for event in events {
            self.emit(event);
        }
    }

    fn derived_event(&self, id: &NodeId, role: &ReferenceRole, source: &NodeId) -> Option<NodeEvent> {
        let kind = self.nodes.get(id)?.roles().forward_as(role)?;
        Some(NodeEvent::Forwarded(id.clone(), kind, source.clone()))
    }

    /// Runs a reference mutation on an attached node and reconciles the scene with its result.
    pub(super) fn mutate_references<F>(
        &mut self,
        id: &NodeId,
        f: F,
    ) -> Result<Vec<ReferenceChange>, DmmlError>
    where
        F: FnOnce(&mut Node) -> Result<Vec<ReferenceChange>, DmmlError>,
    {
        let before = self.resolved_targets(id);
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| DmmlError::NotFound(format!("node {id}")))?;
        let changes = f(node)?;
        self.after_reference_changes(id, &before, &changes);
        Ok(changes)
    }

    fn after_reference_changes(
        &mut self,
        id: &NodeId,
        before: &BTreeSet<(ReferenceRole, NodeId)>,
        changes: &[ReferenceChange],
    ) {
        for change in changes {
            if let Some(new) = &change.new {
                self.register_reference(new, id);
            }
        }
        for change in changes {
            let Some(old) = &change.old else {
                continue;
            };
            let still_referenced = self
                .nodes
                .get(id)
                .is_some_and(|node| node.references().references_target(old));
            if !still_referenced {
                self.unregister_reference(old, id);
            }
        }
        self.resolve_node_references(id);
        self.refresh_observations(id);
        if changes.is_empty() {
            return;
        }

        let after = self.resolved_targets(id);
        let mut events = Vec::new();
        for change in changes {
            let was = change
                .old
                .as_ref()
                .filter(|old| before.contains(&(change.role.clone(), (*old).clone())));
            let now = change
                .new
                .as_ref()
                .filter(|new| after.contains(&(change.role.clone(), (*new).clone())));
            let source = match (was, now) {
                (None, Some(new)) => {
                    events.push(NodeEvent::ReferenceAdded(
                        id.clone(),
                        change.role.clone(),
                        new.clone(),
                    ));
                    new
                }
                (Some(old), None) => {
                    events.push(NodeEvent::ReferenceRemoved(
                        id.clone(),
                        change.role.clone(),
                        old.clone(),
                    ));
                    old
                }
                (Some(old), Some(new)) if old != new => {
                    events.push(NodeEvent::ReferenceModified(
                        id.clone(),
                        change.role.clone(),
                        old.clone(),
                        new.clone(),
                    ));
                    new
                }
                _ => continue,
            };
            events.extend(self.derived_event(id, &change.role, source));
        }
        if changes.iter().any(|c| c.role.is_hierarchy_link()) {
            self.invalidate_hierarchy();
        }
        self.touch();
        events.push(NodeEvent::Modified(id.clone()));
        for event in events {
            self.emit(event);
        }
    }
}
