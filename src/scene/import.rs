//! Scene import and serialization.

use std::collections::{BTreeMap, BTreeSet};

use super::Scene;
use crate::{
    codec::{NodeRecord, SceneDocument},
    event::NodeEvent,
    node::Node,
    properties::NodeId,
    DmmlError,
};

impl Scene {
    /// Serializes every attached node, in insertion order, as a TOML scene document.
    pub fn serialize(&self) -> Result<String, DmmlError> {
        let document = SceneDocument {
            nodes: self.nodes().map(NodeRecord::from_node).collect(),
            ..Default::default()
        };
        document.to_toml()
    }

    /// Replaces the scene content with `src`. Singletons are kept and merged with their
    /// serialized counterparts.
    pub fn load(&mut self, src: &str) -> Result<Vec<NodeId>, DmmlError> {
        let document = SceneDocument::parse(src)?;
        self.clear(false);
        self.import_document(document)
    }

    /// Adds the nodes serialized in `src` and returns their IDs in document order.
    ///
    /// Imported nodes whose ID is already taken get a fresh one and every imported reference is
    /// remapped to follow. Imported references to IDs outside the imported set are dropped unless
    /// they name a singleton (see `SceneConfig::prune_unimported_references`). Nodes already in the
    /// scene are never rewritten.
    pub fn import(&mut self, src: &str) -> Result<Vec<NodeId>, DmmlError> {
        let document = SceneDocument::parse(src)?;
        self.import_document(document)
    }

    pub fn import_document(&mut self, document: SceneDocument) -> Result<Vec<NodeId>, DmmlError> {
        let mut nodes = Vec::with_capacity(document.nodes.len());
        for record in document.nodes.iter() {
            match record.to_node()? {
                Some(node) => nodes.push(node),
                None => tracing::warn!("Skipping node with unknown tag '{}'", record.tag),
            }
        }

        self.emit(NodeEvent::ImportStarted);
        let remap = self.assign_import_ids(&mut nodes)?;
        let singleton_targets: BTreeSet<NodeId> = remap
            .values()
            .filter(|id| self.is_singleton_id(id.as_str()))
            .cloned()
            .chain(nodes.iter().filter(|n| n.is_singleton()).map(|n| n.id().clone()))
            .collect();
        let prune = self.config.prune_unimported_references;

        for node in nodes.iter_mut() {
            let owner = node.id().clone();
            node.retarget_references(|target| {
                if let Some(new) = remap.get(target) {
                    return Some(new.clone());
                }
                if singleton_targets.contains(target) || self.is_singleton_id(target.as_str()) {
                    return Some(target.clone());
                }
                if prune {
                    tracing::debug!("Dropping reference of {owner} to unimported node {target}");
                    None
                } else {
                    Some(target.clone())
                }
            });
        }

        let mut imported = Vec::with_capacity(nodes.len());
        for node in nodes {
            imported.push(self.add_node(node)?);
        }
        for id in imported.iter() {
            self.update_references(id.as_str())?;
        }
        self.emit(NodeEvent::ImportEnded);
        tracing::debug!("Imported {} nodes", imported.len());
        Ok(imported)
    }

    /// Gives every imported node its final ID and returns the old -> new mapping.
    fn assign_import_ids(
        &mut self,
        nodes: &mut [Node],
    ) -> Result<BTreeMap<NodeId, NodeId>, DmmlError> {
        let mut remap = BTreeMap::new();
        let mut claimed = BTreeSet::new();
        for node in nodes.iter_mut() {
            let old = node.id().clone();
            let existing_singleton = node
                .singleton_tag()
                .and_then(|tag| self.singleton_id(node.class_name(), tag))
                .cloned();
            let new = match existing_singleton {
                Some(existing) => existing,
                None if old.is_empty()
                    || self.contains(old.as_str())
                    || claimed.contains(&old) =>
                {
                    self.unique_id_avoiding(node.class_name(), &claimed)
                }
                None => old.clone(),
            };
            if new != old {
                tracing::debug!("Imported node {old} becomes {new}");
                node.set_id(new.clone())?;
            }
            claimed.insert(new.clone());
            if !old.is_empty() {
                remap.entry(old).or_insert(new);
            }
        }
        Ok(remap)
    }
}
