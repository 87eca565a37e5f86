//! Reference graph snapshot.
//!
//! [ReferenceGraph] is a petgraph view of the scene: one graph node per scene node and one edge,
//! weighted by role, per reference whose target currently resolves.

use petgraph::{algo::is_cyclic_directed, visit::Dfs, Direction};
use std::collections::BTreeMap;

use super::Scene;
use crate::{properties::NodeId, role::ReferenceRole};

#[derive(Debug, Clone, Default)]
pub struct ReferenceGraph {
    graph: petgraph::Graph<NodeId, ReferenceRole>,
    id_to_index: BTreeMap<NodeId, petgraph::graph::NodeIndex>,
}

impl ReferenceGraph {
    /// Snapshot of every resolvable reference in `scene`.
    pub fn from_scene(scene: &Scene) -> Self {
        Self::from_scene_filtered(scene, |_| true)
    }

    /// Snapshot restricted to the roles accepted by `keep`.
    pub fn from_scene_filtered<F>(scene: &Scene, keep: F) -> Self
    where
        F: Fn(&ReferenceRole) -> bool,
    {
        let mut graph = petgraph::Graph::new();
        let mut id_to_index = BTreeMap::new();
        for node in scene.nodes() {
            let index = graph.add_node(node.id().clone());
            id_to_index.insert(node.id().clone(), index);
        }
        for node in scene.nodes() {
            let source = id_to_index[node.id()];
            for (_, reference) in node.references().iter() {
                if !keep(reference.role()) {
                    continue;
                }
                let Some(sink) = reference.target().and_then(|t| id_to_index.get(t)) else {
                    continue;
                };
                graph.add_edge(source, *sink, reference.role().clone());
            }
        }
        ReferenceGraph { graph, id_to_index }
    }

    pub fn as_graph(&self) -> &petgraph::Graph<NodeId, ReferenceRole> {
        &self.graph
    }

    /// `id` followed by every node reachable from it, depth first, parents before children.
    /// Empty if `id` is not in the graph.
    pub fn reachable_from(&self, id: &NodeId) -> Vec<NodeId> {
        let Some(start) = self.id_to_index.get(id) else {
            return Vec::new();
        };
        let mut dfs = Dfs::new(&self.graph, *start);
        let mut reachable = Vec::new();
        while let Some(index) = dfs.next(&self.graph) {
            reachable.push(self.graph[index].clone());
        }
        reachable
    }

    /// IDs of the nodes holding a resolvable reference to `id`.
    pub fn referencers_of(&self, id: &NodeId) -> Vec<NodeId> {
        let Some(index) = self.id_to_index.get(id) else {
            return Vec::new();
        };
        let mut sources: Vec<NodeId> = self
            .graph
            .neighbors_directed(*index, Direction::Incoming)
            .map(|source| self.graph[source].clone())
            .collect();
        sources.sort();
        sources.dedup();
        sources
    }

    pub fn has_cycle(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }
}
