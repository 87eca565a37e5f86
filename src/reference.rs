//! Per-node reference storage.
//!
//! A [ReferenceTable] maps each [ReferenceRole] to an ordered list of [Reference] entries. Order
//! within a role is insertion order and is observable: index 0 is "the" reference of a
//! single-valued role. Clearing an entry keeps its slot; only explicit removal shrinks the list.

use std::collections::BTreeMap;

use crate::{
    event::EventSet,
    properties::{NodeHandle, NodeId},
    role::ReferenceRole,
};

/// Whether a reference currently points at a live node.
///
/// Resolution is a function of the reference's target ID and the scene directory. The scene
/// recomputes it whenever the target is added or removed. Only resolved references observe their
/// target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Resolution {
    #[default]
    Unresolved,
    Resolved(NodeHandle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    role: ReferenceRole,
    target: NodeId,
    events: EventSet,
    resolution: Resolution,
}

impl Reference {
    pub fn new(role: ReferenceRole, target: NodeId, events: EventSet) -> Self {
        Reference {
            role,
            target,
            events,
            resolution: Resolution::Unresolved,
        }
    }

    pub fn role(&self) -> &ReferenceRole {
        &self.role
    }

    /// The referenced ID, None when the slot has been cleared.
    pub fn target(&self) -> Option<&NodeId> {
        (!self.target.is_empty()).then_some(&self.target)
    }

    pub fn events(&self) -> EventSet {
        self.events
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.resolution, Resolution::Resolved(_))
    }

    pub(crate) fn set_resolution(&mut self, resolution: Resolution) {
        self.resolution = resolution;
    }

    pub(crate) fn set_events(&mut self, events: EventSet) {
        self.events = events;
    }
}

/// One slot whose target ID changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceChange {
    pub role: ReferenceRole,
    pub index: usize,
    pub old: Option<NodeId>,
    pub new: Option<NodeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceTable {
    entries: BTreeMap<ReferenceRole, Vec<Reference>>,
}

impl ReferenceTable {
    /// Sets the slot `index` of `role`. An empty or missing `id` clears the slot in place. An index
    /// past the end appends. Returns the change if the slot's target ID changed.
    pub fn set(
        &mut self,
        role: &ReferenceRole,
        index: usize,
        id: Option<NodeId>,
        events: EventSet,
    ) -> Option<ReferenceChange> {
        let id = id.filter(|id| !id.is_empty());
        let list = self.entries.entry(role.clone()).or_default();
        let change = if index < list.len() {
            let entry = &mut list[index];
            match id {
                None => {
                    let old = entry.target().cloned()?;
                    entry.target = NodeId::default();
                    entry.resolution = Resolution::Unresolved;
                    Some(ReferenceChange {
                        role: role.clone(),
                        index,
                        old: Some(old),
                        new: None,
                    })
                }
                Some(id) => {
                    entry.events = events;
                    if entry.target == id {
                        return None;
                    }
                    let old = entry.target().cloned();
                    entry.target = id.clone();
                    entry.resolution = Resolution::Unresolved;
                    Some(ReferenceChange {
                        role: role.clone(),
                        index,
                        old,
                        new: Some(id),
                    })
                }
            }
        } else if let Some(id) = id {
            list.push(Reference::new(role.clone(), id.clone(), events));
            Some(ReferenceChange {
                role: role.clone(),
                index: list.len() - 1,
                old: None,
                new: Some(id),
            })
        } else {
            None
        };
        if list.is_empty() {
            self.entries.remove(role);
        }
        change
    }

    /// Removes the slot `index` of `role`, shifting later entries down.
    pub fn remove_nth(&mut self, role: &ReferenceRole, index: usize) -> Option<Reference> {
        let list = self.entries.get_mut(role)?;
        if index >= list.len() {
            return None;
        }
        let removed = list.remove(index);
        if list.is_empty() {
            self.entries.remove(role);
        }
        Some(removed)
    }

    pub fn get(&self, role: &ReferenceRole, index: usize) -> Option<&Reference> {
        self.entries.get(role).and_then(|list| list.get(index))
    }

    pub(crate) fn get_mut(&mut self, role: &ReferenceRole, index: usize) -> Option<&mut Reference> {
        self.entries.get_mut(role).and_then(|list| list.get_mut(index))
    }

    /// Number of slots under `role`, cleared ones included.
    pub fn len(&self, role: &ReferenceRole) -> usize {
        self.entries.get(role).map(Vec::len).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Non-empty IDs under `role`, in slot order.
    pub fn ids(&self, role: &ReferenceRole) -> Vec<NodeId> {
        self.entries
            .get(role)
            .map(|list| list.iter().filter_map(|r| r.target().cloned()).collect())
            .unwrap_or_default()
    }

    /// Number of non-empty entries under `role`.
    pub fn count(&self, role: &ReferenceRole) -> usize {
        self.entries
            .get(role)
            .map(|list| list.iter().filter(|r| r.target().is_some()).count())
            .unwrap_or_default()
    }

    pub fn roles(&self) -> impl Iterator<Item = &ReferenceRole> {
        self.entries.keys()
    }

    /// Every entry, ordered by role then slot.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Reference)> {
        self.entries
            .values()
            .flat_map(|list| list.iter().enumerate())
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Reference> {
        self.entries.values_mut().flat_map(|list| list.iter_mut())
    }

    pub fn references_target(&self, id: &NodeId) -> bool {
        self.iter().any(|(_, r)| r.target() == Some(id))
    }

    /// Every (role, index) pair whose target is `id`.
    pub fn slots_targeting(&self, id: &NodeId) -> Vec<(ReferenceRole, usize)> {
        self.iter()
            .filter(|(_, r)| r.target() == Some(id))
            .map(|(index, r)| (r.role.clone(), index))
            .collect()
    }

    /// Drops cleared slots under `role`, or under every role.
    pub fn compact(&mut self, role: Option<&ReferenceRole>) {
        match role {
            Some(role) => {
                if let Some(list) = self.entries.get_mut(role) {
                    list.retain(|r| r.target().is_some());
                }
            }
            None => {
                for list in self.entries.values_mut() {
                    list.retain(|r| r.target().is_some());
                }
            }
        }
        self.entries.retain(|_, list| !list.is_empty());
    }

    /// The union of forwarded events per target, over resolved entries only.
    pub fn observed_events(&self) -> BTreeMap<NodeId, EventSet> {
        let mut observed: BTreeMap<NodeId, EventSet> = BTreeMap::new();
        for (_, reference) in self.iter().filter(|(_, r)| r.is_resolved()) {
            if let Some(target) = reference.target() {
                *observed.entry(target.clone()).or_default() |= reference.events;
            }
        }
        observed
    }

    /// Same roles, slots, targets and events. Resolution is ignored.
    pub fn same_entries(&self, other: &ReferenceTable) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().zip(other.entries.iter()).all(|((ra, a), (rb, b))| {
                ra == rb
                    && a.len() == b.len()
                    && a
                        .iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.target == y.target && x.events == y.events)
            })
    }

    /// Slot-wise differences between `self` (before) and `other` (after).
    pub fn diff(&self, other: &ReferenceTable) -> Vec<ReferenceChange> {
        let mut roles: Vec<&ReferenceRole> = self.roles().chain(other.roles()).collect();
        roles.sort();
        roles.dedup();

        let mut changes = Vec::new();
        for role in roles {
            for index in 0..self.len(role).max(other.len(role)) {
                let old = self.get(role, index).and_then(|r| r.target().cloned());
                let new = other.get(role, index).and_then(|r| r.target().cloned());
                if old != new {
                    changes.push(ReferenceChange {
                        role: role.clone(),
                        index,
                        old,
                        new,
                    });
                }
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn id(s: &str) -> Option<NodeId> {
        Some(NodeId::from(s))
    }

    #[test]
    fn clearing_keeps_the_slot() {
        let mut table = ReferenceTable::default();
        let role = ReferenceRole::Display;
        table.set(&role, 0, id("a"), EventSet::empty());
        table.set(&role, 1, id("b"), EventSet::empty());

        let change = table.set(&role, 0, None, EventSet::empty()).unwrap();
        assert_eq!(change.old, id("a"));
        assert_eq!(table.len(&role), 2);
        assert_eq!(table.count(&role), 1);
        assert_eq!(table.ids(&role), vec![NodeId::from("b")]);

        assert_eq!(table.set(&role, 0, None, EventSet::empty()), None);
        assert_eq!(table.set(&role, 7, None, EventSet::empty()), None);
        assert_eq!(table.count(&role), 1);

        table.compact(Some(&role));
        assert_eq!(table.get(&role, 0).and_then(Reference::target), id("b").as_ref());
    }

    #[test]
    fn past_the_end_appends() {
        let mut table = ReferenceTable::default();
        let role = ReferenceRole::Custom("volumeMask".into());
        let change = table.set(&role, 5, id("m"), EventSet::empty()).unwrap();
        assert_eq!(change.index, 0);
        assert_eq!(table.len(&role), 1);
    }

    #[test]
    fn same_id_updates_events_only() {
        let mut table = ReferenceTable::default();
        let role = ReferenceRole::Transform;
        table.set(&role, 0, id("t"), EventSet::empty());
        assert_eq!(
            table.set(&role, 0, id("t"), EventKind::Modified.into()),
            None
        );
        assert_eq!(
            table.get(&role, 0).map(Reference::events),
            Some(EventSet::only(EventKind::Modified))
        );
    }

    #[test]
    fn diff_reports_changed_slots() {
        let mut before = ReferenceTable::default();
        before.set(&ReferenceRole::Display, 0, id("a"), EventSet::empty());
        before.set(&ReferenceRole::Storage, 0, id("s"), EventSet::empty());
        let mut after = before.clone();
        after.set(&ReferenceRole::Display, 0, id("b"), EventSet::empty());
        after.remove_nth(&ReferenceRole::Storage, 0);

        let changes = before.diff(&after);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].new, id("b"));
        assert_eq!(changes[1].old, id("s"));
        assert_eq!(changes[1].new, None);
    }
}
