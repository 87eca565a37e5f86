use enumset::{EnumSet, EnumSetType};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::{properties::NodeId, role::ReferenceRole};

/// [EventKind] enumerates the notifications a node or scene can emit. References carry an
/// [EventSet] of these kinds to declare which events of the referenced node are forwarded to the
/// referencing node.
#[derive(Debug, Serialize, Deserialize, PartialOrd, Ord, Hash, EnumSetType)]
#[enumset(serialize_repr = "list")]
pub enum EventKind {
    /// The node's own state changed.
    Modified,
    /// A reference now resolves to a node where it previously resolved to nothing.
    ReferenceAdded,
    /// A resolved reference now resolves to a different node.
    ReferenceModified,
    /// A resolved reference no longer resolves to a node.
    ReferenceRemoved,
    /// Something observed through a display reference changed.
    DisplayModified,
    /// Something observed through a transform reference changed.
    TransformModified,
    /// Something observed through a storage reference changed.
    StorageModified,
    /// A hierarchy link (parent or associated node) changed.
    HierarchyModified,
    NodeAdded,
    NodeAboutToBeRemoved,
    NodeRemoved,
    ImportStarted,
    ImportEnded,
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

pub type EventSet = EnumSet<EventKind>;

/// Events produced by a [crate::scene::Scene]. Every variant names the node the event is about
/// first (except the scene-wide import markers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeEvent {
    Modified(NodeId),
    /// Referencing node, role, newly resolved target
    ReferenceAdded(NodeId, ReferenceRole, NodeId),
    /// Referencing node, role, old target, new target
    ReferenceModified(NodeId, ReferenceRole, NodeId, NodeId),
    /// Referencing node, role, previously resolved target
    ReferenceRemoved(NodeId, ReferenceRole, NodeId),
    /// Receiver, forwarded kind, observed node the event arrived from
    Forwarded(NodeId, EventKind, NodeId),
    NodeAdded(NodeId),
    NodeAboutToBeRemoved(NodeId),
    NodeRemoved(NodeId),
    ImportStarted,
    ImportEnded,
}

impl NodeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            NodeEvent::Modified(_) => EventKind::Modified,
            NodeEvent::ReferenceAdded(..) => EventKind::ReferenceAdded,
            NodeEvent::ReferenceModified(..) => EventKind::ReferenceModified,
            NodeEvent::ReferenceRemoved(..) => EventKind::ReferenceRemoved,
            NodeEvent::Forwarded(_, kind, _) => *kind,
            NodeEvent::NodeAdded(_) => EventKind::NodeAdded,
            NodeEvent::NodeAboutToBeRemoved(_) => EventKind::NodeAboutToBeRemoved,
            NodeEvent::NodeRemoved(_) => EventKind::NodeRemoved,
            NodeEvent::ImportStarted => EventKind::ImportStarted,
            NodeEvent::ImportEnded => EventKind::ImportEnded,
        }
    }

    /// The node this event is delivered to, None for scene-wide events.
    pub fn node(&self) -> Option<&NodeId> {
        match self {
            NodeEvent::Modified(id)
            | NodeEvent::ReferenceAdded(id, ..)
            | NodeEvent::ReferenceModified(id, ..)
            | NodeEvent::ReferenceRemoved(id, ..)
            | NodeEvent::Forwarded(id, ..)
            | NodeEvent::NodeAdded(id)
            | NodeEvent::NodeAboutToBeRemoved(id)
            | NodeEvent::NodeRemoved(id) => Some(id),
            NodeEvent::ImportStarted | NodeEvent::ImportEnded => None,
        }
    }

    /// Forwarded events are deliveries of something that happened to another node.
    pub fn is_forwarded(&self) -> bool {
        matches!(self, NodeEvent::Forwarded(..))
    }
}

impl Display for NodeEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.node() {
            Some(id) => write!(f, "{}({id})", self.kind()),
            None => write!(f, "{}", self.kind()),
        }
    }
}
