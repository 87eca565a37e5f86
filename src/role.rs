//! Reference roles and the per-node role registry.
//!
//! A role names the kind of slot a reference lives in ("display", "parent", ...). Most roles are
//! well known and enumerated by [ReferenceRole]. Families of dynamically named roles (one member
//! per unit quantity, for example) are declared once through a [RoleFamily] and matched
//! structurally: the member `unit/length` of the family `unit` serializes through the attribute
//! `lengthUnitRef` when the family's attribute suffix is `UnitRef`.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};

use crate::{
    event::{EventKind, EventSet},
    DmmlError,
};

/// Separates a role family from the member name in the string form of a role.
pub const ROLE_FAMILY_SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoleFamily(String);

impl RoleFamily {
    pub fn new<S: Into<String>>(name: S) -> Self {
        RoleFamily(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn member<S: Into<String>>(&self, member: S) -> ReferenceRole {
        ReferenceRole::Member {
            family: self.clone(),
            member: member.into(),
        }
    }
}

impl Display for RoleFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{ROLE_FAMILY_SEPARATOR}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReferenceRole {
    Display,
    Storage,
    Transform,
    Parent,
    Associated,
    Custom(String),
    Member { family: RoleFamily, member: String },
}

impl ReferenceRole {
    pub fn name(&self) -> String {
        self.to_string()
    }

    pub fn family(&self) -> Option<&RoleFamily> {
        match self {
            ReferenceRole::Member { family, .. } => Some(family),
            _ => None,
        }
    }

    /// Hierarchy links feed the scene's children index.
    pub fn is_hierarchy_link(&self) -> bool {
        matches!(self, ReferenceRole::Parent | ReferenceRole::Associated)
    }

    /// Roles built in code can carry names the `references` attribute cannot hold: empty ones,
    /// or ones containing `:`, `;`, whitespace or a stray family separator. Those are rejected
    /// before any mutation.
    pub fn validate(&self) -> Result<(), DmmlError> {
        let valid = match self {
            ReferenceRole::Custom(name) => is_role_name(name),
            ReferenceRole::Member { family, member } => {
                is_role_name(family.as_str()) && is_role_name(member)
            }
            _ => true,
        };
        if valid {
            Ok(())
        } else {
            Err(DmmlError::InvalidRole(format!("{self:?}")))
        }
    }
}

fn is_role_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ':' | ';' | ROLE_FAMILY_SEPARATOR))
}

impl Display for ReferenceRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceRole::Display => write!(f, "display"),
            ReferenceRole::Storage => write!(f, "storage"),
            ReferenceRole::Transform => write!(f, "transform"),
            ReferenceRole::Parent => write!(f, "parent"),
            ReferenceRole::Associated => write!(f, "associated"),
            ReferenceRole::Custom(name) => write!(f, "{name}"),
            ReferenceRole::Member { family, member } => write!(f, "{family}{member}"),
        }
    }
}

impl TryFrom<&str> for ReferenceRole {
    type Error = DmmlError;

    fn try_from(src: &str) -> Result<ReferenceRole, DmmlError> {
        let role = match src.trim() {
            "" => return Err(DmmlError::InvalidRole("empty role name".to_string())),
            "display" => ReferenceRole::Display,
            "storage" => ReferenceRole::Storage,
            "transform" => ReferenceRole::Transform,
            "parent" => ReferenceRole::Parent,
            "associated" => ReferenceRole::Associated,
            other => match other.split_once(ROLE_FAMILY_SEPARATOR) {
                Some((family, member)) => ReferenceRole::Member {
                    family: RoleFamily::new(family),
                    member: member.to_string(),
                },
                None => ReferenceRole::Custom(other.to_string()),
            },
        };
        role.validate()?;
        Ok(role)
    }
}

impl TryFrom<String> for ReferenceRole {
    type Error = DmmlError;

    fn try_from(src: String) -> Result<ReferenceRole, DmmlError> {
        ReferenceRole::try_from(&src[..])
    }
}

impl From<ReferenceRole> for String {
    fn from(role: ReferenceRole) -> String {
        role.to_string()
    }
}

/// How references created under a role behave.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSpec {
    /// Legacy per-role serialization attribute (`displayNodeRef`). For a family this is the
    /// suffix appended to the member name (`UnitRef`).
    pub attribute_name: Option<String>,
    /// Events forwarded from the referenced node when a reference is created without an
    /// explicit event set.
    pub events: EventSet,
    /// Event fired on the referencing node when a reference under this role is added, modified or
    /// removed, and under which observed events arriving from the target are forwarded.
    pub forward_as: Option<EventKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleRegistry {
    roles: BTreeMap<ReferenceRole, RoleSpec>,
    families: BTreeMap<RoleFamily, RoleSpec>,
}

impl RoleRegistry {
    /// Registers `role`. Declaring a role twice keeps one entry; attribute name and events are
    /// overwritten only when given.
    pub fn declare(
        &mut self,
        role: ReferenceRole,
        attribute_name: Option<&str>,
        events: Option<EventSet>,
    ) {
        let spec = self.roles.entry(role).or_default();
        if let Some(name) = attribute_name {
            spec.attribute_name = Some(name.to_string());
        }
        if let Some(events) = events {
            spec.events = events;
        }
    }

    pub fn declare_family(
        &mut self,
        family: RoleFamily,
        attribute_suffix: &str,
        events: Option<EventSet>,
    ) {
        let spec = self.families.entry(family).or_default();
        spec.attribute_name = Some(attribute_suffix.to_string());
        if let Some(events) = events {
            spec.events = events;
        }
    }

    pub fn set_forward_as(&mut self, role: &ReferenceRole, kind: EventKind) {
        if let Some(spec) = self.roles.get_mut(role) {
            spec.forward_as = Some(kind);
        }
    }

    pub fn is_declared(&self, role: &ReferenceRole) -> bool {
        self.spec(role).is_some()
    }

    /// The spec of an exact role, falling back to its family for family members.
    pub fn spec(&self, role: &ReferenceRole) -> Option<&RoleSpec> {
        self.roles
            .get(role)
            .or_else(|| role.family().and_then(|family| self.families.get(family)))
    }

    pub fn default_events(&self, role: &ReferenceRole) -> EventSet {
        self.spec(role).map(|spec| spec.events).unwrap_or_default()
    }

    pub fn forward_as(&self, role: &ReferenceRole) -> Option<EventKind> {
        self.spec(role).and_then(|spec| spec.forward_as)
    }

    pub fn roles(&self) -> impl Iterator<Item = &ReferenceRole> {
        self.roles.keys()
    }

    pub fn families(&self) -> impl Iterator<Item = &RoleFamily> {
        self.families.keys()
    }

    pub fn attribute_name(&self, role: &ReferenceRole) -> Option<String> {
        if let Some(name) = self.roles.get(role).and_then(|s| s.attribute_name.as_ref()) {
            return Some(name.clone());
        }
        match role {
            ReferenceRole::Member { family, member } => self
                .families
                .get(family)
                .and_then(|spec| spec.attribute_name.as_ref())
                .map(|suffix| format!("{member}{suffix}")),
            _ => None,
        }
    }

    /// Reverse lookup of [Self::attribute_name].
    pub fn role_for_attribute(&self, attribute: &str) -> Option<ReferenceRole> {
        let exact = self.roles.iter().find_map(|(role, spec)| {
            (spec.attribute_name.as_deref() == Some(attribute)).then(|| role.clone())
        });
        if exact.is_some() {
            return exact;
        }
        self.families.iter().find_map(|(family, spec)| {
            let suffix = spec.attribute_name.as_deref()?;
            let member = attribute.strip_suffix(suffix)?;
            (!member.is_empty()).then(|| family.member(member))
        })
    }
}
