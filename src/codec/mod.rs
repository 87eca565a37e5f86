//! Attribute grammar of serialized scenes.
//!
//! Nodes serialize to flat string attributes. Two of them carry structured values sharing one
//! delimiter grammar:
//!
//! - `attributes="key1:value1;key2:value2;"`, free-form node attributes. `%` and `;` inside keys
//!   and values are escaped as `%25` and `%3B`.
//! - `references="role1:id1 id2;role2:id3;"`, every non-empty reference, grouped by role in slot
//!   order.
//!
//! [`document`] wraps node attributes into the TOML scene document read by
//! [`Scene::import`](crate::scene::Scene::import).

pub mod document;

use std::collections::BTreeMap;

use crate::{properties::NodeId, reference::ReferenceTable, role::ReferenceRole, DmmlError};

pub use document::{NodeRecord, SceneDocument, SCENE_DOCUMENT_VERSION};

const ENTRY_SEPARATOR: char = ';';
const KEY_SEPARATOR: char = ':';

pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => out.push_str("%25"),
            ';' => out.push_str("%3B"),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [escape]. Percent sequences other than `%25` and `%3B` are kept verbatim.
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("%25") {
            out.push('%');
            rest = &tail[3..];
        } else if tail.starts_with("%3B") || tail.starts_with("%3b") {
            out.push(';');
            rest = &tail[3..];
        } else {
            out.push('%');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

pub fn encode_attributes(attributes: &BTreeMap<String, String>) -> String {
    attributes
        .iter()
        .map(|(k, v)| format!("{}{KEY_SEPARATOR}{}{ENTRY_SEPARATOR}", escape(k), escape(v)))
        .collect()
}

/// Splits on the first `:` of each entry, so values may contain colons.
pub fn decode_attributes(src: &str) -> Result<BTreeMap<String, String>, DmmlError> {
    let mut attributes = BTreeMap::new();
    for entry in src.split(ENTRY_SEPARATOR).filter(|e| !e.trim().is_empty()) {
        let Some((key, value)) = entry.split_once(KEY_SEPARATOR) else {
            return Err(DmmlError::Serialization(format!(
                "attribute entry '{entry}' has no key separator"
            )));
        };
        attributes.insert(unescape(key.trim()), unescape(value));
    }
    Ok(attributes)
}

pub fn encode_references(references: &ReferenceTable) -> String {
    let mut out = String::new();
    for role in references.roles() {
        let ids = references.ids(role);
        if ids.is_empty() {
            continue;
        }
        let joined: Vec<&str> = ids.iter().map(NodeId::as_str).collect();
        out.push_str(&format!(
            "{role}{KEY_SEPARATOR}{}{ENTRY_SEPARATOR}",
            joined.join(" ")
        ));
    }
    out
}

pub fn decode_references(src: &str) -> Result<Vec<(ReferenceRole, Vec<NodeId>)>, DmmlError> {
    let mut references = Vec::new();
    for entry in src.split(ENTRY_SEPARATOR).filter(|e| !e.trim().is_empty()) {
        let Some((role, ids)) = entry.split_once(KEY_SEPARATOR) else {
            return Err(DmmlError::Serialization(format!(
                "reference entry '{entry}' has no role separator"
            )));
        };
        let role = ReferenceRole::try_from(role)?;
        let ids = ids.split_whitespace().map(NodeId::from).collect();
        references.push((role, ids));
    }
    Ok(references)
}
