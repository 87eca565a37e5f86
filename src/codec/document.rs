use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{node::Node, properties::NodeKind, DmmlError};

pub const SCENE_DOCUMENT_VERSION: u32 = 1;

/// One serialized node: its tag name plus its string attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub tag: String,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, String>,
}

impl NodeRecord {
    pub fn from_node(node: &Node) -> Self {
        NodeRecord {
            tag: node.tag_name().to_string(),
            attributes: node.write_attributes(),
        }
    }

    /// Builds the node, None if the tag names no known kind.
    pub fn to_node(&self) -> Result<Option<Node>, DmmlError> {
        match NodeKind::create_node_instance(&self.tag) {
            Some(kind) => Node::from_attributes(kind, &self.attributes).map(Some),
            None => Ok(None),
        }
    }
}

/// A scene serialized as TOML:
///
/// ```toml
/// version = 1
///
/// [[node]]
/// tag = "Model"
/// id = "vtkDMMLModelNode1"
/// references = "display:vtkDMMLModelDisplayNode1;"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, rename = "node")]
    pub nodes: Vec<NodeRecord>,
}

fn default_version() -> u32 {
    SCENE_DOCUMENT_VERSION
}

impl Default for SceneDocument {
    fn default() -> Self {
        SceneDocument {
            version: SCENE_DOCUMENT_VERSION,
            nodes: Vec::new(),
        }
    }
}

impl SceneDocument {
    pub fn parse(src: &str) -> Result<SceneDocument, DmmlError> {
        let document: SceneDocument = toml::from_str(src)?;
        if document.version > SCENE_DOCUMENT_VERSION {
            tracing::warn!(
                "Scene document version {} is newer than supported version {}",
                document.version,
                SCENE_DOCUMENT_VERSION
            );
        }
        Ok(document)
    }

    pub fn to_toml(&self) -> Result<String, DmmlError> {
        Ok(toml::to_string(self)?)
    }
}
