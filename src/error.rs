use std::{io, num::ParseFloatError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum DmmlError {
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Invalid index {index} for reference role '{role}'")]
    InvalidIndex { role: String, index: usize },
    #[error("Invalid node ID: {0:?}")]
    InvalidId(String),
    #[error("Invalid reference role: {0}")]
    InvalidRole(String),
    #[error("Node is not a hierarchy node: {0}")]
    NotHierarchy(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("A hierarchy node cannot be its own parent: {0}")]
    SelfParent(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for DmmlError {
    fn from(src: toml::de::Error) -> DmmlError {
        DmmlError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for DmmlError {
    fn from(src: toml::ser::Error) -> DmmlError {
        DmmlError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<ParseFloatError> for DmmlError {
    fn from(src: ParseFloatError) -> DmmlError {
        DmmlError::Serialization(format!("Invalid floating point attribute: {src}"))
    }
}

impl From<io::Error> for DmmlError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => DmmlError::NotFound(format!("{x}")),
            _ => DmmlError::Io(format!("IOError: {}", x.kind())),
        }
    }
}
