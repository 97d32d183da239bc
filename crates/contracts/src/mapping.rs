//! Mapping operation data

use serde::{Deserialize, Serialize};

use crate::{DataItem, PathReference};

/// One field relocation into a destination-specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingOperation {
    /// Where the value is written
    pub destination: PathReference,
    /// Where the value is read from
    #[serde(default)]
    pub source: Option<PathReference>,
    /// Constant written instead of the source value
    #[serde(default)]
    pub map_to: Option<DataItem>,
    /// Required canonical string of the source value
    #[serde(default)]
    pub filter: Option<String>,
}

impl MappingOperation {
    /// Copy `source` to `destination`
    pub fn from_path(source: PathReference, destination: PathReference) -> Self {
        Self {
            destination,
            source: Some(source),
            map_to: None,
            filter: None,
        }
    }

    /// Write a constant at `destination`
    pub fn constant(destination: PathReference, value: impl Into<DataItem>) -> Self {
        Self {
            destination,
            source: None,
            map_to: Some(value.into()),
            filter: None,
        }
    }

    pub fn with_source(mut self, source: PathReference) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn is_constant(&self) -> bool {
        self.map_to.is_some()
    }
}
