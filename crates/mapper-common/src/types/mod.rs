//! Mapping message types shared by producers and the mapper service
//!
//! A mapping message is a JSON array of records, each one associating a file
//! with a dataset. The record shape depends on the deployment mode:
//!
//! ```text
//! resolve: [{"stableId": "EGAF001", "datasetId": "EGAD001"}, ...]
//! direct:  [{"fileId": "42", "datasetId": "EGAD001"}, ...]
//! ```

use serde::{Deserialize, Serialize};

use crate::error::MapperError;

/// Deployment mode of the mapper service
///
/// The mode selects the accepted message shape and whether file identifiers
/// must be looked up in the reference store before insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MapperMode {
    /// Records carry a stable identifier that must be resolved to a file id
    #[default]
    Resolve,
    /// Records already carry the internal file id
    Direct,
}

impl MapperMode {
    /// Whether this mode needs the reference store
    pub fn requires_resolution(self) -> bool {
        matches!(self, MapperMode::Resolve)
    }
}

impl std::str::FromStr for MapperMode {
    type Err = MapperError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "resolve" | "stable-id" => Ok(MapperMode::Resolve),
            "direct" | "file-id" => Ok(MapperMode::Direct),
            _ => Err(MapperError::UnknownMode(s.to_string())),
        }
    }
}

impl std::fmt::Display for MapperMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapperMode::Resolve => write!(f, "resolve"),
            MapperMode::Direct => write!(f, "direct"),
        }
    }
}

/// Resolve-mode record: `{"stableId": ..., "datasetId": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StableIdMapping {
    pub stable_id: String,
    pub dataset_id: String,
}

/// Direct-mode record: `{"fileId": ..., "datasetId": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileIdMapping {
    /// Internal file id, carried as a decimal string on the wire
    pub file_id: String,
    pub dataset_id: String,
}

/// One decoded record of a mapping batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MappingRecord {
    StableId(StableIdMapping),
    FileId(FileIdMapping),
}

impl MappingRecord {
    pub fn dataset_id(&self) -> &str {
        match self {
            MappingRecord::StableId(m) => &m.dataset_id,
            MappingRecord::FileId(m) => &m.dataset_id,
        }
    }

    /// The identifier this record refers to the file by
    pub fn file_reference(&self) -> &str {
        match self {
            MappingRecord::StableId(m) => &m.stable_id,
            MappingRecord::FileId(m) => &m.file_id,
        }
    }
}

impl From<StableIdMapping> for MappingRecord {
    fn from(value: StableIdMapping) -> Self {
        MappingRecord::StableId(value)
    }
}

impl From<FileIdMapping> for MappingRecord {
    fn from(value: FileIdMapping) -> Self {
        MappingRecord::FileId(value)
    }
}

/// A mapping ready for persistence as a `filedataset` row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedMapping {
    pub file_id: i64,
    pub dataset_id: String,
}

impl ResolvedMapping {
    pub fn new(file_id: i64, dataset_id: impl Into<String>) -> Self {
        Self {
            file_id,
            dataset_id: dataset_id.into(),
        }
    }
}

impl std::fmt::Display for ResolvedMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.file_id, self.dataset_id)
    }
}
