use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Metadata recorded for one managed link, keyed by its catalog-relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Absolute path of the physical file the link points at.
    pub source_path: PathBuf,
}

/// A named external source root registered with a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub name: String,
    pub base: PathBuf,
    pub added_at: DateTime<Utc>,
}
