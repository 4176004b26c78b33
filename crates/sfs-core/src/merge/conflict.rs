use crate::batch::{BatchItem, DecisionBatch};
use crate::scanner::{EntryKind, FileEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// What to do with one conflict. Filled in by a policy or by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    #[default]
    Unresolved,
    KeepTarget,
    KeepSource,
    KeepBoth,
}

/// Blanket resolution applied to unresolved conflicts when a merge continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    #[default]
    KeepTarget,
    KeepSource,
    KeepBoth,
}

impl ConflictPolicy {
    pub fn resolution(self) -> Resolution {
        match self {
            ConflictPolicy::KeepTarget => Resolution::KeepTarget,
            ConflictPolicy::KeepSource => Resolution::KeepSource,
            ConflictPolicy::KeepBoth => Resolution::KeepBoth,
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep-target" => Ok(ConflictPolicy::KeepTarget),
            "keep-source" => Ok(ConflictPolicy::KeepSource),
            "keep-both" => Ok(ConflictPolicy::KeepBoth),
            other => Err(format!(
                "unknown conflict policy '{}' (expected keep-target, keep-source or keep-both)",
                other
            )),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictPolicy::KeepTarget => "keep-target",
            ConflictPolicy::KeepSource => "keep-source",
            ConflictPolicy::KeepBoth => "keep-both",
        };
        f.write_str(s)
    }
}

/// One side of a conflict as shown in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDescriptor {
    /// Absolute path inside the catalog.
    pub path: PathBuf,
    pub kind: EntryKind,
    #[serde(default)]
    pub size: Option<u64>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub link_target: Option<PathBuf>,
}

impl EntryDescriptor {
    pub fn new(root: &Path, entry: &FileEntry) -> Self {
        EntryDescriptor {
            path: root.join(&entry.relative_path),
            kind: entry.kind,
            size: entry.size,
            modified: entry.modified_time,
            link_target: entry.link_target.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub relative_path: PathBuf,
    pub target: EntryDescriptor,
    pub source: EntryDescriptor,
    #[serde(default)]
    pub resolution: Resolution,
}

impl Conflict {
    pub fn new(relative_path: &Path, target: EntryDescriptor, source: EntryDescriptor) -> Self {
        Conflict {
            relative_path: relative_path.to_path_buf(),
            target,
            source,
            resolution: Resolution::Unresolved,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution != Resolution::Unresolved
    }
}

impl BatchItem for Conflict {
    const KIND: &'static str = "merge-conflicts";
    const EXTENSION: &'static str = "merge";
}

pub type ConflictManifest = DecisionBatch<Conflict>;

/// Two entries at the same path that need no conflict: same kind, and for
/// files the same size, time and link target.
pub fn is_identical(target: &FileEntry, source: &FileEntry) -> bool {
    target.same_content(source) && target.link_target == source.link_target
}
