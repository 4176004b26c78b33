pub mod index;
pub mod walk;

pub use index::{ChangeKind, ChangeRecord, EntryIndex};
pub use walk::{Scan, ScanMode, TreeScanner};

use crate::error::Error;
use crate::storage::FileRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One file or directory observed during a scan. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub relative_path: PathBuf,
    pub kind: EntryKind,
    /// Byte length; `None` for directories.
    pub size: Option<u64>,
    pub modified_time: DateTime<Utc>,
    /// Where a catalog link resolves to. Always `None` on the physical side.
    pub link_target: Option<PathBuf>,
}

impl FileEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn file_name(&self) -> Option<String> {
        self.relative_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Same kind, and for files the same size and modification time.
    pub fn same_content(&self, other: &FileEntry) -> bool {
        match (self.kind, other.kind) {
            (EntryKind::Directory, EntryKind::Directory) => true,
            (EntryKind::File, EntryKind::File) => {
                self.size == other.size && self.modified_time == other.modified_time
            }
            _ => false,
        }
    }

    pub(crate) fn from_record(relative_path: PathBuf, record: FileRecord, link_target: Option<PathBuf>) -> Self {
        FileEntry {
            relative_path,
            kind: EntryKind::File,
            size: Some(record.size),
            modified_time: record.modified,
            link_target: link_target.or(Some(record.source_path)),
        }
    }
}

/// Tells a catalog scan which symlinks it manages and what was recorded for them.
pub trait LinkResolver {
    /// The record for a managed link at absolute `path`, `None` for foreign
    /// links and anything that is not a link.
    fn managed_link(&self, path: &Path) -> Result<Option<FileRecord>, Error>;
    /// Paths the catalog keeps for itself (never scanned).
    fn is_reserved(&self, path: &Path) -> bool;
}
