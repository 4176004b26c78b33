use crate::batch::{BatchItem, DecisionBatch};
use crate::catalog::Catalog;
use crate::error::Error;
use crate::progress::{ProgressReporter, SilentReporter};
use crate::scanner::{EntryIndex, FileEntry};
use crate::storage::{path_key, MetadataStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::info;

/// Hash-free duplicate key. Name comparison is byte-exact; the host
/// filesystem decides whether two names can coexist at all.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub size: u64,
}

impl Signature {
    /// The signature of a file entry. A managed link is named after the file
    /// it points at, so renamed copies of a link still group together.
    pub fn of(entry: &FileEntry) -> Option<Signature> {
        if !entry.is_file() {
            return None;
        }
        let name = entry
            .link_target
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .or_else(|| entry.file_name())?;
        Some(Signature {
            name,
            size: entry.size?,
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.name, self.size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub relative_path: PathBuf,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub link_target: Option<PathBuf>,
}

impl GroupMember {
    fn from_entry(entry: &FileEntry) -> Self {
        GroupMember {
            relative_path: entry.relative_path.clone(),
            modified: entry.modified_time,
            link_target: entry.link_target.clone(),
        }
    }

    fn own_name(&self) -> Option<String> {
        self.relative_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }
}

/// Entries sharing a signature. Paths are relative to the scanned directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub signature: Signature,
    pub members: Vec<GroupMember>,
    #[serde(default)]
    pub marked_for_deletion: Vec<PathBuf>,
}

impl BatchItem for DuplicateGroup {
    const KIND: &'static str = "duplicates";
    const EXTENSION: &'static str = "dedup";
}

pub type DuplicateReport = DecisionBatch<DuplicateGroup>;

impl DuplicateGroup {
    /// Members in discovery order, except that members carrying the
    /// signature's own name move to the front. With `mark` set, everything
    /// after the first member is marked.
    pub fn new(signature: Signature, entries: &[&FileEntry], mark: bool) -> Self {
        let mut members: Vec<GroupMember> = entries.iter().map(|e| GroupMember::from_entry(e)).collect();
        members.sort_by_key(|m| m.own_name().as_deref() != Some(signature.name.as_str()));
        let marked_for_deletion = if mark {
            members.iter().skip(1).map(|m| m.relative_path.clone()).collect()
        } else {
            Vec::new()
        };
        DuplicateGroup {
            signature,
            members,
            marked_for_deletion,
        }
    }

    pub fn is_marked(&self, relative_path: &Path) -> bool {
        let key = path_key(relative_path);
        self.marked_for_deletion.iter().any(|m| path_key(m) == key)
    }

    /// Members that stay after resolution.
    pub fn survivors(&self) -> impl Iterator<Item = &GroupMember> + '_ {
        self.members.iter().filter(move |m| !self.is_marked(&m.relative_path))
    }

    pub fn wasted_bytes(&self) -> u64 {
        self.signature.size * self.members.len().saturating_sub(1) as u64
    }

    /// Every mark names a member, and at least one member is left unmarked.
    pub fn validate(&self) -> Result<(), String> {
        let members: HashSet<String> = self.members.iter().map(|m| path_key(&m.relative_path)).collect();
        for path in self.members.iter().map(|m| &m.relative_path).chain(&self.marked_for_deletion) {
            if !path.components().all(|c| matches!(c, Component::Normal(_))) {
                return Err(format!("'{}' is not a plain relative path", path.display()));
            }
        }
        if let Some(stray) = self
            .marked_for_deletion
            .iter()
            .find(|m| !members.contains(&path_key(m)))
        {
            return Err(format!("'{}' is marked but not a member", stray.display()));
        }
        if self.survivors().next().is_none() {
            return Err("every member is marked for deletion".to_string());
        }
        Ok(())
    }
}

/// Scans a catalog directory and writes a duplicate report into it.
pub struct DuplicateFinder<'c, S: MetadataStore> {
    catalog: &'c Catalog<S>,
    reporter: &'c dyn ProgressReporter,
}

impl<'c, S: MetadataStore> DuplicateFinder<'c, S> {
    pub fn new(catalog: &'c Catalog<S>) -> Self {
        DuplicateFinder {
            catalog,
            reporter: &SilentReporter,
        }
    }

    pub fn with_reporter(mut self, reporter: &'c dyn ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Group the managed links under `dir` by signature. The report is
    /// persisted only when duplicates were found.
    pub fn find(&self, dir: &Path, override_existing: bool, mark: bool) -> Result<DuplicateReport, Error> {
        if !self.catalog.contains(dir) {
            return Err(Error::NotInCatalog(dir.to_path_buf()));
        }
        if !dir.is_dir() {
            return Err(Error::Scan {
                path: dir.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        DuplicateReport::ensure_writable(dir, override_existing)?;

        self.reporter.on_scan_start(&dir.to_string_lossy());
        let index = EntryIndex::from_scan_with_progress(self.catalog.scanner().scan(dir), self.reporter)?;

        let groups: Vec<DuplicateGroup> = index
            .group_by(Signature::of)
            .into_iter()
            .filter(|(_, members)| members.len() > 1)
            .map(|(signature, members)| DuplicateGroup::new(signature, &members, mark))
            .collect();

        let report = DuplicateReport::new(dir, None, groups);
        if report.items.is_empty() {
            DuplicateReport::discard(dir)?;
            info!("No duplicates under {}", dir.display());
        } else {
            let path = report.save(dir)?;
            info!(
                "Found {} duplicate groups under {}, report written to {}",
                report.items.len(),
                dir.display(),
                path.display()
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::EntryKind;

    fn link(path: &str, size: u64, target: &str) -> FileEntry {
        FileEntry {
            relative_path: PathBuf::from(path),
            kind: EntryKind::File,
            size: Some(size),
            modified_time: Utc::now(),
            link_target: Some(PathBuf::from(target)),
        }
    }

    #[test]
    fn test_signature_prefers_link_target_name() {
        let entry = link("copy_x.jpg", 100, "/media/x.jpg");
        let sig = Signature::of(&entry).unwrap();
        assert_eq!(sig.name, "x.jpg");
        assert_eq!(sig.size, 100);
    }

    #[test]
    fn test_new_group_puts_signature_name_first() {
        let copy = link("copy_x.jpg", 100, "/media/x.jpg");
        let orig = link("x.jpg", 100, "/media/x.jpg");
        let sig = Signature::of(&orig).unwrap();
        let group = DuplicateGroup::new(sig, &[&copy, &orig], true);
        assert_eq!(group.members[0].relative_path, PathBuf::from("x.jpg"));
        assert_eq!(group.marked_for_deletion, vec![PathBuf::from("copy_x.jpg")]);
        assert!(group.validate().is_ok());
        assert_eq!(group.wasted_bytes(), 100);
    }

    #[test]
    fn test_validate_rejects_bad_marks() {
        let a = link("a/x.jpg", 1, "/m/x.jpg");
        let b = link("b/x.jpg", 1, "/m/x.jpg");
        let sig = Signature::of(&a).unwrap();

        let mut group = DuplicateGroup::new(sig, &[&a, &b], false);
        group.marked_for_deletion = vec![PathBuf::from("a/x.jpg"), PathBuf::from("b/x.jpg")];
        assert!(group.validate().is_err());

        group.marked_for_deletion = vec![PathBuf::from("c/x.jpg")];
        assert!(group.validate().is_err());

        group.marked_for_deletion = vec![PathBuf::from("../x.jpg")];
        assert!(group.validate().is_err());

        group.marked_for_deletion = vec![PathBuf::from("b//x.jpg")];
        assert!(group.validate().is_ok());
    }
}
