use super::FileEntry;
use crate::error::Error;
use crate::progress::{ProgressReporter, SilentReporter};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::time::Instant;

const PROGRESS_INTERVAL: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Unchanged,
}

/// One path in the union of a source tree and its catalog mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub relative_path: PathBuf,
    pub kind: ChangeKind,
    pub source: Option<FileEntry>,
    pub catalog: Option<FileEntry>,
}

impl ChangeRecord {
    /// A path that exists on both sides with a different kind has to be
    /// removed before it can be recreated.
    pub fn kind_changed(&self) -> bool {
        match (&self.source, &self.catalog) {
            (Some(s), Some(c)) => s.kind != c.kind,
            _ => false,
        }
    }
}

/// Scan results keyed by relative path, remembering discovery order.
#[derive(Debug, Clone, Default)]
pub struct EntryIndex {
    entries: BTreeMap<PathBuf, FileEntry>,
    order: Vec<PathBuf>,
}

impl EntryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain a scan into an index, stopping at the first error.
    pub fn from_scan<I>(scan: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = Result<FileEntry, Error>>,
    {
        Self::from_scan_with_progress(scan, &SilentReporter)
    }

    pub fn from_scan_with_progress<I>(scan: I, reporter: &dyn ProgressReporter) -> Result<Self, Error>
    where
        I: IntoIterator<Item = Result<FileEntry, Error>>,
    {
        let started = Instant::now();
        let mut index = Self::new();
        for entry in scan {
            index.insert(entry?)?;
            if index.len() % PROGRESS_INTERVAL == 0 {
                reporter.on_scan_progress(index.len());
            }
        }
        reporter.on_scan_complete(index.len(), started.elapsed().as_secs_f64());
        Ok(index)
    }

    pub fn insert(&mut self, entry: FileEntry) -> Result<(), Error> {
        if self.entries.contains_key(&entry.relative_path) {
            return Err(Error::Scan {
                path: entry.relative_path,
                reason: "path reported twice by one scan".to_string(),
            });
        }
        self.order.push(entry.relative_path.clone());
        self.entries.insert(entry.relative_path.clone(), entry);
        Ok(())
    }

    pub fn get(&self, path: &Path) -> Option<&FileEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in the order the scan produced them.
    pub fn entries(&self) -> impl Iterator<Item = &FileEntry> + '_ {
        self.order.iter().filter_map(move |p| self.entries.get(p))
    }

    /// Relative paths in discovery order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> + '_ {
        self.order.iter().map(PathBuf::as_path)
    }

    /// Classify every path in either index. `self` is the source side.
    /// Output is in path order.
    pub fn diff(&self, catalog: &EntryIndex) -> Vec<ChangeRecord> {
        let paths: BTreeSet<&PathBuf> = self.entries.keys().chain(catalog.entries.keys()).collect();
        paths
            .into_iter()
            .filter_map(|path| {
                let source = self.entries.get(path);
                let mirrored = catalog.entries.get(path);
                let kind = match (source, mirrored) {
                    (Some(_), None) => ChangeKind::Added,
                    (None, Some(_)) => ChangeKind::Deleted,
                    (Some(s), Some(c)) if s.same_content(c) => ChangeKind::Unchanged,
                    (Some(_), Some(_)) => ChangeKind::Modified,
                    (None, None) => return None,
                };
                Some(ChangeRecord {
                    relative_path: path.clone(),
                    kind,
                    source: source.cloned(),
                    catalog: mirrored.cloned(),
                })
            })
            .collect()
    }

    /// Group entries by a derived key, skipping entries mapped to `None`.
    /// Groups and their members keep discovery order.
    pub fn group_by<K, F>(&self, key: F) -> Vec<(K, Vec<&FileEntry>)>
    where
        K: Eq + Hash + Clone,
        F: Fn(&FileEntry) -> Option<K>,
    {
        let mut slots: HashMap<K, usize> = HashMap::new();
        let mut groups: Vec<(K, Vec<&FileEntry>)> = Vec::new();
        for entry in self.entries() {
            let Some(k) = key(entry) else { continue };
            match slots.get(&k) {
                Some(&slot) => groups[slot].1.push(entry),
                None => {
                    slots.insert(k.clone(), groups.len());
                    groups.push((k, vec![entry]));
                }
            }
        }
        groups
    }
}
