use crate::catalog::Catalog;
use crate::error::Error;
use crate::progress::{ProgressReporter, SilentReporter};
use crate::scanner::{EntryIndex, FileEntry, TreeScanner};
use crate::storage::MetadataStore;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub use crate::scanner::{ChangeKind, ChangeRecord};

/// Counts per change kind for one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl ReconcileSummary {
    pub fn from_changes(changes: &[ChangeRecord]) -> Self {
        let mut summary = Self::default();
        for change in changes {
            match change.kind {
                ChangeKind::Added => summary.added += 1,
                ChangeKind::Modified => summary.modified += 1,
                ChangeKind::Deleted => summary.deleted += 1,
                ChangeKind::Unchanged => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Number of changes that touched the catalog.
    pub fn applied(&self) -> usize {
        self.added + self.modified + self.deleted
    }
}

/// Brings a collection's mirror under `<catalog>/<name>/` back in line with
/// the collection's physical tree.
pub struct Reconciler<'c, S: MetadataStore> {
    catalog: &'c mut Catalog<S>,
    reporter: &'c dyn ProgressReporter,
    ignore_patterns: Vec<String>,
}

impl<'c, S: MetadataStore> Reconciler<'c, S> {
    pub fn new(catalog: &'c mut Catalog<S>) -> Self {
        Reconciler {
            catalog,
            reporter: &SilentReporter,
            ignore_patterns: Vec::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: &'c dyn ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_ignore_patterns(mut self, patterns: &[String]) -> Self {
        self.ignore_patterns = patterns.to_vec();
        self
    }

    /// Diff the collection against its mirror and apply the difference.
    ///
    /// Both trees are scanned in full before the first mutation, so a missing
    /// source or a scan failure leaves the catalog untouched.
    pub fn reconcile(&mut self, name: &str) -> Result<Vec<ChangeRecord>, Error> {
        let base = self.catalog.resolve_collection_root(name)?;
        if !base.is_dir() {
            return Err(Error::SourceUnavailable(base));
        }

        self.reporter.on_scan_start(&base.to_string_lossy());
        let scanner = TreeScanner::physical().with_ignore_patterns(&self.ignore_patterns);
        let source = EntryIndex::from_scan_with_progress(scanner.scan(&base), self.reporter)?;

        let mirror_root = self.catalog.absolute(Path::new(name));
        let mirror = if mirror_root.is_dir() {
            let scanned = EntryIndex::from_scan(self.catalog.scanner().scan(&mirror_root))?;
            self.owned_mirror(name, &base, &source, scanned)?
        } else {
            EntryIndex::new()
        };
        debug!(
            "Collection '{}': {} source entries, {} mirrored",
            name,
            source.len(),
            mirror.len()
        );

        let changes = source.diff(&mirror);
        let summary = ReconcileSummary::from_changes(&changes);
        self.apply(name, &base, &changes, summary.applied())?;

        info!(
            "Synced '{}': {} added, {} modified, {} deleted, {} unchanged",
            name, summary.added, summary.modified, summary.deleted, summary.unchanged
        );
        Ok(changes)
    }

    /// Narrow a catalog scan of the mirror to what this collection owns.
    ///
    /// Links whose record points outside `base` were merged in from another
    /// collection and are left alone. A directory missing from the source is
    /// kept only while it still holds links of this collection or nothing
    /// but directories, so one that survives on foreign files alone is not
    /// reported again on every sync.
    fn owned_mirror(
        &self,
        name: &str,
        base: &Path,
        source: &EntryIndex,
        scanned: EntryIndex,
    ) -> Result<EntryIndex, Error> {
        let mut owned_links = Vec::new();
        for entry in scanned.entries().filter(|e| e.is_file()) {
            let rel = catalog_path(name, &entry.relative_path);
            match self.catalog.lookup_metadata(&rel)? {
                Some(record) if record.source_path.starts_with(base) => {
                    owned_links.push(entry.relative_path.clone())
                }
                _ => debug!("Skipping {} owned by another collection", rel.display()),
            }
        }

        let mut mirror = EntryIndex::new();
        for entry in scanned.entries() {
            let keep = if entry.is_dir() {
                source.contains(&entry.relative_path)
                    || owned_links.iter().any(|p| p.starts_with(&entry.relative_path))
                    || holds_only_dirs(&self.catalog.absolute(&catalog_path(name, &entry.relative_path)))
            } else {
                owned_links.contains(&entry.relative_path)
            };
            if keep {
                mirror.insert(entry.clone())?;
            }
        }
        Ok(mirror)
    }

    fn apply(&mut self, name: &str, base: &Path, changes: &[ChangeRecord], total: usize) -> Result<(), Error> {
        self.reporter.on_apply_start(&format!("Syncing {}", name), total);
        let mut done = 0;

        // Removals run deepest-first so directories are emptied before they go.
        for change in changes.iter().rev() {
            let removing = change.kind == ChangeKind::Deleted || change.kind_changed();
            if let (true, Some(entry)) = (removing, &change.catalog) {
                self.remove_mirrored(&catalog_path(name, &change.relative_path), entry)?;
                if change.kind == ChangeKind::Deleted {
                    done += 1;
                    self.reporter.on_apply_progress(done, total);
                }
            }
        }

        for change in changes {
            let Some(entry) = &change.source else { continue };
            let rel = catalog_path(name, &change.relative_path);
            match change.kind {
                ChangeKind::Added => self.add_mirrored(&rel, base, entry)?,
                ChangeKind::Modified if change.kind_changed() => self.add_mirrored(&rel, base, entry)?,
                ChangeKind::Modified => {
                    if let Some(size) = entry.size {
                        let source_path = base.join(&change.relative_path);
                        self.catalog
                            .record_metadata(&rel, size, entry.modified_time, &source_path)?;
                        debug!("Refreshed {}", rel.display());
                    }
                }
                ChangeKind::Deleted | ChangeKind::Unchanged => continue,
            }
            done += 1;
            self.reporter.on_apply_progress(done, total);
        }

        self.reporter.on_apply_complete(done, 0);
        Ok(())
    }

    fn add_mirrored(&mut self, rel: &Path, base: &Path, entry: &FileEntry) -> Result<(), Error> {
        if entry.is_dir() {
            fs::create_dir_all(self.catalog.absolute(rel))?;
            return Ok(());
        }
        let source_path = base.join(&entry.relative_path);
        if let Some(record) = self.catalog.lookup_metadata(rel)? {
            if !record.source_path.starts_with(base) {
                warn!(
                    "Not replacing {}, it links to {}",
                    rel.display(),
                    record.source_path.display()
                );
                return Ok(());
            }
        }
        self.catalog.create_link(rel, &source_path)?;
        self.catalog.record_metadata(
            rel,
            entry.size.unwrap_or_default(),
            entry.modified_time,
            &source_path,
        )?;
        debug!("Added {}", rel.display());
        Ok(())
    }

    fn remove_mirrored(&mut self, rel: &Path, entry: &FileEntry) -> Result<(), Error> {
        if !entry.is_dir() {
            self.catalog.remove_entry(rel)?;
            debug!("Removed {}", rel.display());
            return Ok(());
        }
        match fs::remove_dir(self.catalog.absolute(rel)) {
            Ok(()) => debug!("Removed directory {}", rel.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Keeping directory {}: {}", rel.display(), e),
        }
        Ok(())
    }
}

fn catalog_path(name: &str, relative: &Path) -> PathBuf {
    Path::new(name).join(relative)
}

/// True when nothing but directories lives below `dir`.
fn holds_only_dirs(dir: &Path) -> bool {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .all(|e| e.file_type().is_dir())
}
