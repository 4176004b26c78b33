//! Merging one catalog subtree into another.
//!
//! A merge is a small state machine. Entries that exist only in the source
//! are moved straight away; entries that exist on both sides with different
//! content become conflicts. Conflicts are either written to a manifest for
//! the user to edit (the run then stops) or resolved and applied one at a
//! time, with the manifest rewritten after each so an interrupted run can be
//! resumed with `--json`.

pub mod conflict;

pub use conflict::{is_identical, Conflict, ConflictManifest, ConflictPolicy, EntryDescriptor, Resolution};

use crate::catalog::Catalog;
use crate::error::Error;
use crate::platform;
use crate::progress::{ProgressReporter, SilentReporter};
use crate::scanner::{EntryIndex, EntryKind};
use crate::storage::{path_key, MetadataStore};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Resolve conflicts in this run instead of stopping at a manifest.
    pub continue_merge: bool,
    /// Resolution for conflicts nobody decided on, used with `continue_merge`.
    pub on_conflict: ConflictPolicy,
    /// Resume from the manifest in the target directory.
    pub use_json: bool,
    pub override_existing: bool,
    pub del_json: bool,
    pub del_source: bool,
    /// Inserted before the extension when `keep-both` renames an entry.
    pub keep_both_marker: String,
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptions {
            continue_merge: false,
            on_conflict: ConflictPolicy::default(),
            use_json: false,
            override_existing: false,
            del_json: false,
            del_source: false,
            keep_both_marker: "merged".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum MergeState {
    Scanning,
    Diffing {
        target: EntryIndex,
        source: EntryIndex,
    },
    ConflictsFound {
        conflicts: Vec<Conflict>,
    },
    Resolving {
        manifest: ConflictManifest,
    },
    Cleanup {
        manifest: Option<ConflictManifest>,
    },
    Completed,
    AwaitingResolution {
        manifest_path: PathBuf,
        remaining: usize,
    },
}

impl MergeState {
    pub fn name(&self) -> &'static str {
        match self {
            MergeState::Scanning => "scanning",
            MergeState::Diffing { .. } => "diffing",
            MergeState::ConflictsFound { .. } => "conflicts-found",
            MergeState::Resolving { .. } => "resolving",
            MergeState::Cleanup { .. } => "cleanup",
            MergeState::Completed => "completed",
            MergeState::AwaitingResolution { .. } => "awaiting-resolution",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MergeState::Completed | MergeState::AwaitingResolution { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Link records moved into the target without conflict.
    pub moved: usize,
    /// Source entries dropped because the target already had them.
    pub identical: usize,
    pub conflicts: usize,
    pub kept_target: usize,
    pub kept_source: usize,
    pub kept_both: usize,
    pub failed: usize,
    pub source_deleted: bool,
}

impl MergeStats {
    pub fn resolved(&self) -> usize {
        self.kept_target + self.kept_source + self.kept_both
    }
}

#[derive(Debug)]
pub struct MergeResult {
    /// `Completed` or `AwaitingResolution`.
    pub state: MergeState,
    pub stats: MergeStats,
}

impl MergeResult {
    pub fn is_completed(&self) -> bool {
        matches!(self.state, MergeState::Completed)
    }

    pub fn manifest_path(&self) -> Option<&Path> {
        match &self.state {
            MergeState::AwaitingResolution { manifest_path, .. } => Some(manifest_path),
            _ => None,
        }
    }
}

/// Absolute and catalog-relative roots of one merge.
struct MergeRoots {
    target: PathBuf,
    source: PathBuf,
    target_rel: PathBuf,
    source_rel: PathBuf,
}

pub struct MergeEngine<'c, S: MetadataStore> {
    catalog: &'c mut Catalog<S>,
    reporter: &'c dyn ProgressReporter,
}

impl<'c, S: MetadataStore> MergeEngine<'c, S> {
    pub fn new(catalog: &'c mut Catalog<S>) -> Self {
        MergeEngine {
            catalog,
            reporter: &SilentReporter,
        }
    }

    pub fn with_reporter(mut self, reporter: &'c dyn ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Merge `source` into `target`. Both must be distinct, non-nested
    /// directories inside the catalog.
    pub fn merge(&mut self, target: &Path, source: &Path, options: &MergeOptions) -> Result<MergeResult, Error> {
        let roots = self.validate_targets(target, source)?;

        let mut resumed = if options.use_json {
            Some(self.load_manifest(&roots)?)
        } else {
            None
        };

        let mut stats = MergeStats::default();
        let mut state = MergeState::Scanning;
        while !state.is_terminal() {
            debug!("Merge state: {}", state.name());
            state = match state {
                MergeState::Scanning => {
                    let target = self.scan(&roots.target)?;
                    let source = self.scan(&roots.source)?;
                    MergeState::Diffing { target, source }
                }
                MergeState::Diffing { target, source } => {
                    // A manifest will be written, so a pending one has to be
                    // settled before anything moves.
                    if resumed.is_none() && has_conflicts(&target, &source) {
                        ConflictManifest::ensure_writable(&roots.target, options.override_existing)?;
                    }
                    let conflicts = self.apply_moves(&roots, &target, &source, &mut stats)?;
                    stats.conflicts = conflicts.len();
                    if let Some(manifest) = resumed.take() {
                        MergeState::Resolving {
                            manifest: fold_into_manifest(manifest, conflicts, options),
                        }
                    } else if conflicts.is_empty() {
                        MergeState::Cleanup { manifest: None }
                    } else if options.continue_merge {
                        let policy = options.on_conflict.resolution();
                        let conflicts: Vec<Conflict> = conflicts
                            .into_iter()
                            .map(|mut c| {
                                c.resolution = policy;
                                c
                            })
                            .collect();
                        let manifest = ConflictManifest::new(&roots.target, Some(roots.source.as_path()), conflicts);
                        manifest.save(&roots.target)?;
                        MergeState::Resolving { manifest }
                    } else {
                        MergeState::ConflictsFound { conflicts }
                    }
                }
                MergeState::ConflictsFound { conflicts } => {
                    let remaining = conflicts.len();
                    let manifest = ConflictManifest::new(&roots.target, Some(roots.source.as_path()), conflicts);
                    let manifest_path = manifest.save(&roots.target)?;
                    info!(
                        "{} conflicts written to {}; edit it and rerun with --json",
                        remaining,
                        manifest_path.display()
                    );
                    MergeState::AwaitingResolution {
                        manifest_path,
                        remaining,
                    }
                }
                MergeState::Resolving { mut manifest } => {
                    self.apply_resolutions(&roots, &mut manifest, options, &mut stats)?;
                    if manifest.items.is_empty() {
                        MergeState::Cleanup {
                            manifest: Some(manifest),
                        }
                    } else {
                        let manifest_path = manifest.save(&roots.target)?;
                        let remaining = manifest.items.len();
                        info!(
                            "{} conflicts remain in {}",
                            remaining,
                            manifest_path.display()
                        );
                        MergeState::AwaitingResolution {
                            manifest_path,
                            remaining,
                        }
                    }
                }
                MergeState::Cleanup { manifest } => {
                    if let Some(manifest) = manifest {
                        manifest.finish(&roots.target, options.del_json)?;
                    }
                    if options.del_source && stats.failed == 0 {
                        let removed = self.catalog.remove_subtree(&roots.source_rel)?;
                        stats.source_deleted = true;
                        info!(
                            "Deleted merged source {} ({} leftover links)",
                            roots.source.display(),
                            removed
                        );
                    }
                    MergeState::Completed
                }
                terminal => terminal,
            };
        }

        info!(
            "Merge of {} into {}: {} moved, {} identical, {} conflicts, {} resolved, {} failed",
            roots.source.display(),
            roots.target.display(),
            stats.moved,
            stats.identical,
            stats.conflicts,
            stats.resolved(),
            stats.failed
        );
        Ok(MergeResult { state, stats })
    }

    fn validate_targets(&self, target: &Path, source: &Path) -> Result<MergeRoots, Error> {
        let target = self.merge_root(target)?;
        let source = self.merge_root(source)?;
        if target == source {
            return Err(Error::InvalidMergeTargets(format!(
                "cannot merge {} into itself",
                target.display()
            )));
        }
        if target.starts_with(&source) || source.starts_with(&target) {
            return Err(Error::InvalidMergeTargets(format!(
                "{} and {} are nested",
                target.display(),
                source.display()
            )));
        }
        Ok(MergeRoots {
            target_rel: self.catalog.relative(&target)?,
            source_rel: self.catalog.relative(&source)?,
            target,
            source,
        })
    }

    fn merge_root(&self, path: &Path) -> Result<PathBuf, Error> {
        let abs = fs::canonicalize(path).map_err(|_| {
            Error::InvalidMergeTargets(format!("{} does not exist", path.display()))
        })?;
        if !abs.is_dir() {
            return Err(Error::InvalidMergeTargets(format!(
                "{} is not a directory",
                abs.display()
            )));
        }
        if !self.catalog.contains(&abs) || abs.starts_with(self.catalog.metadata_dir()) {
            return Err(Error::InvalidMergeTargets(format!(
                "{} is not a catalog directory",
                abs.display()
            )));
        }
        Ok(abs)
    }

    fn load_manifest(&self, roots: &MergeRoots) -> Result<ConflictManifest, Error> {
        let manifest = ConflictManifest::load_pending(&roots.target)?;
        if manifest.target != roots.target || manifest.source.as_deref() != Some(roots.source.as_path()) {
            return Err(Error::invalid_report(
                ConflictManifest::path_for(&roots.target),
                format!(
                    "manifest belongs to a different merge ({} into {})",
                    manifest
                        .source
                        .as_deref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                    manifest.target.display()
                ),
            ));
        }
        Ok(manifest)
    }

    fn scan(&self, root: &Path) -> Result<EntryIndex, Error> {
        self.reporter.on_scan_start(&root.to_string_lossy());
        EntryIndex::from_scan_with_progress(self.catalog.scanner().scan(root), self.reporter)
    }

    /// Move every source-only entry into the target and drop source entries
    /// the target already has. Returns what is left: the conflicts.
    fn apply_moves(
        &mut self,
        roots: &MergeRoots,
        target: &EntryIndex,
        source: &EntryIndex,
        stats: &mut MergeStats,
    ) -> Result<Vec<Conflict>, Error> {
        let mut conflicts = Vec::new();
        // Descendants of a moved or conflicting source directory are handled
        // with it.
        let mut covered: Option<PathBuf> = None;

        for change in source.diff(target) {
            let rel = &change.relative_path;
            if let Some(prefix) = &covered {
                if rel.starts_with(prefix) {
                    continue;
                }
                covered = None;
            }
            let from = roots.source_rel.join(rel);
            let to = roots.target_rel.join(rel);

            match (&change.source, &change.catalog) {
                (Some(src), None) if src.is_dir() => {
                    stats.moved += self.catalog.relocate_subtree(&from, &to)?;
                    covered = Some(rel.clone());
                }
                (Some(_), None) => {
                    self.catalog.relocate(&from, &to)?;
                    stats.moved += 1;
                }
                (Some(src), Some(tgt)) if src.is_dir() && tgt.is_dir() => {}
                (Some(src), Some(tgt)) if is_identical(tgt, src) => {
                    self.catalog.remove_entry(&from)?;
                    stats.identical += 1;
                    debug!("{} already present in target", rel.display());
                }
                (Some(src), Some(tgt)) => {
                    if src.is_dir() {
                        covered = Some(rel.clone());
                    }
                    debug!("Conflict at {}", rel.display());
                    conflicts.push(Conflict::new(
                        rel,
                        EntryDescriptor::new(&roots.target, tgt),
                        EntryDescriptor::new(&roots.source, src),
                    ));
                }
                _ => {}
            }
        }
        Ok(conflicts)
    }

    /// Apply every decided conflict. Each success is removed from the
    /// manifest and the manifest is saved; failures stay for the next run.
    fn apply_resolutions(
        &mut self,
        roots: &MergeRoots,
        manifest: &mut ConflictManifest,
        options: &MergeOptions,
        stats: &mut MergeStats,
    ) -> Result<(), Error> {
        let decided: Vec<Conflict> = manifest.items.iter().filter(|c| c.is_resolved()).cloned().collect();
        self.reporter.on_apply_start("Resolving conflicts", decided.len());

        for (done, conflict) in decided.iter().enumerate() {
            match self.apply_resolution(roots, conflict, &options.keep_both_marker) {
                Ok(()) => {
                    match conflict.resolution {
                        Resolution::KeepTarget => stats.kept_target += 1,
                        Resolution::KeepSource => stats.kept_source += 1,
                        Resolution::KeepBoth => stats.kept_both += 1,
                        Resolution::Unresolved => {}
                    }
                    manifest.items.retain(|c| c.relative_path != conflict.relative_path);
                    manifest.save(&roots.target)?;
                }
                Err(e) => {
                    error!(
                        "Failed to resolve {}: {}",
                        conflict.relative_path.display(),
                        e
                    );
                    stats.failed += 1;
                }
            }
            self.reporter.on_apply_progress(done + 1, decided.len());
        }
        self.reporter.on_apply_complete(stats.resolved(), stats.failed);
        Ok(())
    }

    fn apply_resolution(&mut self, roots: &MergeRoots, conflict: &Conflict, marker: &str) -> Result<(), Error> {
        let from = roots.source_rel.join(&conflict.relative_path);
        let to = roots.target_rel.join(&conflict.relative_path);
        match conflict.resolution {
            Resolution::Unresolved => Ok(()),
            Resolution::KeepTarget => self.discard(&from, conflict.source.kind),
            Resolution::KeepSource => {
                self.ensure_replaceable(&from, &to, conflict.target.kind)?;
                // A link moved over a link replaces it in place.
                if conflict.target.kind == EntryKind::Directory || conflict.source.kind == EntryKind::Directory {
                    self.discard(&to, conflict.target.kind)?;
                }
                self.move_entry(&from, &to, conflict.source.kind)
            }
            Resolution::KeepBoth => {
                let renamed = self.free_name(&to, marker)?;
                debug!("Keeping both: {} -> {}", from.display(), renamed.display());
                self.move_entry(&from, &renamed, conflict.source.kind)
            }
        }
    }

    /// Fail unless `from` is still there and everything at `to` belongs to
    /// the catalog, so that keeping the source cannot stop half way.
    fn ensure_replaceable(&self, from: &Path, to: &Path, kind: EntryKind) -> Result<(), Error> {
        let source = self.catalog.absolute(from);
        if !platform::exists_no_follow(&source) {
            return Err(Error::Other(format!("{} no longer exists", source.display())));
        }
        let target = self.catalog.absolute(to);
        let blocker = match kind {
            EntryKind::File => {
                if platform::exists_no_follow(&target) && !platform::is_symlink(&target) {
                    Some(target)
                } else {
                    None
                }
            }
            EntryKind::Directory => {
                let mut blocker = None;
                for entry in WalkDir::new(&target) {
                    let entry = entry.map_err(io::Error::from)?;
                    if !entry.file_type().is_dir() && !self.catalog.is_managed_link(entry.path()) {
                        blocker = Some(entry.into_path());
                        break;
                    }
                }
                blocker
            }
        };
        match blocker {
            Some(path) => Err(Error::Other(format!(
                "{} is not managed by the catalog and would be left in the way",
                path.display()
            ))),
            None => Ok(()),
        }
    }

    fn discard(&mut self, rel: &Path, kind: EntryKind) -> Result<(), Error> {
        match kind {
            EntryKind::Directory => self.catalog.remove_subtree(rel).map(|_| ()),
            EntryKind::File => self.catalog.remove_entry(rel).map(|_| ()),
        }
    }

    fn move_entry(&mut self, from: &Path, to: &Path, kind: EntryKind) -> Result<(), Error> {
        match kind {
            EntryKind::Directory => self.catalog.relocate_subtree(from, to).map(|_| ()),
            EntryKind::File => self.catalog.relocate(from, to),
        }
    }

    /// First of `<stem>.<marker><ext>`, `<stem>.<marker>-2<ext>`, ... that is
    /// neither on disk nor recorded.
    fn free_name(&self, rel: &Path, marker: &str) -> Result<PathBuf, Error> {
        let stem = rel
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = rel
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let parent = rel.parent().unwrap_or_else(|| Path::new(""));
        let mut n = 1;
        loop {
            let name = if n == 1 {
                format!("{}.{}{}", stem, marker, ext)
            } else {
                format!("{}.{}-{}{}", stem, marker, n, ext)
            };
            let candidate = parent.join(name);
            if !platform::exists_no_follow(&self.catalog.absolute(&candidate))
                && self.catalog.lookup_metadata(&candidate)?.is_none()
            {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

/// Whether any path on both sides differs in a way a merge cannot settle
/// by itself.
fn has_conflicts(target: &EntryIndex, source: &EntryIndex) -> bool {
    source.diff(target).iter().any(|change| match (&change.source, &change.catalog) {
        (Some(src), Some(tgt)) => !(src.is_dir() && tgt.is_dir()) && !is_identical(tgt, src),
        _ => false,
    })
}

/// Carry decisions from a resumed manifest over to the conflicts detected
/// now. Entries no longer in conflict are dropped; new ones are appended.
fn fold_into_manifest(mut manifest: ConflictManifest, detected: Vec<Conflict>, options: &MergeOptions) -> ConflictManifest {
    let decided: HashMap<String, Resolution> = manifest
        .items
        .iter()
        .map(|c| (path_key(&c.relative_path), c.resolution))
        .collect();
    let current: HashSet<String> = detected.iter().map(|c| path_key(&c.relative_path)).collect();
    for stale in manifest
        .items
        .iter()
        .filter(|c| !current.contains(&path_key(&c.relative_path)))
    {
        warn!(
            "Dropping {} from the manifest: no longer in conflict",
            stale.relative_path.display()
        );
    }

    manifest.items = detected
        .into_iter()
        .map(|mut conflict| {
            let resolution = decided
                .get(&path_key(&conflict.relative_path))
                .copied()
                .unwrap_or_default();
            conflict.resolution = match resolution {
                Resolution::Unresolved if options.continue_merge => options.on_conflict.resolution(),
                other => other,
            };
            conflict
        })
        .collect();
    manifest
}
