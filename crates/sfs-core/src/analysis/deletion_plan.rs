use super::duplicates::DuplicateReport;
use crate::catalog::Catalog;
use crate::error::Error;
use crate::platform;
use crate::progress::{ProgressReporter, SilentReporter};
use crate::storage::MetadataStore;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// What a dedup run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupOutcome {
    pub deleted: usize,
    /// Marked entries that were already gone.
    pub skipped_missing: usize,
    pub failed: usize,
    /// Groups left alone because none of their unmarked members still exist.
    pub groups_skipped: usize,
}

/// Applies an edited duplicate report: removes the marked links and their
/// metadata, nothing else.
pub struct DuplicateResolver<'c, S: MetadataStore> {
    catalog: &'c mut Catalog<S>,
    reporter: &'c dyn ProgressReporter,
}

impl<'c, S: MetadataStore> DuplicateResolver<'c, S> {
    pub fn new(catalog: &'c mut Catalog<S>) -> Self {
        DuplicateResolver {
            catalog,
            reporter: &SilentReporter,
        }
    }

    pub fn with_reporter(mut self, reporter: &'c dyn ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Load the pending report in `dir` and delete its marked entries.
    ///
    /// Every group is validated before anything is deleted. Stale entries are
    /// skipped. The report is consumed only when no deletion failed.
    pub fn resolve(&mut self, dir: &Path, del_json: bool) -> Result<DedupOutcome, Error> {
        let report = DuplicateReport::load_pending(dir)?;
        let report_path = DuplicateReport::path_for(dir);
        for group in &report.items {
            group
                .validate()
                .map_err(|reason| Error::invalid_report(&report_path, format!("group {}: {}", group.signature, reason)))?;
        }

        let total: usize = report.items.iter().map(|g| g.marked_for_deletion.len()).sum();
        self.reporter.on_apply_start("Removing duplicates", total);
        let mut outcome = DedupOutcome::default();
        let mut done = 0;

        for group in &report.items {
            let has_survivor = group
                .survivors()
                .any(|m| platform::exists_no_follow(&dir.join(&m.relative_path)));
            if !has_survivor {
                warn!(
                    "Skipping group {}: none of its kept members exist any more",
                    group.signature
                );
                outcome.groups_skipped += 1;
                done += group.marked_for_deletion.len();
                self.reporter.on_apply_progress(done, total);
                continue;
            }

            for marked in &group.marked_for_deletion {
                let path = dir.join(marked);
                match self.delete_marked(&path) {
                    Ok(true) => outcome.deleted += 1,
                    Ok(false) => outcome.skipped_missing += 1,
                    Err(e) => {
                        error!("Failed to remove {}: {}", path.display(), e);
                        outcome.failed += 1;
                    }
                }
                done += 1;
                self.reporter.on_apply_progress(done, total);
            }
        }
        self.reporter.on_apply_complete(outcome.deleted, outcome.failed);

        if outcome.failed == 0 {
            report.finish(dir, del_json)?;
        } else {
            warn!(
                "{} deletions failed; keeping {} pending",
                outcome.failed,
                report_path.display()
            );
        }
        info!(
            "Dedup of {}: {} deleted, {} already gone, {} failed, {} groups skipped",
            dir.display(),
            outcome.deleted,
            outcome.skipped_missing,
            outcome.failed,
            outcome.groups_skipped
        );
        Ok(outcome)
    }

    /// `Ok(false)` when there was nothing left to delete.
    fn delete_marked(&mut self, path: &Path) -> Result<bool, Error> {
        if !platform::exists_no_follow(path) {
            warn!("Marked entry {} no longer exists, skipping", path.display());
            return Ok(false);
        }
        if !platform::is_symlink(path) {
            return Err(Error::Other(format!(
                "{} is not a catalog link",
                path.display()
            )));
        }
        let rel = self.catalog.relative(path)?;
        self.catalog.remove_entry(&rel)?;
        debug!("Deleted duplicate {}", rel.display());
        Ok(true)
    }
}
