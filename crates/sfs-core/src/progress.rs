/// Trait for reporting progress of scans and apply passes.
///
/// CLI implements with indicatif. All methods have default no-op implementations.
pub trait ProgressReporter {
    fn on_scan_start(&self, _root: &str) {}
    fn on_scan_progress(&self, _entries_found: usize) {}
    fn on_scan_complete(&self, _total_entries: usize, _duration_secs: f64) {}
    fn on_apply_start(&self, _label: &str, _total: usize) {}
    fn on_apply_progress(&self, _done: usize, _total: usize) {}
    fn on_apply_complete(&self, _applied: usize, _failed: usize) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
