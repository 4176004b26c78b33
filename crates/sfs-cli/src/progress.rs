use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use sfs_core::ProgressReporter;
use std::sync::Mutex;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// indicatif-backed reporter.
///
/// - Scans: spinner (entry count unknown upfront)
/// - Apply passes: bar over the number of changes
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_scan_start(&self, root: &str) {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars(TICK_CHARS);
        pb.set_style(style);
        pb.set_message(format!("Scanning {}...", root));
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_scan_progress(&self, entries_found: usize) {
        self.with_bar(|pb| pb.set_message(format!("Scanning... {} entries found", entries_found)));
    }

    fn on_scan_complete(&self, total_entries: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  {} Scan complete: {} entries in {:.2}s",
            "✓".green(),
            total_entries,
            duration_secs
        );
    }

    fn on_apply_start(&self, label: &str, total: usize) {
        if total == 0 {
            return;
        }
        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template("  {spinner:.cyan} {msg} [{bar:30.cyan/dim}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
            .tick_chars(TICK_CHARS);
        pb.set_style(style);
        pb.set_message(label.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_apply_progress(&self, done: usize, total: usize) {
        self.with_bar(|pb| {
            if pb.length() != Some(total as u64) {
                pb.set_length(total as u64);
            }
            pb.set_position(done as u64);
        });
    }

    fn on_apply_complete(&self, applied: usize, failed: usize) {
        self.finish_bar();
        if applied == 0 && failed == 0 {
            return;
        }
        if failed == 0 {
            eprintln!("  {} {} applied", "✓".green(), applied);
        } else {
            eprintln!(
                "  {} {} applied, {} failed",
                "✗".red(),
                applied,
                failed
            );
        }
    }
}
