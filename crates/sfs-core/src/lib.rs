pub mod analysis;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod error;
pub mod merge;
pub mod platform;
pub mod progress;
pub mod reconcile;
pub mod scanner;
pub mod storage;

pub use analysis::{DedupOutcome, DuplicateFinder, DuplicateReport, DuplicateResolver};
pub use batch::{BatchItem, BatchStatus, DecisionBatch};
pub use catalog::Catalog;
pub use config::AppConfig;
pub use error::Error;
pub use merge::{ConflictManifest, ConflictPolicy, MergeEngine, MergeOptions, MergeResult, MergeState, MergeStats};
pub use progress::{ProgressReporter, SilentReporter};
pub use reconcile::{ChangeKind, ChangeRecord, ReconcileSummary, Reconciler};
pub use storage::{MemoryStore, MetadataStore, SqliteStore};
