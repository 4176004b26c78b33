use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An unreadable path was hit while walking a tree.
    #[error("Failed to scan {}: {reason}", path.display())]
    Scan { path: PathBuf, reason: String },

    #[error("Symlink cycle at {} (loops back to {})", path.display(), ancestor.display())]
    SymlinkCycle { path: PathBuf, ancestor: PathBuf },

    #[error("Collection source {} is unavailable (unmounted or missing)", .0.display())]
    SourceUnavailable(PathBuf),

    #[error("{} already exists. Use the override flag or delete it in order to proceed", .0.display())]
    ReportExists(PathBuf),

    #[error("No pending report found at {}", .0.display())]
    ReportNotFound(PathBuf),

    #[error("Invalid report {}: {reason}", path.display())]
    InvalidReport { path: PathBuf, reason: String },

    #[error("Invalid merge targets: {0}")]
    InvalidMergeTargets(String),

    #[error("No collection named '{0}'")]
    UnknownCollection(String),

    #[error("A collection named '{0}' already exists")]
    CollectionExists(String),

    #[error("{} is not inside a catalog", .0.display())]
    NotInCatalog(PathBuf),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn invalid_report(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidReport {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
