//! Persisted, human-editable decision batches.
//!
//! A detection pass writes a batch next to the directory it examined; the
//! user edits it; a resolution pass loads it, applies it and consumes it.
//! While a batch is pending it also blocks a second detection pass over the
//! same directory.

use crate::catalog::SFS_FILE_EXTENSION;
use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

pub const BATCH_VERSION: u32 = 1;

/// Payload type carried by a [`DecisionBatch`].
pub trait BatchItem: Serialize + DeserializeOwned {
    /// Value of the document's `kind` field.
    const KIND: &'static str;
    /// Middle extension of the file name, e.g. `dedup` in `photos.dedup.sfs`.
    const EXTENSION: &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Consumed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionBatch<T> {
    pub kind: String,
    pub version: u32,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub target: PathBuf,
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

impl<T: BatchItem> DecisionBatch<T> {
    pub fn new(target: &Path, source: Option<&Path>, items: Vec<T>) -> Self {
        DecisionBatch {
            kind: T::KIND.to_string(),
            version: BATCH_VERSION,
            status: BatchStatus::Pending,
            created_at: Utc::now(),
            target: target.to_path_buf(),
            source: source.map(Path::to_path_buf),
            items,
        }
    }

    /// `<dir>/<basename(dir)>.<ext>.sfs`
    pub fn path_for(dir: &Path) -> PathBuf {
        let base = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        dir.join(format!("{}.{}.{}", base, T::EXTENSION, SFS_FILE_EXTENSION))
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::ReportNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let batch: Self =
            serde_json::from_str(&text).map_err(|e| Error::invalid_report(path, e.to_string()))?;
        if batch.kind != T::KIND {
            return Err(Error::invalid_report(
                path,
                format!("expected kind '{}', found '{}'", T::KIND, batch.kind),
            ));
        }
        if batch.version != BATCH_VERSION {
            return Err(Error::invalid_report(
                path,
                format!("unsupported version {}", batch.version),
            ));
        }
        Ok(batch)
    }

    /// Load the batch for `dir`; a consumed batch counts as absent.
    pub fn load_pending(dir: &Path) -> Result<Self, Error> {
        let path = Self::path_for(dir);
        let batch = Self::load(&path)?;
        if batch.status == BatchStatus::Consumed {
            return Err(Error::ReportNotFound(path));
        }
        Ok(batch)
    }

    /// Fail with `ReportExists` when a pending (or unreadable) batch is
    /// already on disk for `dir`, unless `override_existing` is set.
    pub fn ensure_writable(dir: &Path, override_existing: bool) -> Result<(), Error> {
        let path = Self::path_for(dir);
        if override_existing || !path.exists() {
            return Ok(());
        }
        match Self::load(&path) {
            Ok(batch) if batch.status == BatchStatus::Consumed => Ok(()),
            _ => Err(Error::ReportExists(path)),
        }
    }

    /// Write the batch atomically (temp file in the same directory, then rename).
    pub fn save(&self, dir: &Path) -> Result<PathBuf, Error> {
        let path = Self::path_for(dir);
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;
        debug!("Wrote {} ({} items)", path.display(), self.items.len());
        Ok(path)
    }

    pub fn mark_consumed(&mut self) {
        self.status = BatchStatus::Consumed;
        self.items.clear();
    }

    /// Consume the batch after a successful resolution: delete the file when
    /// `delete` is set, otherwise rewrite it as consumed.
    pub fn finish(mut self, dir: &Path, delete: bool) -> Result<(), Error> {
        if delete {
            return Self::discard(dir);
        }
        self.mark_consumed();
        self.save(dir)?;
        Ok(())
    }

    /// Remove the batch file for `dir` if there is one.
    pub fn discard(dir: &Path) -> Result<(), Error> {
        let path = Self::path_for(dir);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
