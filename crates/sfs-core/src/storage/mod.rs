pub mod memory;
pub mod models;
pub mod queries;
pub mod sqlite;

pub use memory::MemoryStore;
pub use models::{CollectionRecord, FileRecord};
pub use sqlite::SqliteStore;

use crate::error::Error;
use std::path::{Component, Path, PathBuf};

/// Record store behind a catalog. The catalog owns its store exclusively for
/// the duration of a command.
pub trait MetadataStore {
    /// Insert or replace the record at `record.path`.
    fn upsert_record(&mut self, record: &FileRecord) -> Result<(), Error>;
    fn get_record(&self, path: &Path) -> Result<Option<FileRecord>, Error>;
    /// Returns whether a record was removed.
    fn delete_record(&mut self, path: &Path) -> Result<bool, Error>;
    /// Move the record at `from` to `to`, replacing whatever was recorded at `to`.
    fn relocate_record(&mut self, from: &Path, to: &Path) -> Result<bool, Error>;
    /// All records at or below `prefix`; an empty prefix returns everything.
    fn records_under(&self, prefix: &Path) -> Result<Vec<FileRecord>, Error>;

    fn insert_collection(&mut self, collection: &CollectionRecord) -> Result<(), Error>;
    fn get_collection(&self, name: &str) -> Result<Option<CollectionRecord>, Error>;
    fn list_collections(&self) -> Result<Vec<CollectionRecord>, Error>;
    fn delete_collection(&mut self, name: &str) -> Result<bool, Error>;
}

/// Normalized store key for a relative path: `/`-joined normal components.
pub fn path_key(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

pub fn key_to_path(key: &str) -> PathBuf {
    key.split('/').filter(|p| !p.is_empty()).collect()
}

pub(crate) fn is_under(key: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || key == prefix
        || (key.len() > prefix.len() && key.starts_with(prefix) && key.as_bytes()[prefix.len()] == b'/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_key_normalizes_separators() {
        assert_eq!(path_key(Path::new("a/b/c.txt")), "a/b/c.txt");
        assert_eq!(path_key(Path::new("./a//b/")), "a/b");
        assert_eq!(path_key(Path::new("")), "");
        assert_eq!(key_to_path("a/b"), PathBuf::from("a").join("b"));
    }

    #[test]
    fn test_is_under_respects_component_boundaries() {
        assert!(is_under("photos/a.jpg", "photos"));
        assert!(is_under("photos", "photos"));
        assert!(is_under("anything", ""));
        assert!(!is_under("photos2/a.jpg", "photos"));
        assert!(!is_under("photo", "photos"));
    }
}
