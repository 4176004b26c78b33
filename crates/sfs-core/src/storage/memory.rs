use super::models::{CollectionRecord, FileRecord};
use super::{is_under, key_to_path, path_key, MetadataStore};
use crate::error::Error;
use std::collections::BTreeMap;
use std::path::Path;

/// In-memory store with the same semantics as [`super::SqliteStore`].
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: BTreeMap<String, FileRecord>,
    collections: BTreeMap<String, CollectionRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

impl MetadataStore for MemoryStore {
    fn upsert_record(&mut self, record: &FileRecord) -> Result<(), Error> {
        self.records.insert(path_key(&record.path), record.clone());
        Ok(())
    }

    fn get_record(&self, path: &Path) -> Result<Option<FileRecord>, Error> {
        Ok(self.records.get(&path_key(path)).cloned())
    }

    fn delete_record(&mut self, path: &Path) -> Result<bool, Error> {
        Ok(self.records.remove(&path_key(path)).is_some())
    }

    fn relocate_record(&mut self, from: &Path, to: &Path) -> Result<bool, Error> {
        let to_key = path_key(to);
        self.records.remove(&to_key);
        match self.records.remove(&path_key(from)) {
            Some(mut record) => {
                record.path = key_to_path(&to_key);
                self.records.insert(to_key, record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn records_under(&self, prefix: &Path) -> Result<Vec<FileRecord>, Error> {
        let prefix = path_key(prefix);
        Ok(self
            .records
            .iter()
            .filter(|(key, _)| is_under(key, &prefix))
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn insert_collection(&mut self, collection: &CollectionRecord) -> Result<(), Error> {
        if self.collections.contains_key(&collection.name) {
            return Err(Error::CollectionExists(collection.name.clone()));
        }
        self.collections
            .insert(collection.name.clone(), collection.clone());
        Ok(())
    }

    fn get_collection(&self, name: &str) -> Result<Option<CollectionRecord>, Error> {
        Ok(self.collections.get(name).cloned())
    }

    fn list_collections(&self) -> Result<Vec<CollectionRecord>, Error> {
        Ok(self.collections.values().cloned().collect())
    }

    fn delete_collection(&mut self, name: &str) -> Result<bool, Error> {
        Ok(self.collections.remove(name).is_some())
    }
}
