use chrono::{TimeZone, Utc};
use std::path::{Path, PathBuf};
use tempfile::tempdir;

use sfs_core::storage::{CollectionRecord, FileRecord, MemoryStore, MetadataStore, SqliteStore};
use sfs_core::Error;

fn record(path: &str, size: u64) -> FileRecord {
    FileRecord {
        path: PathBuf::from(path),
        size,
        modified: Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap(),
        source_path: PathBuf::from("/media/disk").join(path),
    }
}

fn collection(name: &str) -> CollectionRecord {
    CollectionRecord {
        name: name.to_string(),
        base: PathBuf::from("/media").join(name),
        added_at: Utc.timestamp_opt(1_700_000_000, 42).unwrap(),
    }
}

/// Behaviour every store must share.
fn exercise_records(store: &mut dyn MetadataStore) {
    store.upsert_record(&record("photos/a.jpg", 10)).unwrap();
    store.upsert_record(&record("photos/sub/b.jpg", 20)).unwrap();
    store.upsert_record(&record("photos2/c.jpg", 30)).unwrap();

    let a = store.get_record(Path::new("photos/a.jpg")).unwrap().unwrap();
    assert_eq!(a, record("photos/a.jpg", 10));

    // Upsert replaces in place.
    store.upsert_record(&record("photos/a.jpg", 11)).unwrap();
    assert_eq!(
        store.get_record(Path::new("photos/a.jpg")).unwrap().unwrap().size,
        11
    );

    let under: Vec<_> = store
        .records_under(Path::new("photos"))
        .unwrap()
        .into_iter()
        .map(|r| r.path)
        .collect();
    assert_eq!(
        under,
        vec![PathBuf::from("photos/a.jpg"), PathBuf::from("photos/sub/b.jpg")]
    );
    assert_eq!(store.records_under(Path::new("")).unwrap().len(), 3);

    // Relocation replaces whatever sat at the destination.
    assert!(store
        .relocate_record(Path::new("photos/a.jpg"), Path::new("photos2/c.jpg"))
        .unwrap());
    let moved = store.get_record(Path::new("photos2/c.jpg")).unwrap().unwrap();
    assert_eq!(moved.size, 11);
    assert_eq!(moved.path, PathBuf::from("photos2/c.jpg"));
    assert!(store.get_record(Path::new("photos/a.jpg")).unwrap().is_none());
    assert!(!store
        .relocate_record(Path::new("nope"), Path::new("elsewhere"))
        .unwrap());

    assert!(store.delete_record(Path::new("photos/sub/b.jpg")).unwrap());
    assert!(!store.delete_record(Path::new("photos/sub/b.jpg")).unwrap());
}

fn exercise_collections(store: &mut dyn MetadataStore) {
    store.insert_collection(&collection("photos")).unwrap();
    store.insert_collection(&collection("music")).unwrap();
    assert!(matches!(
        store.insert_collection(&collection("photos")),
        Err(Error::CollectionExists(_))
    ));

    let names: Vec<_> = store
        .list_collections()
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["music".to_string(), "photos".to_string()]);
    assert_eq!(
        store.get_collection("photos").unwrap(),
        Some(collection("photos"))
    );

    assert!(store.delete_collection("photos").unwrap());
    assert!(store.get_collection("photos").unwrap().is_none());
    assert!(!store.delete_collection("photos").unwrap());
}

#[test]
fn test_sqlite_record_semantics() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    exercise_records(&mut store);
}

#[test]
fn test_memory_record_semantics() {
    let mut store = MemoryStore::new();
    exercise_records(&mut store);
}

#[test]
fn test_sqlite_collection_semantics() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    exercise_collections(&mut store);
}

#[test]
fn test_memory_collection_semantics() {
    let mut store = MemoryStore::new();
    exercise_collections(&mut store);
}

#[test]
fn test_sqlite_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("catalog.db");
    {
        let mut store = SqliteStore::open(&db_path).unwrap();
        store.upsert_record(&record("a/b.txt", 5)).unwrap();
        store.insert_collection(&collection("a")).unwrap();
    }

    let store = SqliteStore::open(&db_path).unwrap();
    let version: i64 = store
        .connection()
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, 1);
    // Nanosecond timestamps survive the round trip exactly.
    assert_eq!(
        store.get_record(Path::new("a/b.txt")).unwrap(),
        Some(record("a/b.txt", 5))
    );
    assert_eq!(store.list_collections().unwrap().len(), 1);
}
