use super::models::*;
use super::sqlite::SqliteStore;
use super::{key_to_path, path_key, MetadataStore};
use crate::error::Error;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, ErrorCode, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::debug;

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn file_record_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let path: String = row.get(0)?;
    let size: i64 = row.get(1)?;
    let source_path: String = row.get(3)?;
    Ok(FileRecord {
        path: key_to_path(&path),
        size: size as u64,
        modified: parse_time(2, row.get(2)?)?,
        source_path: PathBuf::from(source_path),
    })
}

fn collection_from_row(row: &Row<'_>) -> rusqlite::Result<CollectionRecord> {
    let base: String = row.get(1)?;
    Ok(CollectionRecord {
        name: row.get(0)?,
        base: PathBuf::from(base),
        added_at: parse_time(2, row.get(2)?)?,
    })
}

impl MetadataStore for SqliteStore {
    // ── File records ─────────────────────────────────────────────

    fn upsert_record(&mut self, record: &FileRecord) -> Result<(), Error> {
        self.connection().execute(
            "INSERT INTO file_record (path, size, modified, source_path) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(path) DO UPDATE SET \
             size = excluded.size, modified = excluded.modified, source_path = excluded.source_path",
            params![
                path_key(&record.path),
                record.size as i64,
                format_time(&record.modified),
                record.source_path.to_string_lossy(),
            ],
        )?;
        Ok(())
    }

    fn get_record(&self, path: &Path) -> Result<Option<FileRecord>, Error> {
        let record = self
            .connection()
            .query_row(
                "SELECT path, size, modified, source_path FROM file_record WHERE path = ?1",
                params![path_key(path)],
                file_record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn delete_record(&mut self, path: &Path) -> Result<bool, Error> {
        let removed = self
            .connection()
            .execute("DELETE FROM file_record WHERE path = ?1", params![path_key(path)])?;
        Ok(removed > 0)
    }

    fn relocate_record(&mut self, from: &Path, to: &Path) -> Result<bool, Error> {
        let (from, to) = (path_key(from), path_key(to));
        let tx = self.connection_mut().transaction()?;
        tx.execute("DELETE FROM file_record WHERE path = ?1", params![to])?;
        let moved = tx.execute(
            "UPDATE file_record SET path = ?2 WHERE path = ?1",
            params![from, to],
        )?;
        tx.commit()?;
        debug!("Relocated record {} -> {} ({} row)", from, to, moved);
        Ok(moved > 0)
    }

    fn records_under(&self, prefix: &Path) -> Result<Vec<FileRecord>, Error> {
        let prefix = path_key(prefix);
        let mut stmt = self.connection().prepare(
            "SELECT path, size, modified, source_path FROM file_record \
             WHERE ?1 = '' OR path = ?1 OR substr(path, 1, length(?1) + 1) = ?1 || '/' \
             ORDER BY path",
        )?;
        let records = stmt
            .query_map(params![prefix], file_record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // ── Collections ──────────────────────────────────────────────

    fn insert_collection(&mut self, collection: &CollectionRecord) -> Result<(), Error> {
        let inserted = self.connection().execute(
            "INSERT INTO collection (name, base, added_at) VALUES (?1, ?2, ?3)",
            params![
                collection.name,
                collection.base.to_string_lossy(),
                format_time(&collection.added_at),
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(Error::CollectionExists(collection.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_collection(&self, name: &str) -> Result<Option<CollectionRecord>, Error> {
        let collection = self
            .connection()
            .query_row(
                "SELECT name, base, added_at FROM collection WHERE name = ?1",
                params![name],
                collection_from_row,
            )
            .optional()?;
        Ok(collection)
    }

    fn list_collections(&self) -> Result<Vec<CollectionRecord>, Error> {
        let mut stmt = self
            .connection()
            .prepare("SELECT name, base, added_at FROM collection ORDER BY name")?;
        let collections = stmt
            .query_map([], collection_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(collections)
    }

    fn delete_collection(&mut self, name: &str) -> Result<bool, Error> {
        let removed = self
            .connection()
            .execute("DELETE FROM collection WHERE name = ?1", params![name])?;
        Ok(removed > 0)
    }
}
