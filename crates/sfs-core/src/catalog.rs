use crate::config::AppConfig;
use crate::error::Error;
use crate::platform;
use crate::scanner::{LinkResolver, TreeScanner};
use crate::storage::{path_key, CollectionRecord, FileRecord, MetadataStore, SqliteStore};
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Hidden directory at the catalog root holding the metadata database.
pub const SFS_DIR: &str = ".sfs";
/// Extension of every file the catalog writes next to user content.
pub const SFS_FILE_EXTENSION: &str = "sfs";

/// Walk up from `path` to the nearest directory containing a `.sfs` directory.
pub fn find_root(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|dir| dir.join(SFS_DIR).is_dir())
        .map(Path::to_path_buf)
}

/// A managed tree of symlinks plus the metadata recorded for each of them.
pub struct Catalog<S: MetadataStore> {
    root: PathBuf,
    store: S,
}

impl Catalog<SqliteStore> {
    /// Bootstrap a catalog in an existing, empty directory.
    pub fn init(path: &Path, config: &AppConfig) -> Result<Self, Error> {
        let root = fs::canonicalize(path)?;
        if let Some(existing) = find_root(&root) {
            return Err(Error::Other(format!(
                "{} is already inside the catalog at {}",
                root.display(),
                existing.display()
            )));
        }
        if fs::read_dir(&root)?.next().is_some() {
            return Err(Error::Other(format!(
                "A catalog can only be initialized in an empty directory ({})",
                root.display()
            )));
        }
        fs::create_dir(root.join(SFS_DIR))?;
        let store = SqliteStore::open(&root.join(SFS_DIR).join(&config.db_file))?;
        info!("Initialized catalog at {}", root.display());
        Ok(Catalog { root, store })
    }

    /// Open the catalog containing `path`.
    pub fn discover(path: &Path, config: &AppConfig) -> Result<Self, Error> {
        let path = fs::canonicalize(path)?;
        let root = find_root(&path).ok_or_else(|| Error::NotInCatalog(path.clone()))?;
        let store = SqliteStore::open(&root.join(SFS_DIR).join(&config.db_file))?;
        debug!("Opened catalog at {}", root.display());
        Ok(Catalog { root, store })
    }
}

impl<S: MetadataStore> Catalog<S> {
    /// Wrap an existing directory and store. The metadata directory is created
    /// if missing.
    pub fn with_store(root: &Path, store: S) -> Result<Self, Error> {
        let root = fs::canonicalize(root)?;
        fs::create_dir_all(root.join(SFS_DIR))?;
        Ok(Catalog { root, store })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(SFS_DIR)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Catalog-relative form of an absolute, normalized path.
    pub fn relative(&self, path: &Path) -> Result<PathBuf, Error> {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .map_err(|_| Error::NotInCatalog(path.to_path_buf()))
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Scanner over catalog subtrees, reporting only managed links.
    pub fn scanner(&self) -> TreeScanner<'_> {
        TreeScanner::catalog(self)
    }

    // ── Link and record primitives ───────────────────────────────

    /// Create (or replace) the link at `relative` pointing at `source`.
    pub fn create_link(&mut self, relative: &Path, source: &Path) -> Result<(), Error> {
        let link = self.absolute(relative);
        if platform::is_symlink(&link) {
            fs::remove_file(&link)?;
        } else if platform::exists_no_follow(&link) {
            return Err(Error::Other(format!(
                "Refusing to replace non-link {} with a link",
                link.display()
            )));
        }
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)?;
        }
        platform::create_symlink(source, &link)?;
        debug!("Linked {} -> {}", link.display(), source.display());
        Ok(())
    }

    /// Remove the link at `relative`. Regular files are never touched.
    pub fn remove_link(&mut self, relative: &Path) -> Result<bool, Error> {
        let link = self.absolute(relative);
        if !platform::is_symlink(&link) {
            return Ok(false);
        }
        match fs::remove_file(&link) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn record_metadata(
        &mut self,
        relative: &Path,
        size: u64,
        modified: DateTime<Utc>,
        source: &Path,
    ) -> Result<(), Error> {
        self.store.upsert_record(&FileRecord {
            path: relative.to_path_buf(),
            size,
            modified,
            source_path: source.to_path_buf(),
        })
    }

    pub fn delete_metadata(&mut self, relative: &Path) -> Result<bool, Error> {
        self.store.delete_record(relative)
    }

    pub fn lookup_metadata(&self, relative: &Path) -> Result<Option<FileRecord>, Error> {
        self.store.get_record(relative)
    }

    /// A managed link is a symlink inside the catalog with a metadata record.
    pub fn is_managed_link(&self, path: &Path) -> bool {
        if !platform::is_symlink(path) {
            return false;
        }
        match self.relative(path) {
            Ok(rel) => matches!(self.store.get_record(&rel), Ok(Some(_))),
            Err(_) => false,
        }
    }

    pub fn resolve_collection_root(&self, name: &str) -> Result<PathBuf, Error> {
        self.store
            .get_collection(name)?
            .map(|c| c.base)
            .ok_or_else(|| Error::UnknownCollection(name.to_string()))
    }

    // ── Compound operations ──────────────────────────────────────

    /// Remove a link together with its record.
    pub fn remove_entry(&mut self, relative: &Path) -> Result<bool, Error> {
        let removed = self.remove_link(relative)?;
        let deleted = self.delete_metadata(relative)?;
        Ok(removed || deleted)
    }

    /// Move a link and its record. Parent directories of `to` are created.
    pub fn relocate(&mut self, from: &Path, to: &Path) -> Result<(), Error> {
        let (src, dst) = (self.absolute(from), self.absolute(to));
        if platform::exists_no_follow(&dst) && !platform::is_symlink(&dst) {
            return Err(Error::Other(format!(
                "Cannot move {} over non-link {}",
                src.display(),
                dst.display()
            )));
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&src, &dst)?;
        self.store.relocate_record(from, to)?;
        debug!("Moved {} -> {}", src.display(), dst.display());
        Ok(())
    }

    /// Move a whole directory and every record below it. Returns the number
    /// of records moved.
    pub fn relocate_subtree(&mut self, from: &Path, to: &Path) -> Result<usize, Error> {
        let (src, dst) = (self.absolute(from), self.absolute(to));
        if platform::exists_no_follow(&dst) {
            return Err(Error::Other(format!(
                "Cannot move directory {} over existing {}",
                src.display(),
                dst.display()
            )));
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        let records = self.store.records_under(from)?;
        fs::rename(&src, &dst)?;
        let from_key = path_key(from);
        for record in &records {
            let key = path_key(&record.path);
            let suffix = key[from_key.len()..].trim_start_matches('/');
            let new_path = if suffix.is_empty() {
                to.to_path_buf()
            } else {
                to.join(suffix)
            };
            self.store.relocate_record(&record.path, &new_path)?;
        }
        debug!(
            "Moved directory {} -> {} ({} records)",
            src.display(),
            dst.display(),
            records.len()
        );
        Ok(records.len())
    }

    /// Delete every link and record below a directory, then the directories
    /// left empty. Files the catalog does not manage are kept. Returns the
    /// number of records deleted.
    pub fn remove_subtree(&mut self, relative: &Path) -> Result<usize, Error> {
        let records = self.store.records_under(relative)?;
        for record in &records {
            self.remove_link(&record.path)?;
            self.store.delete_record(&record.path)?;
        }
        let dir = self.absolute(relative);
        if dir.is_dir() && !platform::is_symlink(&dir) {
            prune_empty_dirs(&dir)?;
        }
        debug!("Removed {} ({} records)", dir.display(), records.len());
        Ok(records.len())
    }

    // ── Collections ──────────────────────────────────────────────

    /// Register `base` as collection `name`. Links are created by a
    /// subsequent reconciliation.
    pub fn add_collection(&mut self, name: &str, base: &Path) -> Result<CollectionRecord, Error> {
        if name.is_empty() || name.starts_with('.') || name.contains('/') || name.contains('\\') {
            return Err(Error::Other(format!("Invalid collection name '{}'", name)));
        }
        let base = fs::canonicalize(base).map_err(|_| Error::SourceUnavailable(base.to_path_buf()))?;
        if !base.is_dir() {
            return Err(Error::SourceUnavailable(base));
        }
        if self.store.get_collection(name)?.is_some() {
            return Err(Error::CollectionExists(name.to_string()));
        }
        if base.starts_with(&self.root) || self.root.starts_with(&base) {
            return Err(Error::Other(format!(
                "Collection directory {} overlaps the catalog",
                base.display()
            )));
        }
        for existing in self.store.list_collections()? {
            if base.starts_with(&existing.base) || existing.base.starts_with(&base) {
                return Err(Error::Other(format!(
                    "Collection directory {} overlaps collection '{}'",
                    base.display(),
                    existing.name
                )));
            }
        }
        let record = CollectionRecord {
            name: name.to_string(),
            base,
            added_at: Utc::now(),
        };
        self.store.insert_collection(&record)?;
        info!("Added collection '{}' at {}", record.name, record.base.display());
        Ok(record)
    }

    pub fn collections(&self) -> Result<Vec<CollectionRecord>, Error> {
        self.store.list_collections()
    }

    /// Unregister a collection and remove every link that points into it,
    /// wherever in the catalog it has been moved. Returns the links removed.
    pub fn remove_collection(&mut self, name: &str) -> Result<usize, Error> {
        let collection = self
            .store
            .get_collection(name)?
            .ok_or_else(|| Error::UnknownCollection(name.to_string()))?;

        let mut removed = 0;
        for record in self.store.records_under(Path::new(""))? {
            if record.source_path.starts_with(&collection.base) {
                self.remove_link(&record.path)?;
                self.store.delete_record(&record.path)?;
                removed += 1;
            }
        }
        self.store.delete_collection(name)?;

        let mirror = self.absolute(Path::new(name));
        if mirror.is_dir() {
            prune_empty_dirs(&mirror)?;
        }
        info!("Removed collection '{}' ({} links)", name, removed);
        Ok(removed)
    }

    /// Delete every link in the catalog that has no record, or whose record
    /// points outside all registered collections. Returns the links removed.
    pub fn remove_orphans(&mut self) -> Result<usize, Error> {
        let bases: Vec<PathBuf> = self
            .store
            .list_collections()?
            .into_iter()
            .map(|c| c.base)
            .collect();
        let metadata_dir = self.metadata_dir();

        let mut orphans = Vec::new();
        let walker = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.path() != metadata_dir);
        for entry in walker {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_symlink() {
                continue;
            }
            let rel = self.relative(entry.path())?;
            let owned = match self.store.get_record(&rel)? {
                Some(record) => bases.iter().any(|base| record.source_path.starts_with(base)),
                None => false,
            };
            if !owned {
                orphans.push(rel);
            }
        }

        for rel in &orphans {
            self.remove_entry(rel)?;
            debug!("Removed orphan {}", rel.display());
        }
        info!("Removed {} orphan links", orphans.len());
        Ok(orphans.len())
    }
}

impl<S: MetadataStore> LinkResolver for Catalog<S> {
    fn managed_link(&self, path: &Path) -> Result<Option<FileRecord>, Error> {
        if !platform::is_symlink(path) {
            return Ok(None);
        }
        let rel = self.relative(path)?;
        self.store.get_record(&rel)
    }

    fn is_reserved(&self, path: &Path) -> bool {
        path == self.metadata_dir()
    }
}

/// Remove `dir` and any directories below it that hold nothing but other
/// empty directories. Returns whether `dir` itself was removed.
pub fn prune_empty_dirs(dir: &Path) -> Result<bool, Error> {
    let mut empty = true;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if !prune_empty_dirs(&entry.path())? {
                empty = false;
            }
        } else {
            empty = false;
        }
    }
    if empty {
        fs::remove_dir(dir)?;
    } else {
        warn!("Leaving non-empty directory {}", dir.display());
    }
    Ok(empty)
}
