use super::{EntryKind, FileEntry, LinkResolver};
use crate::error::Error;
use crate::platform;
use chrono::{DateTime, Utc};
use glob::Pattern;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use walkdir::{DirEntry, WalkDir};

/// Which side of the catalog a tree belongs to.
#[derive(Clone, Copy)]
pub enum ScanMode<'a> {
    /// A collection's source tree. Symlinks are followed; a cycle is an error.
    Physical,
    /// A catalog subtree. Only managed links are reported, with their
    /// recorded size and time.
    Catalog(&'a dyn LinkResolver),
}

/// Read-only walker producing [`FileEntry`] values relative to a root.
pub struct TreeScanner<'a> {
    mode: ScanMode<'a>,
    ignore_patterns: Vec<Pattern>,
}

impl<'a> TreeScanner<'a> {
    pub fn physical() -> Self {
        TreeScanner {
            mode: ScanMode::Physical,
            ignore_patterns: Vec::new(),
        }
    }

    pub fn catalog(links: &'a dyn LinkResolver) -> Self {
        TreeScanner {
            mode: ScanMode::Catalog(links),
            ignore_patterns: Vec::new(),
        }
    }

    /// Skip entries whose relative path or file name matches any glob.
    /// Invalid patterns are logged and dropped.
    pub fn with_ignore_patterns(mut self, globs: &[String]) -> Self {
        self.ignore_patterns = globs
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();
        self
    }

    /// Lazily walk `root`. Entries come out depth-first, siblings sorted by
    /// file name, so the discovery order is stable between runs.
    pub fn scan(&self, root: &Path) -> Scan<'a> {
        let follow_links = matches!(self.mode, ScanMode::Physical);
        let walker = WalkDir::new(root)
            .follow_links(follow_links)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
            .into_iter();
        Scan {
            root: root.to_path_buf(),
            walker,
            mode: self.mode,
            ignore_patterns: self.ignore_patterns.clone(),
        }
    }
}

/// Iterator returned by [`TreeScanner::scan`].
pub struct Scan<'a> {
    root: PathBuf,
    walker: walkdir::IntoIter,
    mode: ScanMode<'a>,
    ignore_patterns: Vec<Pattern>,
}

impl Scan<'_> {
    fn is_ignored(&self, rel: &Path) -> bool {
        let name = rel.file_name().map(|n| n.to_string_lossy());
        self.ignore_patterns.iter().any(|p| {
            p.matches_path(rel) || name.as_deref().map_or(false, |n| p.matches(n))
        })
    }

    fn walk_error(&self, err: walkdir::Error) -> Option<Error> {
        let path = err
            .path()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        if let Some(ancestor) = err.loop_ancestor() {
            return Some(Error::SymlinkCycle {
                path,
                ancestor: ancestor.to_path_buf(),
            });
        }
        if let Some(io_err) = err.io_error() {
            if io_err.kind() == io::ErrorKind::NotFound
                && err.depth() > 0
                && platform::is_symlink(&path)
            {
                warn!("Skipping dangling symlink {}", path.display());
                return None;
            }
        }
        Some(Error::Scan {
            path,
            reason: err.to_string(),
        })
    }

    fn classify(&mut self, entry: &DirEntry) -> Result<Option<FileEntry>, Error> {
        let path = entry.path();
        let rel = path
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .map_err(|_| Error::Scan {
                path: path.to_path_buf(),
                reason: "entry outside of scan root".to_string(),
            })?;
        let file_type = entry.file_type();

        if self.is_ignored(&rel) {
            if file_type.is_dir() {
                self.walker.skip_current_dir();
            }
            debug!("Ignoring {}", rel.display());
            return Ok(None);
        }

        match self.mode {
            ScanMode::Physical => {
                if file_type.is_dir() {
                    Ok(Some(directory_entry(rel, entry)?))
                } else if file_type.is_file() {
                    let metadata = entry_metadata(entry)?;
                    Ok(Some(FileEntry {
                        relative_path: rel,
                        kind: EntryKind::File,
                        size: Some(metadata.len()),
                        modified_time: modified_time(&metadata, path)?,
                        link_target: None,
                    }))
                } else {
                    debug!("Skipping special file {}", path.display());
                    Ok(None)
                }
            }
            ScanMode::Catalog(links) => {
                if links.is_reserved(path) {
                    if file_type.is_dir() {
                        self.walker.skip_current_dir();
                    }
                    return Ok(None);
                }
                if file_type.is_dir() {
                    Ok(Some(directory_entry(rel, entry)?))
                } else if file_type.is_symlink() {
                    match links.managed_link(path)? {
                        Some(record) => {
                            let target = fs::read_link(path).ok();
                            Ok(Some(FileEntry::from_record(rel, record, target)))
                        }
                        None => {
                            debug!("Skipping foreign link {}", path.display());
                            Ok(None)
                        }
                    }
                } else {
                    debug!("Skipping unmanaged file {}", path.display());
                    Ok(None)
                }
            }
        }
    }
}

impl Iterator for Scan<'_> {
    type Item = Result<FileEntry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => match self.walk_error(err) {
                    Some(e) => return Some(Err(e)),
                    None => continue,
                },
            };
            if entry.depth() == 0 {
                continue;
            }
            match self.classify(&entry) {
                Ok(Some(file_entry)) => return Some(Ok(file_entry)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn entry_metadata(entry: &DirEntry) -> Result<fs::Metadata, Error> {
    entry.metadata().map_err(|e| Error::Scan {
        path: entry.path().to_path_buf(),
        reason: e.to_string(),
    })
}

fn modified_time(metadata: &fs::Metadata, path: &Path) -> Result<DateTime<Utc>, Error> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .map_err(|e| Error::Scan {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn directory_entry(rel: PathBuf, entry: &DirEntry) -> Result<FileEntry, Error> {
    let metadata = entry_metadata(entry)?;
    Ok(FileEntry {
        relative_path: rel,
        kind: EntryKind::Directory,
        size: None,
        modified_time: modified_time(&metadata, entry.path())?,
        link_target: None,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::storage::FileRecord;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    struct FakeLinks {
        records: BTreeMap<PathBuf, FileRecord>,
        reserved: PathBuf,
    }

    impl LinkResolver for FakeLinks {
        fn managed_link(&self, path: &Path) -> Result<Option<FileRecord>, Error> {
            if !platform::is_symlink(path) {
                return Ok(None);
            }
            Ok(self.records.get(path).cloned())
        }

        fn is_reserved(&self, path: &Path) -> bool {
            path == self.reserved
        }
    }

    fn collect(scan: Scan<'_>) -> Vec<FileEntry> {
        scan.collect::<Result<Vec<_>, _>>().unwrap()
    }

    #[test]
    fn test_physical_scan_is_sorted_and_relative() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::write(root.join("b/two.txt"), "22").unwrap();
        fs::write(root.join("a.txt"), "1").unwrap();

        let entries = collect(TreeScanner::physical().scan(root));
        let paths: Vec<_> = entries.iter().map(|e| e.relative_path.clone()).collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("a.txt"), PathBuf::from("b"), PathBuf::from("b/two.txt")]
        );
        assert_eq!(entries[0].size, Some(1));
        assert!(entries[1].is_dir());
        assert_eq!(entries[1].size, None);
    }

    #[test]
    fn test_ignore_patterns_prune_directories() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("cache/deep")).unwrap();
        fs::write(root.join("cache/deep/x.bin"), "x").unwrap();
        fs::write(root.join("keep.txt"), "k").unwrap();
        fs::write(root.join("junk.tmp"), "j").unwrap();

        let scanner = TreeScanner::physical()
            .with_ignore_patterns(&["cache".to_string(), "*.tmp".to_string(), "[".to_string()]);
        let entries = collect(scanner.scan(root));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].relative_path, PathBuf::from("keep.txt"));
    }

    #[test]
    fn test_physical_cycle_is_an_error() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(root.join("sub")).unwrap();
        platform::create_symlink(&root, &root.join("sub/back")).unwrap();

        let result: Result<Vec<_>, _> = TreeScanner::physical().scan(&root).collect();
        assert!(matches!(result, Err(Error::SymlinkCycle { .. })));
    }

    #[test]
    fn test_catalog_scan_reports_only_managed_links() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.jpg"), "aaaa").unwrap();
        fs::write(src.join("b.jpg"), "bb").unwrap();

        let root = tmp.path().join("cat");
        let reserved = root.join(".sfs");
        fs::create_dir_all(&reserved).unwrap();
        fs::write(reserved.join("catalog.db"), "").unwrap();
        fs::create_dir_all(root.join("col")).unwrap();
        platform::create_symlink(&src.join("a.jpg"), &root.join("col/a.jpg")).unwrap();
        platform::create_symlink(&src.join("b.jpg"), &root.join("col/foreign.jpg")).unwrap();
        fs::write(root.join("col/notes.txt"), "plain file").unwrap();

        let modified = Utc::now();
        let mut records = BTreeMap::new();
        records.insert(
            root.join("col/a.jpg"),
            FileRecord {
                path: PathBuf::from("col/a.jpg"),
                size: 4,
                modified,
                source_path: src.join("a.jpg"),
            },
        );
        let links = FakeLinks { records, reserved };

        let entries = collect(TreeScanner::catalog(&links).scan(&root));
        let paths: Vec<_> = entries.iter().map(|e| e.relative_path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("col"), PathBuf::from("col/a.jpg")]);
        let link = &entries[1];
        assert_eq!(link.size, Some(4));
        assert_eq!(link.modified_time, modified);
        assert_eq!(link.link_target, Some(src.join("a.jpg")));
    }

    #[test]
    fn test_missing_root_is_a_scan_error() {
        let tmp = tempdir().unwrap();
        let result: Result<Vec<_>, _> = TreeScanner::physical()
            .scan(&tmp.path().join("nope"))
            .collect();
        assert!(matches!(result, Err(Error::Scan { .. })));
    }
}
