#[cfg(target_os = "windows")]
pub mod windows;

use std::fs;
use std::io;
use std::path::Path;

/// Create a symlink at `link` pointing at `target`.
#[cfg(unix)]
pub fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(target_os = "windows")]
pub fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    windows::create_symlink(target, link)
}

/// True when `path` itself (not what it points at) is a symlink.
pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// True when anything, including a dangling symlink, exists at `path`.
pub fn exists_no_follow(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_dangling_link_still_exists() {
        let tmp = tempdir().unwrap();
        let link = tmp.path().join("dangling");
        create_symlink(&tmp.path().join("missing"), &link).unwrap();
        assert!(is_symlink(&link));
        assert!(exists_no_follow(&link));
        assert!(!link.exists());
    }
}
