use std::io;
use std::os::windows::fs::{symlink_dir, symlink_file};
use std::path::Path;

pub fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    if target.is_dir() {
        symlink_dir(target, link)
    } else {
        symlink_file(target, link)
    }
}
