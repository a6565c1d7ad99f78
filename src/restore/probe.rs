use std::fs;
use std::io;
use std::path::Path;

use super::StorageProbe;

/// Probe backed by the local filesystem.
///
/// Any existing entry counts as initialized, including a plain file or an
/// empty directory: restore creates the data directory itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStorageProbe;

impl StorageProbe for FsStorageProbe {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        if path.as_os_str().is_empty() {
            return Ok(false);
        }
        match fs::symlink_metadata(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
