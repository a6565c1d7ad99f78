// pgdata-restore/src/restore/archive.rs
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::errors::EngineError;

/// Extracts a GZipped TAR base backup into `extract_to_dir`, entry by entry.
///
/// The directory must already exist. Cancellation is checked between entries,
/// so a cancelled extraction stops after at most one more file.
///
/// # Returns
/// Number of archive entries unpacked.
pub fn extract_tar_gz_archive(
    archive_path: &Path,
    extract_to_dir: &Path,
    cancel: &CancellationToken,
) -> Result<u64, EngineError> {
    info!(
        archive = %archive_path.display(),
        target = %extract_to_dir.display(),
        "extracting base backup archive"
    );

    let archive_file = File::open(archive_path)
        .map_err(|e| EngineError::io("opening backup archive", archive_path, e))?;
    let mut archive = tar::Archive::new(GzDecoder::new(archive_file));
    archive.set_preserve_permissions(true);

    let entries = archive
        .entries()
        .map_err(|e| EngineError::io("reading backup archive", archive_path, e))?;

    let mut unpacked = 0;
    for entry in entries {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled {
                during: "extracting the backup archive",
            });
        }
        let mut entry =
            entry.map_err(|e| EngineError::io("reading backup archive", archive_path, e))?;
        let written = entry
            .unpack_in(extract_to_dir)
            .map_err(|e| EngineError::io("unpacking backup archive entry", extract_to_dir, e))?;
        if written {
            unpacked += 1;
        } else if let Ok(path) = entry.path() {
            debug!(entry = %path.display(), "skipped archive entry outside the data directory");
        }
    }
    // A cancel that raced the last entry still fails the extraction.
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled {
            during: "extracting the backup archive",
        });
    }

    info!(entries = unpacked, "base backup archive extracted");
    Ok(unpacked)
}

/// Counts regular files below `dir`.
pub fn count_files(dir: &Path) -> Result<u64, EngineError> {
    let mut count = 0;
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            EngineError::io("walking the restored data directory", path, e.into())
        })?;
        if entry.file_type().is_file() {
            count += 1;
        }
    }
    Ok(count)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_extract_base_backup() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let archive_path = dir.path().join("base.tar.gz");
        test_support::write_base_backup(&archive_path)?;

        let target = dir.path().join("pgdata");
        fs::create_dir(&target)?;
        let unpacked = extract_tar_gz_archive(&archive_path, &target, &CancellationToken::new())?;

        assert!(unpacked >= 4);
        assert_eq!(fs::read_to_string(target.join("PG_VERSION"))?, "16\n");
        assert!(target.join("global/pg_control").is_file());
        assert_eq!(count_files(&target)?, 4);
        Ok(())
    }

    #[test]
    fn test_cancelled_extraction_stops() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let archive_path = dir.path().join("base.tar.gz");
        test_support::write_base_backup(&archive_path)?;

        let target = dir.path().join("pgdata");
        fs::create_dir(&target)?;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = extract_tar_gz_archive(&archive_path, &target, &cancel).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));
        assert_eq!(count_files(&target)?, 0);
        Ok(())
    }

    #[test]
    fn test_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_tar_gz_archive(
            &dir.path().join("missing.tar.gz"),
            dir.path(),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Io { operation: "opening backup archive", .. }));
    }
}
