// pgdata-restore/src/restore/catalog.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::errors::ConfigError;

pub const METADATA_FILE: &str = "backup.json";
pub const STATUS_COMPLETED: &str = "completed";

/// Descriptor of one base backup stored in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupMetadata {
    pub backup_id: String,
    pub source_cluster: String,
    pub namespace: String,
    pub status: String,
    /// Relative to the backup directory, or an `s3://bucket/key` URI.
    pub archive: String,
    #[serde(default)]
    pub wal_archive: Option<PathBuf>,
    #[serde(default)]
    pub begin_lsn: Option<String>,
    #[serde(default)]
    pub end_lsn: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Where a backup archive can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveLocation {
    Local(PathBuf),
    S3(String),
}

/// A backup resolved against the catalog directory.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub dir: PathBuf,
    pub metadata: BackupMetadata,
}

impl CatalogEntry {
    pub fn archive_location(&self) -> ArchiveLocation {
        if self.metadata.archive.starts_with("s3://") {
            ArchiveLocation::S3(self.metadata.archive.clone())
        } else {
            ArchiveLocation::Local(self.dir.join(&self.metadata.archive))
        }
    }

    pub fn wal_archive_dir(&self) -> Option<PathBuf> {
        self.metadata.wal_archive.as_ref().map(|wal| self.dir.join(wal))
    }

    pub fn is_completed(&self) -> bool {
        self.metadata.status.eq_ignore_ascii_case(STATUS_COMPLETED)
    }
}

pub fn backup_dir(catalog_dir: &Path, namespace: &str, backup_id: &str) -> PathBuf {
    catalog_dir.join(namespace).join(backup_id)
}

/// Reads the metadata of `backup_id` in `namespace`.
///
/// Callers must have validated both identifiers as single path components.
pub fn load_backup(
    catalog_dir: &Path,
    namespace: &str,
    backup_id: &str,
) -> Result<CatalogEntry, ConfigError> {
    let dir = backup_dir(catalog_dir, namespace, backup_id);
    let metadata_path = dir.join(METADATA_FILE);

    let content = match fs::read_to_string(&metadata_path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ConfigError::BackupNotFound {
                backup_id: backup_id.to_string(),
                path: metadata_path,
            });
        }
        Err(source) => {
            return Err(ConfigError::MetadataUnreadable {
                path: metadata_path,
                source,
            });
        }
    };

    let metadata: BackupMetadata =
        serde_json::from_str(&content).map_err(|source| ConfigError::MetadataMalformed {
            path: metadata_path.clone(),
            source,
        })?;

    Ok(CatalogEntry { dir, metadata })
}
