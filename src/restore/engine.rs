// pgdata-restore/src/restore/engine.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::archive::{count_files, extract_tar_gz_archive};
use super::catalog::{ArchiveLocation, CatalogEntry, load_backup};
use super::recovery_conf::{
    copy_restore_command, render_recovery_settings, write_recovery_config,
};
use super::recovery_target::{RecoveryTarget, TargetKind};
use super::request::RestoreRequest;
use super::s3_download::{download_file_from_s3, parse_s3_uri};
use super::validation::{validate_credentials_file, validate_request_fields};
use super::RestoreEngine;
use crate::config::EngineConfig;
use crate::errors::{ConfigError, EngineError};

pub const MANIFEST_FILE: &str = "restore_manifest.json";

/// Provenance record left in the restored data directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestoreManifest {
    pub restore_id: Uuid,
    pub backup_id: String,
    pub source_cluster: String,
    pub cluster_name: String,
    pub namespace: String,
    pub origin_node: Option<String>,
    pub recovery_target: Option<String>,
    pub begin_lsn: Option<String>,
    pub end_lsn: Option<String>,
    pub restored_at: DateTime<Utc>,
    pub files_restored: u64,
    /// The superuser password is applied once the instance is running.
    pub superuser_password_pending: bool,
}

/// What a verified request resolves to.
struct RestorePlan {
    entry: CatalogEntry,
    target: RecoveryTarget,
    restore_command: Option<String>,
}

/// Restores base backups described by a local backup catalog.
pub struct CatalogRestoreEngine {
    config: EngineConfig,
}

impl CatalogRestoreEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn plan(&self, request: &RestoreRequest) -> Result<RestorePlan, ConfigError> {
        validate_request_fields(request)?;

        let target = RecoveryTarget::parse(request.recovery_target.as_deref().unwrap_or(""))?;

        if let Some(credentials_file) = &request.credentials_file {
            validate_credentials_file(credentials_file, &request.target_path)?;
        }

        let entry = load_backup(
            &self.config.backup_catalog_dir,
            &request.namespace,
            &request.backup_id,
        )?;
        check_matches("backup_id", &request.backup_id, &entry.metadata.backup_id)?;
        check_matches("namespace", &request.namespace, &entry.metadata.namespace)?;
        if !entry.is_completed() {
            return Err(ConfigError::BackupNotCompleted {
                backup_id: entry.metadata.backup_id.clone(),
                status: entry.metadata.status.clone(),
            });
        }

        if let ArchiveLocation::S3(archive) = entry.archive_location() {
            let Some(spaces) = &self.config.spaces_config else {
                return Err(ConfigError::S3NotConfigured { archive });
            };
            // Credentials are scoped to the configured bucket.
            let (bucket, _) = parse_s3_uri(&archive).map_err(|e| ConfigError::InvalidArchiveUri {
                archive: archive.clone(),
                reason: e.to_string(),
            })?;
            if bucket != spaces.bucket_name {
                return Err(ConfigError::ArchiveBucketMismatch {
                    archive,
                    bucket,
                    configured: spaces.bucket_name.clone(),
                });
            }
        }

        if let (Some(TargetKind::Time(time)), Some(completed_at)) =
            (&target.kind, entry.metadata.completed_at)
        {
            if time.with_timezone(&Utc) < completed_at {
                return Err(ConfigError::TargetBeforeBackupEnd {
                    backup_id: entry.metadata.backup_id.clone(),
                    target: time.to_rfc3339(),
                    completed_at: completed_at.to_rfc3339(),
                });
            }
        }

        let restore_command = self
            .config
            .restore_command
            .clone()
            .or_else(|| entry.wal_archive_dir().map(|dir| copy_restore_command(&dir)));
        if !target.is_latest() && restore_command.is_none() {
            return Err(ConfigError::MissingWalSource);
        }

        Ok(RestorePlan {
            entry,
            target,
            restore_command,
        })
    }

    async fn populate(
        &self,
        cancel: &CancellationToken,
        request: &RestoreRequest,
        plan: &RestorePlan,
    ) -> Result<(), EngineError> {
        let pgdata = request.target_path.clone();

        // Keeps a downloaded archive alive until extraction is done.
        let mut _staging = None;
        let archive_path = match plan.entry.archive_location() {
            ArchiveLocation::Local(path) => path,
            ArchiveLocation::S3(uri) => {
                let spaces = self.config.spaces_config.as_ref().ok_or_else(|| {
                    EngineError::Metadata(Box::new(ConfigError::S3NotConfigured {
                        archive: uri.clone(),
                    }))
                })?;
                let staging = tempfile::tempdir().map_err(|e| {
                    EngineError::io("creating download directory", std::env::temp_dir(), e)
                })?;
                let destination = staging.path().join("base.tar.gz");
                let downloaded = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(EngineError::Cancelled {
                            during: "downloading the backup archive",
                        });
                    }
                    result = download_file_from_s3(spaces, &uri, &destination) => result?,
                };
                _staging = Some(staging);
                downloaded
            }
        };

        let token = cancel.clone();
        let extract_to = pgdata.clone();
        tokio::task::spawn_blocking(move || {
            let result = extract_tar_gz_archive(&archive_path, &extract_to, &token);
            // The awaiting future may already be gone, leaving this task the
            // last writer of the directory.
            if matches!(result, Err(EngineError::Cancelled { .. })) {
                discard_data_dir(&extract_to);
            }
            result
        })
        .await??;

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled {
                during: "writing the recovery configuration",
            });
        }

        let restored_at = Utc::now();
        let settings = render_recovery_settings(
            plan.restore_command.as_deref(),
            &plan.target,
            &plan.entry.metadata.backup_id,
            restored_at,
        );
        write_recovery_config(&pgdata, &settings)?;

        let manifest = RestoreManifest {
            restore_id: Uuid::new_v4(),
            backup_id: plan.entry.metadata.backup_id.clone(),
            source_cluster: plan.entry.metadata.source_cluster.clone(),
            cluster_name: request.cluster_name.clone(),
            namespace: request.namespace.clone(),
            origin_node: request.origin_node.clone(),
            recovery_target: request.recovery_target.clone(),
            begin_lsn: plan.entry.metadata.begin_lsn.clone(),
            end_lsn: plan.entry.metadata.end_lsn.clone(),
            restored_at,
            files_restored: count_files(&pgdata)?,
            superuser_password_pending: request.credentials_file.is_some(),
        };
        write_manifest(&pgdata, &manifest)?;

        info!(
            restore_id = %manifest.restore_id,
            files = manifest.files_restored,
            source_cluster = %manifest.source_cluster,
            "data directory materialized from backup"
        );
        Ok(())
    }
}

#[async_trait]
impl RestoreEngine for CatalogRestoreEngine {
    fn verify_configuration(&self, request: &RestoreRequest) -> Result<(), ConfigError> {
        self.plan(request).map(|_| ())
    }

    async fn restore(
        &self,
        cancel: &CancellationToken,
        request: &RestoreRequest,
    ) -> Result<(), EngineError> {
        let plan = self
            .plan(request)
            .map_err(|e| EngineError::Metadata(Box::new(e)))?;

        let pgdata = &request.target_path;
        if let Some(parent) = pgdata.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::io("creating data directory parent", parent, e))?;
        }
        // Fails with AlreadyExists instead of adopting someone else's directory.
        create_data_dir(pgdata)?;
        let partial = PartialDataDir::new(pgdata);

        // Dropping this future (e.g. a caller's timeout) cancels the child
        // token, which stops the blocking extraction.
        let child = cancel.child_token();
        let _stop_on_drop = child.clone().drop_guard();

        self.populate(&child, request, &plan).await?;
        partial.disarm();
        Ok(())
    }
}

fn check_matches(field: &'static str, expected: &str, found: &str) -> Result<(), ConfigError> {
    if expected != found {
        return Err(ConfigError::MetadataMismatch {
            field,
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}

fn create_data_dir(path: &Path) -> Result<(), EngineError> {
    let mut builder = fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(path)
        .map_err(|e| EngineError::io("creating data directory", path, e))
}

/// Removes the data directory on drop unless the restore completed.
struct PartialDataDir<'a> {
    path: &'a Path,
    armed: bool,
}

impl<'a> PartialDataDir<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialDataDir<'_> {
    fn drop(&mut self) {
        if self.armed {
            discard_data_dir(self.path);
        }
    }
}

/// Removes a directory this engine created for a restore that did not finish.
fn discard_data_dir(path: &Path) {
    match fs::remove_dir_all(path) {
        Ok(()) => info!(
            pg_data = %path.display(),
            "removed partially restored data directory"
        ),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            pg_data = %path.display(),
            error = %e,
            "could not remove partially restored data directory, manual cleanup required"
        ),
    }
}

fn write_manifest(pgdata: &Path, manifest: &RestoreManifest) -> Result<(), EngineError> {
    let path: PathBuf = pgdata.join(MANIFEST_FILE);
    let content = serde_json::to_vec_pretty(manifest).map_err(|source| EngineError::Json {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, content).map_err(|e| EngineError::io("writing restore manifest", &path, e))
}
