use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::restore::request::RequestSummary;

/// Stage of the restore sequence a failure was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStage {
    CheckingDestination,
    Verifying,
    Restoring,
}

impl RestoreStage {
    pub fn as_str(self) -> &'static str {
        match self {
            RestoreStage::CheckingDestination => "checking_destination",
            RestoreStage::Verifying => "verifying",
            RestoreStage::Restoring => "restoring",
        }
    }
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures surfaced by the restore orchestrator, one variant per stage outcome.
#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("failed to check for an existing data directory at {}", .path.display())]
    Probe {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("data directory {} already exists, refusing to restore over it", .path.display())]
    DestinationNotEmpty { path: PathBuf },

    #[error("restore configuration not valid: {source}")]
    InvalidConfiguration {
        request: RequestSummary,
        #[source]
        source: ConfigError,
    },

    #[error("restore of backup '{backup_id}' failed: {source}")]
    Execution {
        backup_id: String,
        #[source]
        source: EngineError,
    },
}

impl RestoreError {
    pub fn stage(&self) -> RestoreStage {
        match self {
            RestoreError::Probe { .. } | RestoreError::DestinationNotEmpty { .. } => {
                RestoreStage::CheckingDestination
            }
            RestoreError::InvalidConfiguration { .. } => RestoreStage::Verifying,
            RestoreError::Execution { .. } => RestoreStage::Restoring,
        }
    }

    /// True when the target was already initialized, which a controller
    /// usually treats as "nothing left to do" rather than a hard failure.
    pub fn is_already_restored(&self) -> bool {
        matches!(self, RestoreError::DestinationNotEmpty { .. })
    }
}

/// Semantic validation failures of a restore request.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("required field '{field}' is empty")]
    MissingField { field: &'static str },

    #[error("field '{field}' has invalid value '{value}': {reason}")]
    InvalidIdentifier {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("data directory path must be absolute, got {}", .path.display())]
    RelativeTargetPath { path: PathBuf },

    #[error("invalid recovery target: {0}")]
    RecoveryTarget(#[from] RecoveryTargetError),

    #[error("cannot read superuser password file {}", .path.display())]
    CredentialsUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("superuser password file path must be absolute, got {}", .path.display())]
    RelativeCredentialsPath { path: PathBuf },

    #[error("superuser password file {} is empty", .path.display())]
    CredentialsEmpty { path: PathBuf },

    #[error("superuser password file {} lives inside the data directory", .path.display())]
    CredentialsInsideTarget { path: PathBuf },

    #[error("backup '{backup_id}' not found in catalog at {}", .path.display())]
    BackupNotFound { backup_id: String, path: PathBuf },

    #[error("cannot read backup metadata {}", .path.display())]
    MetadataUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed backup metadata {}", .path.display())]
    MetadataMalformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("backup metadata field '{field}' is '{found}', expected '{expected}'")]
    MetadataMismatch {
        field: &'static str,
        expected: String,
        found: String,
    },

    #[error("backup '{backup_id}' is not completed (status '{status}')")]
    BackupNotCompleted { backup_id: String, status: String },

    #[error("backup archive {archive} is stored in S3 but S3 storage is not configured")]
    S3NotConfigured { archive: String },

    #[error("backup archive location '{archive}' is not usable: {reason}")]
    InvalidArchiveUri { archive: String, reason: String },

    #[error("backup archive {archive} is in bucket '{bucket}', not the configured '{configured}'")]
    ArchiveBucketMismatch {
        archive: String,
        bucket: String,
        configured: String,
    },

    #[error("recovery target {target} precedes the end of backup '{backup_id}' ({completed_at})")]
    TargetBeforeBackupEnd {
        backup_id: String,
        target: String,
        completed_at: String,
    },

    #[error("a recovery target needs restore_command or the backup's wal_archive as WAL source")]
    MissingWalSource,
}

/// Syntax and semantic errors of a recovery target expression.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecoveryTargetError {
    #[error("cannot parse '{fragment}' as a name = value option")]
    Syntax { fragment: String },

    #[error("unknown recovery option '{name}'")]
    UnknownOption { name: String },

    #[error("recovery option '{name}' given more than once")]
    DuplicateOption { name: String },

    #[error("recovery option '{name}' has invalid value '{value}'")]
    InvalidValue { name: String, value: String },

    #[error("at most one recovery target may be given, found {first} and {second}")]
    MultipleTargets { first: String, second: String },
}

/// Failures of the restore execution step.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{operation} failed for {}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("backup metadata unavailable: {0}")]
    Metadata(#[source] Box<ConfigError>),

    #[error("invalid S3 URI '{uri}': {reason}")]
    InvalidS3Uri { uri: String, reason: String },

    #[error("S3 download of {uri} failed: {message}")]
    S3Download { uri: String, message: String },

    #[error("failed to write {}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("restore cancelled while {during}")]
    Cancelled { during: &'static str },

    #[error("background extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl EngineError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        EngineError::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
