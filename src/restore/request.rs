// pgdata-restore/src/restore/request.rs
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Everything needed to restore one data directory from one backup.
///
/// Built once per process from command-line input and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreRequest {
    /// Data directory that will be created by the restore.
    pub target_path: PathBuf,
    /// File holding the superuser password to apply once the instance is up.
    pub credentials_file: Option<PathBuf>,
    /// Node the restored instance originates from.
    pub origin_node: Option<String>,
    pub cluster_name: String,
    pub backup_id: String,
    pub namespace: String,
    /// PostgreSQL recovery options; `None` restores to the latest consistent point.
    pub recovery_target: Option<String>,
}

impl RestoreRequest {
    /// Diagnostic view of the request that carries no secrets.
    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            target_path: self.target_path.display().to_string(),
            cluster_name: self.cluster_name.clone(),
            namespace: self.namespace.clone(),
            backup_id: self.backup_id.clone(),
            origin_node: self.origin_node.clone(),
            recovery_target: self.recovery_target.clone(),
            credentials_file_set: self.credentials_file.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSummary {
    pub target_path: String,
    pub cluster_name: String,
    pub namespace: String,
    pub backup_id: String,
    pub origin_node: Option<String>,
    pub recovery_target: Option<String>,
    pub credentials_file_set: bool,
}

impl fmt::Display for RequestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "backup={} cluster={} namespace={} pg_data={}",
            self.backup_id, self.cluster_name, self.namespace, self.target_path
        )?;
        if let Some(node) = &self.origin_node {
            write!(f, " origin_node={}", node)?;
        }
        if let Some(target) = &self.recovery_target {
            write!(f, " target={:?}", target)?;
        }
        if self.credentials_file_set {
            f.write_str(" pw_file=<redacted>")?;
        }
        Ok(())
    }
}
