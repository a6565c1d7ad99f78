use clap::Parser;
use std::path::PathBuf;

use crate::logging::LogFormat;
use crate::restore::request::RestoreRequest;

const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Restores a PostgreSQL data directory from a catalogued base backup.
#[derive(Debug, Parser)]
#[command(name = "pgdata-restore")]
pub struct Cli {
    /// The file containing the PostgreSQL superuser password to use during the init phase
    #[arg(long = "pw-file")]
    pub pw_file: Option<PathBuf>,

    /// The origin node
    #[arg(long = "parent-node")]
    pub parent_node: Option<String>,

    /// The PGDATA to be created
    #[arg(long = "pg-data", env = "PGDATA")]
    pub pg_data: Option<PathBuf>,

    /// The name of the backup that should be restored
    #[arg(long = "backup-name")]
    pub backup_name: Option<String>,

    /// The name of the current cluster, used to coordinate switchover and failover
    #[arg(long = "cluster-name", env = "CLUSTER_NAME")]
    pub cluster_name: Option<String>,

    /// The namespace of the cluster
    #[arg(long, env = "NAMESPACE")]
    pub namespace: Option<String>,

    /// The recovery target in the form of PostgreSQL options
    #[arg(long)]
    pub target: Option<String>,

    /// Engine configuration file
    #[arg(long, env = "RESTORE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Assembles the request once. Missing required values become empty
    /// strings so validation reports them with the rest.
    pub fn restore_request(&self) -> RestoreRequest {
        RestoreRequest {
            target_path: self.pg_data.clone().unwrap_or_default(),
            credentials_file: self.pw_file.clone().filter(|p| !p.as_os_str().is_empty()),
            origin_node: non_empty(&self.parent_node),
            cluster_name: non_empty(&self.cluster_name).unwrap_or_default(),
            backup_id: non_empty(&self.backup_name).unwrap_or_default(),
            namespace: non_empty(&self.namespace).unwrap_or_default(),
            recovery_target: non_empty(&self.target),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
