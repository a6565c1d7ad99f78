// pgdata-restore/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

// Structs for deserializing config.json
#[derive(Debug, Clone, Deserialize)]
pub struct JsonS3StorageConfig {
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJsonConfig {
    pub backup_catalog_dir: Option<PathBuf>,
    pub restore_command: Option<String>,
    pub s3_storage: Option<JsonS3StorageConfig>,
}

#[derive(Debug, Clone)]
pub struct SpacesConfig {
    pub endpoint_url: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
}

/// Settings of the restore engine, assembled once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the backup catalog: `<dir>/<namespace>/<backup_id>/backup.json`.
    pub backup_catalog_dir: PathBuf,
    /// Overrides the WAL fetch command written into the recovery settings.
    pub restore_command: Option<String>,
    pub spaces_config: Option<SpacesConfig>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content)
            .with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?;

        Self::from_raw(raw_json_config)
    }

    fn from_raw(raw: RawJsonConfig) -> Result<Self> {
        let backup_catalog_dir = raw
            .backup_catalog_dir
            .context("backup_catalog_dir must be set in config.json")?;
        if backup_catalog_dir.as_os_str().is_empty() {
            anyhow::bail!("backup_catalog_dir cannot be empty in config.json.");
        }

        let restore_command = raw.restore_command.filter(|s| !s.trim().is_empty());
        let spaces_config = raw.s3_storage.as_ref().and_then(spaces_config_from_raw);

        Ok(AppConfig {
            engine: EngineConfig {
                backup_catalog_dir,
                restore_command,
                spaces_config,
            },
        })
    }
}

fn spaces_config_from_raw(s3_raw: &JsonS3StorageConfig) -> Option<SpacesConfig> {
    let non_empty = |field: &Option<String>| field.as_ref().filter(|s| !s.is_empty()).cloned();

    match (
        non_empty(&s3_raw.bucket_name),
        non_empty(&s3_raw.region),
        non_empty(&s3_raw.access_key_id),
        non_empty(&s3_raw.secret_access_key),
        non_empty(&s3_raw.endpoint_url),
    ) {
        (
            Some(bucket_name),
            Some(region),
            Some(access_key_id),
            Some(secret_access_key),
            Some(endpoint_url),
        ) => Some(SpacesConfig {
            endpoint_url,
            region,
            access_key_id,
            secret_access_key,
            bucket_name,
        }),
        _ => {
            // Only warn if some S3 fields were provided but were incomplete/empty
            if s3_raw.bucket_name.is_some()
                || s3_raw.region.is_some()
                || s3_raw.access_key_id.is_some()
                || s3_raw.secret_access_key.is_some()
                || s3_raw.endpoint_url.is_some()
            {
                warn!(
                    "S3 configuration is present in config.json but some required fields \
                     (bucket_name, region, access_key_id, secret_access_key, endpoint_url) \
                     are missing or empty. S3 archives will be rejected."
                );
            }
            None
        }
    }
}
