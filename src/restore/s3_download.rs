// pgdata-restore/src/restore/s3_download.rs
use aws_sdk_s3 as s3;
use s3::config::Region;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::config::SpacesConfig;
use crate::errors::EngineError;

/// Parses an S3 URI (s3://bucket/key) into bucket and key.
pub fn parse_s3_uri(s3_uri: &str) -> Result<(String, String), EngineError> {
    let invalid = |reason: &str| EngineError::InvalidS3Uri {
        uri: s3_uri.to_string(),
        reason: reason.to_string(),
    };

    let uri = url::Url::parse(s3_uri).map_err(|e| invalid(&e.to_string()))?;
    if uri.scheme() != "s3" {
        return Err(invalid("scheme must be s3://"));
    }
    let bucket = uri
        .host_str()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| invalid("missing bucket name"))?
        .to_string();
    let key = uri.path().trim_start_matches('/').to_string();
    if key.is_empty() {
        return Err(invalid("missing key (object path)"));
    }
    Ok((bucket, key))
}

/// Downloads a backup archive from an S3-compatible object storage service.
///
/// # Returns
/// Path to the downloaded file.
pub async fn download_file_from_s3(
    spaces_config: &SpacesConfig,
    s3_uri: &str,
    destination_path: &Path,
) -> Result<PathBuf, EngineError> {
    let (s3_bucket, s3_key) = parse_s3_uri(s3_uri)?;
    let s3_failure = |message: String| EngineError::S3Download {
        uri: s3_uri.to_string(),
        message,
    };

    info!(
        bucket = %s3_bucket,
        key = %s3_key,
        destination = %destination_path.display(),
        "downloading backup archive"
    );

    let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
        .endpoint_url(&spaces_config.endpoint_url)
        .region(Region::new(spaces_config.region.clone()))
        .credentials_provider(s3::config::Credentials::new(
            &spaces_config.access_key_id,
            &spaces_config.secret_access_key,
            None,
            None,
            "Static",
        ))
        .load()
        .await;

    let client = s3::Client::new(&sdk_config);

    let mut output_file = File::create(destination_path)
        .await
        .map_err(|e| EngineError::io("creating download file", destination_path, e))?;

    let mut object = client
        .get_object()
        .bucket(&s3_bucket)
        .key(&s3_key)
        .send()
        .await
        .map_err(|e| s3_failure(e.to_string()))?;

    let mut total_bytes_downloaded = 0;
    while let Some(bytes_chunk) = object
        .body
        .try_next()
        .await
        .map_err(|e| s3_failure(e.to_string()))?
    {
        output_file
            .write_all(&bytes_chunk)
            .await
            .map_err(|e| EngineError::io("writing download file", destination_path, e))?;
        total_bytes_downloaded += bytes_chunk.len();
    }
    output_file
        .flush()
        .await
        .map_err(|e| EngineError::io("writing download file", destination_path, e))?;

    info!(bytes = total_bytes_downloaded, uri = %s3_uri, "backup archive downloaded");
    Ok(destination_path.to_path_buf())
}
