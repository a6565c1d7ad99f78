use regex::Regex;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use super::request::RestoreRequest;
use crate::errors::ConfigError;

// RFC 1123 label, as used for cluster, namespace and node names
static DNS_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("label pattern is valid")
});

static BACKUP_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("backup id pattern is valid")
});

const MAX_LABEL_LEN: usize = 63;
const MAX_BACKUP_ID_LEN: usize = 253;

/// Checks the request fields on their own, before anything is looked up.
pub fn validate_request_fields(request: &RestoreRequest) -> Result<(), ConfigError> {
    if request.target_path.as_os_str().is_empty() {
        return Err(ConfigError::MissingField { field: "pg_data" });
    }
    if !request.target_path.is_absolute() {
        return Err(ConfigError::RelativeTargetPath {
            path: request.target_path.clone(),
        });
    }

    require("backup_name", &request.backup_id)?;
    require("cluster_name", &request.cluster_name)?;
    require("namespace", &request.namespace)?;

    validate_dns_label("cluster_name", &request.cluster_name)?;
    validate_dns_label("namespace", &request.namespace)?;
    if let Some(node) = &request.origin_node {
        validate_dns_label("parent_node", node)?;
    }
    validate_backup_id(&request.backup_id)
}

/// The password file must be absolute, readable, non-empty and outside the
/// data directory.
pub fn validate_credentials_file(path: &Path, target_path: &Path) -> Result<(), ConfigError> {
    if !path.is_absolute() {
        return Err(ConfigError::RelativeCredentialsPath {
            path: path.to_path_buf(),
        });
    }
    if normalize_lexically(path).starts_with(normalize_lexically(target_path)) {
        return Err(ConfigError::CredentialsInsideTarget {
            path: path.to_path_buf(),
        });
    }
    let content = fs::read_to_string(path).map_err(|source| ConfigError::CredentialsUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Err(ConfigError::CredentialsEmpty {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Resolves `.` and `..` without touching the filesystem; the target
/// directory does not exist yet.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

fn require(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField { field });
    }
    Ok(())
}

fn validate_dns_label(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidIdentifier {
        field,
        value: value.to_string(),
        reason,
    };
    if value.len() > MAX_LABEL_LEN {
        return Err(invalid("longer than 63 characters"));
    }
    if !DNS_LABEL_RE.is_match(value) {
        return Err(invalid(
            "must be lowercase alphanumerics or '-', starting and ending alphanumeric",
        ));
    }
    Ok(())
}

fn validate_backup_id(value: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidIdentifier {
        field: "backup_name",
        value: value.to_string(),
        reason,
    };
    if value.len() > MAX_BACKUP_ID_LEN {
        return Err(invalid("longer than 253 characters"));
    }
    if !BACKUP_ID_RE.is_match(value) {
        return Err(invalid("must be alphanumerics, '.', '_' or '-', starting alphanumeric"));
    }
    Ok(())
}
