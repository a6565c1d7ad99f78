use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};

use super::recovery_target::{RecoveryTarget, quote_conf_value};
use crate::errors::EngineError;

pub const RECOVERY_SIGNAL_FILE: &str = "recovery.signal";
pub const AUTO_CONF_FILE: &str = "postgresql.auto.conf";

/// Default WAL fetch command for a catalog WAL directory.
pub fn copy_restore_command(wal_archive_dir: &Path) -> String {
    format!("cp {} '%p'", shell_quote(&format!("{}/%f", wal_archive_dir.display())))
}

/// Single-quotes `value` for `/bin/sh`, closing and reopening the quotes
/// around every embedded `'`.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Renders the block appended to `postgresql.auto.conf`.
pub fn render_recovery_settings(
    restore_command: Option<&str>,
    target: &RecoveryTarget,
    backup_id: &str,
    written_at: DateTime<Utc>,
) -> String {
    let mut block = format!(
        "\n# Recovery settings for backup {}, written {}\n",
        backup_id,
        written_at.to_rfc3339()
    );
    if let Some(command) = restore_command {
        block.push_str(&format!("restore_command = {}\n", quote_conf_value(command)));
    }
    block.push_str(&format!(
        "recovery_target_action = {}\n",
        quote_conf_value(target.action_or_default().as_str())
    ));
    for line in target.to_config_lines() {
        block.push_str(&line);
        block.push('\n');
    }
    block
}

/// Appends the recovery block and creates `recovery.signal` so the server
/// enters targeted recovery on its next start.
pub fn write_recovery_config(pgdata: &Path, settings: &str) -> Result<(), EngineError> {
    let auto_conf = pgdata.join(AUTO_CONF_FILE);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&auto_conf)
        .map_err(|e| EngineError::io("opening postgresql.auto.conf", &auto_conf, e))?;
    file.write_all(settings.as_bytes())
        .map_err(|e| EngineError::io("writing postgresql.auto.conf", &auto_conf, e))?;

    let signal = pgdata.join(RECOVERY_SIGNAL_FILE);
    fs::write(&signal, b"")
        .map_err(|e| EngineError::io("creating recovery.signal", &signal, e))?;
    Ok(())
}
