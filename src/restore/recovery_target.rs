// pgdata-restore/src/restore/recovery_target.rs
//! Parsing of recovery target expressions given as PostgreSQL options, e.g.
//! `recovery_target_time = '2024-01-01 03:00:00+00'; recovery_target_inclusive = off`.

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use crate::errors::RecoveryTargetError;

static OPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*('(?:[^']|'')*'|[^\s']+)\s*$")
        .expect("recovery option pattern is valid")
});

static LSN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{1,8}/[0-9A-Fa-f]{1,8}$").expect("LSN pattern is valid")
});

/// The point recovery stops at. Only one may be set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    Immediate,
    Name(String),
    Time(DateTime<FixedOffset>),
    Xid(u64),
    Lsn(String),
}

impl TargetKind {
    fn option_name(&self) -> &'static str {
        match self {
            TargetKind::Immediate => "recovery_target",
            TargetKind::Name(_) => "recovery_target_name",
            TargetKind::Time(_) => "recovery_target_time",
            TargetKind::Xid(_) => "recovery_target_xid",
            TargetKind::Lsn(_) => "recovery_target_lsn",
        }
    }

    fn value(&self) -> String {
        match self {
            TargetKind::Immediate => "immediate".to_string(),
            TargetKind::Name(name) => name.clone(),
            TargetKind::Time(time) => time.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string(),
            TargetKind::Xid(xid) => xid.to_string(),
            TargetKind::Lsn(lsn) => lsn.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeline {
    Current,
    Latest,
    Id(u32),
}

impl fmt::Display for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeline::Current => f.write_str("current"),
            Timeline::Latest => f.write_str("latest"),
            Timeline::Id(id) => write!(f, "{}", id),
        }
    }
}

/// What the server does once the target is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryAction {
    Pause,
    #[default]
    Promote,
    Shutdown,
}

impl RecoveryAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryAction::Pause => "pause",
            RecoveryAction::Promote => "promote",
            RecoveryAction::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryTarget {
    pub kind: Option<TargetKind>,
    pub inclusive: Option<bool>,
    pub timeline: Option<Timeline>,
    pub action: Option<RecoveryAction>,
}

impl RecoveryTarget {
    /// Parses a list of `name = value` options separated by newlines, `;` or `,`.
    /// Blank input means "recover to the latest available point".
    pub fn parse(input: &str) -> Result<Self, RecoveryTargetError> {
        let mut target = RecoveryTarget::default();
        let mut seen: Vec<String> = Vec::new();

        for fragment in split_options(input) {
            if fragment.trim().is_empty() {
                continue;
            }
            let captures = OPTION_RE
                .captures(fragment)
                .ok_or_else(|| RecoveryTargetError::Syntax {
                    fragment: fragment.trim().to_string(),
                })?;
            let name = captures[1].to_ascii_lowercase();
            let value = unquote(&captures[2]);

            if seen.contains(&name) {
                return Err(RecoveryTargetError::DuplicateOption { name });
            }
            seen.push(name.clone());

            target.apply(&name, value)?;
        }

        Ok(target)
    }

    pub fn is_latest(&self) -> bool {
        self.kind.is_none()
    }

    pub fn action_or_default(&self) -> RecoveryAction {
        self.action.unwrap_or_default()
    }

    /// Target settings in `postgresql.conf` syntax. The recovery action is
    /// left to the caller, which supplies the default.
    pub fn to_config_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(kind) = &self.kind {
            lines.push(format!("{} = {}", kind.option_name(), quote_conf_value(&kind.value())));
        }
        if let Some(inclusive) = self.inclusive {
            let value = if inclusive { "on" } else { "off" };
            lines.push(format!("recovery_target_inclusive = {}", quote_conf_value(value)));
        }
        if let Some(timeline) = self.timeline {
            lines.push(format!(
                "recovery_target_timeline = {}",
                quote_conf_value(&timeline.to_string())
            ));
        }
        lines
    }

    fn apply(&mut self, name: &str, value: String) -> Result<(), RecoveryTargetError> {
        let invalid = || RecoveryTargetError::InvalidValue {
            name: name.to_string(),
            value: value.clone(),
        };

        match name {
            "recovery_target" => {
                if value != "immediate" {
                    return Err(invalid());
                }
                self.set_kind(TargetKind::Immediate)
            }
            "recovery_target_name" => {
                if value.is_empty() {
                    return Err(invalid());
                }
                self.set_kind(TargetKind::Name(value))
            }
            "recovery_target_time" => {
                let time = parse_target_time(&value).ok_or_else(invalid)?;
                self.set_kind(TargetKind::Time(time))
            }
            "recovery_target_xid" => {
                let xid = value.parse::<u64>().map_err(|_| invalid())?;
                self.set_kind(TargetKind::Xid(xid))
            }
            "recovery_target_lsn" => {
                if !LSN_RE.is_match(&value) {
                    return Err(invalid());
                }
                self.set_kind(TargetKind::Lsn(value.to_ascii_uppercase()))
            }
            "recovery_target_inclusive" => {
                self.inclusive = Some(match value.to_ascii_lowercase().as_str() {
                    "on" | "true" | "1" => true,
                    "off" | "false" | "0" => false,
                    _ => return Err(invalid()),
                });
                Ok(())
            }
            "recovery_target_timeline" => {
                self.timeline = Some(match value.to_ascii_lowercase().as_str() {
                    "current" => Timeline::Current,
                    "latest" => Timeline::Latest,
                    other => Timeline::Id(other.parse::<u32>().map_err(|_| invalid())?),
                });
                Ok(())
            }
            "recovery_target_action" => {
                self.action = Some(match value.to_ascii_lowercase().as_str() {
                    "pause" => RecoveryAction::Pause,
                    "promote" => RecoveryAction::Promote,
                    "shutdown" => RecoveryAction::Shutdown,
                    _ => return Err(invalid()),
                });
                Ok(())
            }
            _ => Err(RecoveryTargetError::UnknownOption {
                name: name.to_string(),
            }),
        }
    }

    fn set_kind(&mut self, kind: TargetKind) -> Result<(), RecoveryTargetError> {
        if let Some(existing) = &self.kind {
            return Err(RecoveryTargetError::MultipleTargets {
                first: existing.option_name().to_string(),
                second: kind.option_name().to_string(),
            });
        }
        self.kind = Some(kind);
        Ok(())
    }
}

/// Quotes a value for `postgresql.conf`, doubling embedded single quotes.
pub(crate) fn quote_conf_value(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn parse_target_time(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .ok()
}

fn unquote(raw: &str) -> String {
    match raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Some(inner) => inner.replace("''", "'"),
        None => raw.to_string(),
    }
}

/// Splits on separators that are not inside single quotes.
fn split_options(input: &str) -> Vec<&str> {
    let mut fragments = Vec::new();
    let mut in_quote = false;
    let mut start = 0;

    for (idx, ch) in input.char_indices() {
        match ch {
            '\'' => in_quote = !in_quote,
            '\n' | ';' | ',' if !in_quote => {
                fragments.push(&input[start..idx]);
                start = idx + ch.len_utf8();
            }
            _ => {}
        }
    }
    fragments.push(&input[start..]);
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_input_means_latest() -> anyhow::Result<()> {
        assert!(RecoveryTarget::parse("")?.is_latest());
        assert!(RecoveryTarget::parse("  \n ")?.is_latest());
        assert!(RecoveryTarget::parse("")?.to_config_lines().is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_time_target_with_options() -> anyhow::Result<()> {
        let target = RecoveryTarget::parse(
            "recovery_target_time = '2024-01-01 03:00:00+00'; recovery_target_inclusive = off\n\
             recovery_target_action = pause",
        )?;

        let expected = DateTime::parse_from_rfc3339("2024-01-01T03:00:00Z")?;
        assert_eq!(target.kind, Some(TargetKind::Time(expected)));
        assert_eq!(target.inclusive, Some(false));
        assert_eq!(target.action_or_default(), RecoveryAction::Pause);
        assert_eq!(
            target.to_config_lines(),
            vec![
                "recovery_target_time = '2024-01-01 03:00:00+00:00'".to_string(),
                "recovery_target_inclusive = 'off'".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_parse_lsn_and_timeline() -> anyhow::Result<()> {
        let target = RecoveryTarget::parse(
            "recovery_target_lsn = '0/3000a60', recovery_target_timeline = latest",
        )?;
        assert_eq!(target.kind, Some(TargetKind::Lsn("0/3000A60".to_string())));
        assert_eq!(target.timeline, Some(Timeline::Latest));
        assert_eq!(target.action_or_default(), RecoveryAction::Promote);
        Ok(())
    }

    #[test]
    fn test_quoted_name_keeps_separators_and_quotes() -> anyhow::Result<()> {
        let target =
            RecoveryTarget::parse("recovery_target_name = 'before; the, ''big'' migration'")?;
        assert_eq!(
            target.kind,
            Some(TargetKind::Name("before; the, 'big' migration".to_string()))
        );
        assert_eq!(
            target.to_config_lines(),
            vec!["recovery_target_name = 'before; the, ''big'' migration'".to_string()]
        );
        Ok(())
    }

    #[test]
    fn test_rejects_multiple_targets() {
        let err = RecoveryTarget::parse("recovery_target_xid = 42; recovery_target = immediate")
            .unwrap_err();
        assert_eq!(
            err,
            RecoveryTargetError::MultipleTargets {
                first: "recovery_target_xid".to_string(),
                second: "recovery_target".to_string(),
            }
        );
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            RecoveryTarget::parse("restore_command = 'cp %f %p'"),
            Err(RecoveryTargetError::UnknownOption { .. })
        ));
        assert!(matches!(
            RecoveryTarget::parse("recovery_target_time = 'yesterday'"),
            Err(RecoveryTargetError::InvalidValue { .. })
        ));
        assert!(matches!(
            RecoveryTarget::parse("recovery_target_lsn = 'zz/10'"),
            Err(RecoveryTargetError::InvalidValue { .. })
        ));
        assert!(matches!(
            RecoveryTarget::parse("recovery_target = latest"),
            Err(RecoveryTargetError::InvalidValue { .. })
        ));
        assert!(matches!(
            RecoveryTarget::parse("recovery_target_name = 'unterminated"),
            Err(RecoveryTargetError::Syntax { .. })
        ));
        assert!(matches!(
            RecoveryTarget::parse(
                "recovery_target_inclusive = on; recovery_target_inclusive = off"
            ),
            Err(RecoveryTargetError::DuplicateOption { .. })
        ));
    }
}
