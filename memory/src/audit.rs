//! Append-only audit log.
//!
//! One line per operation: `<RFC3339> <ACTION> [<chunkId>] [<details>]`,
//! where details are either a raw string or a single-line JSON object. The
//! log is advisory: by the time an entry is written the operation has
//! already committed to storage, so append failures are reported and
//! swallowed rather than surfaced to callers.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use tokio::io::AsyncWriteExt;

use crate::error::MemoryErr;
use crate::error::Result;
use crate::types::is_valid_chunk_id;

/// Log file name inside the data directory.
pub const AUDIT_FILE: &str = "audit.log";

/// Recognized audit actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Store,
    Update,
    Query,
    Retrieve,
    Relevant,
    Obsolete,
    Init,
    Reload,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditAction::Store => "STORE",
            AuditAction::Update => "UPDATE",
            AuditAction::Query => "QUERY",
            AuditAction::Retrieve => "RETRIEVE",
            AuditAction::Relevant => "RELEVANT",
            AuditAction::Obsolete => "OBSOLETE",
            AuditAction::Init => "INIT",
            AuditAction::Reload => "RELOAD",
        };
        f.write_str(s)
    }
}

impl FromStr for AuditAction {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "STORE" => Ok(AuditAction::Store),
            "UPDATE" => Ok(AuditAction::Update),
            "QUERY" => Ok(AuditAction::Query),
            "RETRIEVE" => Ok(AuditAction::Retrieve),
            "RELEVANT" => Ok(AuditAction::Relevant),
            "OBSOLETE" => Ok(AuditAction::Obsolete),
            "INIT" => Ok(AuditAction::Init),
            "RELOAD" => Ok(AuditAction::Reload),
            _ => Err(()),
        }
    }
}

/// A parsed audit log line.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub chunk_id: Option<String>,
    pub details: Option<String>,
}

/// Append-only operation log.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Log at `<data_dir>/audit.log`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(AUDIT_FILE),
        }
    }

    /// Ensure the log file and its parent directory exist.
    pub async fn initialize(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MemoryErr::io(parent, e))?;
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| MemoryErr::io(&self.path, e))?;
        Ok(())
    }

    /// Append one entry. Failures are logged at warn and swallowed; the
    /// calling operation has already committed.
    pub async fn log(&self, action: AuditAction, chunk_id: Option<&str>, details: Option<String>) {
        let mut line = format!(
            "{} {action}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        if let Some(id) = chunk_id {
            line.push(' ');
            line.push_str(id);
        }
        if let Some(details) = details {
            line.push(' ');
            line.push_str(&details);
        }
        line.push('\n');
        if let Err(e) = self.append(&line).await {
            tracing::warn!(error = %e, action = %action, "audit append failed");
        }
    }

    async fn append(&self, line: &str) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| MemoryErr::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| MemoryErr::io(&self.path, e))?;
        Ok(())
    }

    /// The raw log text: everything, or only lines whose leading timestamp
    /// is `>= since`.
    pub async fn read_since(&self, since: Option<DateTime<Utc>>) -> Result<String> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| MemoryErr::io(&self.path, e))?;
        let Some(since) = since else {
            return Ok(text);
        };
        let filtered: Vec<&str> = text
            .lines()
            .filter(|line| {
                line.split_whitespace()
                    .next()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .is_some_and(|t| t.with_timezone(&Utc) >= since)
            })
            .collect();
        Ok(filtered.join("\n"))
    }

    /// Parsed entries. A 6-hex token immediately after the action becomes
    /// the chunk id; the remaining text becomes the details.
    pub async fn entries(&self, since: Option<DateTime<Utc>>) -> Result<Vec<AuditEntry>> {
        let text = self.read_since(since).await?;
        Ok(text.lines().filter_map(parse_line).collect())
    }
}

fn parse_line(line: &str) -> Option<AuditEntry> {
    let mut parts = line.splitn(3, ' ');
    let timestamp = DateTime::parse_from_rfc3339(parts.next()?)
        .ok()?
        .with_timezone(&Utc);
    let action = parts.next()?.parse::<AuditAction>().ok()?;
    let rest = parts.next().unwrap_or("");
    let (chunk_id, details) = match rest.split_once(' ') {
        Some((first, tail)) if is_valid_chunk_id(first) => {
            (Some(first.to_string()), Some(tail.to_string()))
        }
        _ if is_valid_chunk_id(rest) => (Some(rest.to_string()), None),
        _ if rest.is_empty() => (None, None),
        _ => (None, Some(rest.to_string())),
    };
    Some(AuditEntry {
        timestamp,
        action,
        chunk_id,
        details,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn log_lines_have_timestamp_action_id_details() {
        let tmp = tempfile::tempdir().unwrap();
        let log = AuditLog::new(tmp.path());
        log.initialize().await.unwrap();

        log.log(AuditAction::Store, Some("a1b2c3"), Some(r#"{"type":"fact"}"#.to_string()))
            .await;
        log.log(AuditAction::Init, None, Some(r#"{"chunks":0}"#.to_string()))
            .await;

        let text = log.read_since(None).await.unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(" STORE a1b2c3 "));
        assert!(lines[1].contains(" INIT "));
    }

    #[tokio::test]
    async fn read_since_filters_by_timestamp() {
        let tmp = tempfile::tempdir().unwrap();
        let log = AuditLog::new(tmp.path());
        log.initialize().await.unwrap();

        log.log(AuditAction::Store, Some("a1b2c3"), None).await;
        // Logged timestamps are truncated to milliseconds; keep the cutoff
        // clear of both lines.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let cutoff = Utc::now();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        log.log(AuditAction::Update, Some("a1b2c3"), None).await;

        let text = log.read_since(Some(cutoff)).await.unwrap();
        let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("UPDATE"));
    }

    #[tokio::test]
    async fn entries_extract_chunk_id_and_details() {
        let tmp = tempfile::tempdir().unwrap();
        let log = AuditLog::new(tmp.path());
        log.initialize().await.unwrap();

        log.log(AuditAction::Obsolete, Some("a1b2c3"), Some("superseded".to_string()))
            .await;
        log.log(AuditAction::Query, None, Some(r#"{"query":"x"}"#.to_string()))
            .await;
        log.log(AuditAction::Reload, Some("d4e5f6"), None).await;

        let entries = log.entries(None).await.unwrap();
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].action, AuditAction::Obsolete);
        assert_eq!(entries[0].chunk_id.as_deref(), Some("a1b2c3"));
        assert_eq!(entries[0].details.as_deref(), Some("superseded"));

        assert_eq!(entries[1].action, AuditAction::Query);
        assert_eq!(entries[1].chunk_id, None);
        assert_eq!(entries[1].details.as_deref(), Some(r#"{"query":"x"}"#));

        assert_eq!(entries[2].chunk_id.as_deref(), Some("d4e5f6"));
        assert_eq!(entries[2].details, None);
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let log = AuditLog::new(tmp.path());
        log.initialize().await.unwrap();
        log.initialize().await.unwrap();
        assert_eq!(log.read_since(None).await.unwrap(), "");
    }
}
