//! Append-only record of install and uninstall attempts.

use chrono::{DateTime, Utc};
use forage_core::{ForageResult, Source};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

pub const INSTALL_LOG_FILE: &str = "install-log.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogAction {
    Install,
    Uninstall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: LogAction,
    pub package_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEntry {
    fn new(action: LogAction, package_name: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            package_name: package_name.into(),
            version: None,
            source: None,
            success: true,
            error: None,
        }
    }

    pub fn install(package_name: impl Into<String>) -> Self {
        Self::new(LogAction::Install, package_name)
    }

    pub fn uninstall(package_name: impl Into<String>) -> Self {
        Self::new(LogAction::Uninstall, package_name)
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    /// Mark the attempt as failed with `error`.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// JSON Lines log at `<data_dir>/install-log.jsonl`.
pub struct InstallLog {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl InstallLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(INSTALL_LOG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a single line.
    pub async fn append(&self, entry: &LogEntry) -> ForageResult<()> {
        info!(
            action = ?entry.action,
            package = %entry.package_name,
            success = entry.success,
            "install log"
        );

        let line = format!("{}\n", serde_json::to_string(entry)?);
        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Append, logging instead of failing. Used where the log is advisory.
    pub async fn record(&self, entry: LogEntry) {
        if let Err(e) = self.append(&entry).await {
            warn!(path = %self.path.display(), error = %e, "Failed to write install log");
        }
    }

    /// Every readable entry, oldest first. Malformed lines are skipped.
    pub async fn entries(&self) -> ForageResult<Vec<LogEntry>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(data
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect())
    }
}
