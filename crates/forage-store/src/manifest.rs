//! The install manifest: which servers are installed and how to start them.

use crate::record::InstalledTool;
use async_trait::async_trait;
use forage_core::{ForageError, ForageResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const MANIFEST_FILE: &str = "manifest.json";

const MANIFEST_VERSION: u32 = 1;

/// On-disk manifest document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub tools: BTreeMap<String, InstalledTool>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            tools: BTreeMap::new(),
        }
    }
}

#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Every installed record, ordered by name.
    async fn list(&self) -> ForageResult<Vec<InstalledTool>>;

    /// Records flagged to start with Forage, ordered by name.
    async fn list_auto_start(&self) -> ForageResult<Vec<InstalledTool>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|t| t.auto_start)
            .collect())
    }

    async fn get(&self, name: &str) -> ForageResult<Option<InstalledTool>>;

    /// Insert or replace the record keyed by `tool.name`.
    async fn record_installed(&self, tool: InstalledTool) -> ForageResult<()>;

    /// Remove and return the record for `name`, if there was one.
    async fn record_removed(&self, name: &str) -> ForageResult<Option<InstalledTool>>;
}

/// JSON file manifest at `<data_dir>/manifest.json`.
///
/// A missing or unreadable file reads as an empty manifest. Writes go
/// through a temp file and a rename, serialized by an internal lock.
pub struct FileManifestStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Store at the standard file name inside `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(MANIFEST_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Manifest {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "Manifest unreadable, treating as empty");
                }
                return Manifest::default();
            }
        };
        match serde_json::from_str(&data) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Manifest malformed, treating as empty");
                Manifest::default()
            }
        }
    }

    async fn write(&self, manifest: &Manifest) -> ForageResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(manifest)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            ForageError::Manifest(format!("Failed to replace {}: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), tools = manifest.tools.len(), "Manifest written");
        Ok(())
    }
}

#[async_trait]
impl ManifestStore for FileManifestStore {
    async fn list(&self) -> ForageResult<Vec<InstalledTool>> {
        Ok(self.read().await.tools.into_values().collect())
    }

    async fn get(&self, name: &str) -> ForageResult<Option<InstalledTool>> {
        Ok(self.read().await.tools.remove(name))
    }

    async fn record_installed(&self, tool: InstalledTool) -> ForageResult<()> {
        let _guard = self.lock.lock().await;
        let mut manifest = self.read().await;
        manifest.tools.insert(tool.name.clone(), tool);
        self.write(&manifest).await
    }

    async fn record_removed(&self, name: &str) -> ForageResult<Option<InstalledTool>> {
        let _guard = self.lock.lock().await;
        let mut manifest = self.read().await;
        let Some(removed) = manifest.tools.remove(name) else {
            return Ok(None);
        };
        self.write(&manifest).await?;
        Ok(Some(removed))
    }
}
