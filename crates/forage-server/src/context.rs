//! Shared state behind every meta-tool.

use forage_core::ForageResult;
use forage_mcp::{AutostartReport, CatalogHandle, CatalogHost, CatalogSync, ProcessRegistry};
use forage_registry::{NpmRegistry, OfficialRegistry, SearchAggregator};
use forage_store::{InstallLog, ManifestStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything the meta-tools operate on.
pub struct Forage {
    pub(crate) sync: Arc<CatalogSync>,
    pub(crate) manifest: Arc<dyn ManifestStore>,
    pub(crate) log: Arc<InstallLog>,
    pub(crate) search: Arc<SearchAggregator>,
    pub(crate) official: Arc<OfficialRegistry>,
    pub(crate) npm: Arc<NpmRegistry>,
    pub(crate) verify_packages: bool,
}

impl Forage {
    /// Context using the public registries and npm verification on.
    pub fn new(
        sync: Arc<CatalogSync>,
        manifest: Arc<dyn ManifestStore>,
        log: Arc<InstallLog>,
    ) -> Self {
        Self {
            sync,
            manifest,
            log,
            search: Arc::new(SearchAggregator::with_default_backends()),
            official: Arc::new(OfficialRegistry::new()),
            npm: Arc::new(NpmRegistry::new()),
            verify_packages: true,
        }
    }

    pub fn with_search(mut self, search: Arc<SearchAggregator>) -> Self {
        self.search = search;
        self
    }

    /// Registries used by evaluate and install verification.
    pub fn with_registries(mut self, official: Arc<OfficialRegistry>, npm: Arc<NpmRegistry>) -> Self {
        self.official = official;
        self.npm = npm;
        self
    }

    /// Whether install checks npm for the package first.
    pub fn with_package_verification(mut self, verify: bool) -> Self {
        self.verify_packages = verify;
        self
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        self.sync.registry()
    }

    pub fn catalog(&self) -> &Arc<CatalogSync> {
        &self.sync
    }

    pub fn manifest(&self) -> &Arc<dyn ManifestStore> {
        &self.manifest
    }

    /// Start every auto-start manifest entry and register its tools.
    pub async fn autostart(&self) -> ForageResult<AutostartReport> {
        let specs: Vec<_> = self
            .manifest
            .list_auto_start()
            .await?
            .iter()
            .map(|t| t.to_launch_spec())
            .collect();
        Ok(self.sync.autostart(&specs).await)
    }

    /// Stop every running child.
    pub async fn shutdown(&self) {
        let running = self.registry().len().await;
        info!(running, "Shutting down child servers");
        self.registry().stop_all().await;
    }
}

/// Register the meta-tools on `host`. Fails on the first rejected name,
/// after removing whatever was already added.
pub fn register_meta_tools(
    host: &dyn CatalogHost,
    forage: Arc<Forage>,
) -> ForageResult<Vec<Box<dyn CatalogHandle>>> {
    let mut handles = Vec::new();
    for (descriptor, handler) in crate::tools::meta_tools(forage) {
        let name = descriptor.name.clone();
        match host.register_tool(descriptor, handler) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                warn!(tool = %name, error = %e, "Failed to register meta-tool");
                handles.into_iter().for_each(|h| h.remove());
                return Err(e);
            }
        }
    }
    info!(count = handles.len(), "Meta-tools registered");
    Ok(handles)
}
