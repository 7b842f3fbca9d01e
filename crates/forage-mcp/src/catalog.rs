//! Keeps the upstream host's tool catalog in step with running servers.

use crate::namespace::{self, WrappedTool};
use crate::registry::{ManagedServer, ProcessRegistry};
use async_trait::async_trait;
use forage_core::{ForageResult, LaunchSpec, ToolDescriptor};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Something the host can invoke when a catalog entry is called.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> ForageResult<Value>;
}

/// Opaque registration returned by [`CatalogHost::register_tool`].
pub trait CatalogHandle: Send + Sync {
    /// Name the entry was registered under.
    fn name(&self) -> &str;

    /// Remove the entry from the host catalog.
    fn remove(self: Box<Self>);
}

/// The upstream host that owns the outward-facing catalog.
pub trait CatalogHost: Send + Sync {
    /// Add one catalog entry. Fails if the name is already taken.
    fn register_tool(
        &self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> ForageResult<Box<dyn CatalogHandle>>;

    /// Tell the consumer to re-fetch the catalog.
    fn notify_catalog_changed(&self);
}

/// Handler behind a wrapped catalog entry: forwards to the owning server and
/// hands the child's result back untouched.
pub struct ProxiedTool {
    registry: Arc<ProcessRegistry>,
    server_name: String,
    tool_name: String,
}

impl ProxiedTool {
    pub fn new(registry: Arc<ProcessRegistry>, wrapped: &WrappedTool) -> Self {
        Self {
            registry,
            server_name: wrapped.server_name.clone(),
            tool_name: wrapped.original_name.clone(),
        }
    }
}

#[async_trait]
impl ToolHandler for ProxiedTool {
    async fn call(&self, arguments: Value) -> ForageResult<Value> {
        self.registry
            .call(&self.server_name, &self.tool_name, arguments)
            .await
    }
}

/// Outcome of [`CatalogSync::autostart`].
#[derive(Debug, Default, Clone, Serialize)]
pub struct AutostartReport {
    /// `(server, tool count)` for every server that came up.
    pub started: Vec<(String, usize)>,
    /// `(server, error)` for every server that did not.
    pub failed: Vec<(String, String)>,
}

/// Registers wrapped tools on start and removes them on stop.
///
/// Handles are kept per server name so uninstall removes exactly what
/// install added.
pub struct CatalogSync {
    host: Arc<dyn CatalogHost>,
    registry: Arc<ProcessRegistry>,
    handles: parking_lot::Mutex<HashMap<String, Vec<Box<dyn CatalogHandle>>>>,
}

impl CatalogSync {
    pub fn new(host: Arc<dyn CatalogHost>, registry: Arc<ProcessRegistry>) -> Self {
        Self {
            host,
            registry,
            handles: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// The process registry calls are forwarded to.
    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Register every tool of `server` and notify the host once.
    ///
    /// Re-registering a server replaces its previous entries. If the host
    /// rejects one entry, the entries already added for this server are
    /// removed again and the error is returned.
    pub fn register_server(&self, server: &ManagedServer) -> ForageResult<usize> {
        let previous = self.handles.lock().remove(&server.name);
        if let Some(previous) = previous {
            debug!(server = %server.name, count = previous.len(), "Replacing catalog entries");
            previous.into_iter().for_each(|h| h.remove());
        }

        let mut added: Vec<Box<dyn CatalogHandle>> = Vec::with_capacity(server.tools.len());
        for tool in &server.tools {
            let wrapped = namespace::wrap(&server.name, tool);
            let handler = Arc::new(ProxiedTool::new(self.registry.clone(), &wrapped));
            match self.host.register_tool(wrapped.descriptor(), handler) {
                Ok(handle) => added.push(handle),
                Err(e) => {
                    warn!(server = %server.name, tool = %wrapped.name, error = %e, "Catalog registration failed");
                    added.into_iter().for_each(|h| h.remove());
                    return Err(e);
                }
            }
        }

        let count = added.len();
        self.handles.lock().insert(server.name.clone(), added);
        self.host.notify_catalog_changed();
        info!(server = %server.name, tools = count, "Registered proxied tools");
        Ok(count)
    }

    /// Remove every entry recorded for `server_name` and notify the host.
    ///
    /// Returns how many entries were removed; unknown names are a no-op.
    pub fn unregister_server(&self, server_name: &str) -> usize {
        let Some(handles) = self.handles.lock().remove(server_name) else {
            debug!(server = %server_name, "No catalog entries to remove");
            return 0;
        };

        let count = handles.len();
        handles.into_iter().for_each(|h| h.remove());
        self.host.notify_catalog_changed();
        info!(server = %server_name, tools = count, "Removed proxied tools");
        count
    }

    /// Wrapped names currently registered for `server_name`.
    pub fn registered_tools(&self, server_name: &str) -> Vec<String> {
        self.handles
            .lock()
            .get(server_name)
            .map(|hs| hs.iter().map(|h| h.name().to_string()).collect())
            .unwrap_or_default()
    }

    /// Start a server and register its tools. A stop for the same name waits
    /// until registration is done; a rejected registration stops the server.
    pub async fn start_and_register(&self, spec: &LaunchSpec) -> ForageResult<Arc<ManagedServer>> {
        self.registry
            .start_with(spec, |server| self.register_server(server).map(|_| ()))
            .await
    }

    /// Stop a server and remove its entries in one step, so a concurrent
    /// install of the same name cannot interleave. Entries are removed even
    /// when nothing was running. Returns how many entries were removed.
    pub async fn stop_and_unregister(&self, server_name: &str) -> usize {
        let mut removed = 0;
        self.registry
            .stop_with(server_name, || removed = self.unregister_server(server_name))
            .await;
        removed
    }

    /// Start each spec in order. One failure never stops the rest.
    pub async fn autostart(&self, specs: &[LaunchSpec]) -> AutostartReport {
        let mut report = AutostartReport::default();
        if specs.is_empty() {
            return report;
        }

        info!(count = specs.len(), "Auto-starting tools from manifest");
        for spec in specs {
            match self.start_and_register(spec).await {
                Ok(server) => {
                    info!(server = %spec.name, tools = server.tool_count(), "Auto-started");
                    report.started.push((spec.name.clone(), server.tool_count()));
                }
                Err(e) => {
                    if e.is_start_error() {
                        warn!(server = %spec.name, command = %spec.command_line(), error = %e, "Failed to auto-start");
                    } else {
                        warn!(server = %spec.name, error = %e, "Auto-started server could not be registered");
                    }
                    report.failed.push((spec.name.clone(), e.to_string()));
                }
            }
        }
        report
    }
}
