use crate::transport::{Connector, Session};
use chrono::{DateTime, Utc};
use forage_core::{ForageError, ForageResult, LaunchSpec, ToolDescriptor};
use futures_util::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// One running child capability-server.
///
/// Only ever constructed after the handshake and tool discovery both
/// succeeded. The tool list is a snapshot taken at connect time.
pub struct ManagedServer {
    /// Logical server name (registry key).
    pub name: String,
    /// Launch spec the server was started from.
    pub spec: LaunchSpec,
    /// Tools discovered at connect time.
    pub tools: Vec<ToolDescriptor>,
    /// When the server finished starting.
    pub started_at: DateTime<Utc>,
    session: Box<dyn Session>,
}

impl ManagedServer {
    /// The transport session backing this server.
    pub fn session(&self) -> &dyn Session {
        self.session.as_ref()
    }

    /// Number of tools discovered at connect time.
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

impl std::fmt::Debug for ManagedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedServer")
            .field("name", &self.name)
            .field("command", &self.spec.command)
            .field("tools", &self.tools.len())
            .field("started_at", &self.started_at)
            .finish()
    }
}

/// Owns the live child-server sessions, keyed by logical name.
///
/// Entries are inserted only after a start fully succeeded and removed only
/// by [`ProcessRegistry::stop`], so the map never points at a half-built or
/// closed session. Start and stop for the same name are serialized by a
/// per-name gate that lives as long as the server does; `call` takes no gate.
pub struct ProcessRegistry {
    connector: Arc<dyn Connector>,
    servers: RwLock<HashMap<String, Arc<ManagedServer>>>,
    gates: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProcessRegistry {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            servers: RwLock::new(HashMap::new()),
            gates: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn gate(&self, name: &str) -> Arc<Mutex<()>> {
        self.gates
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Drop the gate for `name` unless another task is holding or waiting on it.
    fn release_gate(&self, name: &str, gate: &Arc<Mutex<()>>) {
        let mut gates = self.gates.lock();
        // One reference in the map, one held by the caller.
        if gates.get(name).is_some_and(|g| Arc::ptr_eq(g, gate)) && Arc::strong_count(gate) == 2 {
            gates.remove(name);
        }
    }

    /// Start a server, or return the running one registered under the same
    /// name without spawning anything.
    pub async fn start(&self, spec: &LaunchSpec) -> ForageResult<Arc<ManagedServer>> {
        self.start_with(spec, |_| Ok(())).await
    }

    /// Like [`start`](Self::start), then run `on_started` before any stop for
    /// the same name can interleave. If it fails the server is stopped again
    /// and its error returned.
    pub async fn start_with<F>(&self, spec: &LaunchSpec, on_started: F) -> ForageResult<Arc<ManagedServer>>
    where
        F: FnOnce(&ManagedServer) -> ForageResult<()> + Send,
    {
        let gate = self.gate(&spec.name);
        let guard = gate.lock().await;

        let result = match self.start_locked(spec).await {
            Ok(server) => match on_started(&server) {
                Ok(()) => Ok(server),
                Err(e) => {
                    self.stop_locked(&spec.name).await;
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };

        if result.is_err() {
            self.release_gate(&spec.name, &gate);
        }
        drop(guard);
        result
    }

    async fn start_locked(&self, spec: &LaunchSpec) -> ForageResult<Arc<ManagedServer>> {
        if let Some(existing) = self.servers.read().await.get(&spec.name) {
            debug!(server = %spec.name, "MCP server already running");
            return Ok(existing.clone());
        }

        info!(server = %spec.name, command = %spec.command_line(), "Starting MCP server");
        let session = self.connector.connect(spec).await?;

        let tools = match session.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    debug!(server = %spec.name, error = %close_err, "Close after failed discovery");
                }
                return Err(match e {
                    ForageError::Discovery(_) => e,
                    other => ForageError::Discovery(other.to_string()),
                });
            }
        };

        let server = Arc::new(ManagedServer {
            name: spec.name.clone(),
            spec: spec.clone(),
            tools,
            started_at: Utc::now(),
            session,
        });

        self.servers
            .write()
            .await
            .insert(spec.name.clone(), server.clone());

        info!(
            server = %spec.name,
            tools = server.tool_count(),
            "MCP server started"
        );
        Ok(server)
    }

    /// Stop a server. Returns whether one was registered under `name`.
    ///
    /// The entry is removed even when closing the session fails.
    pub async fn stop(&self, name: &str) -> bool {
        self.stop_with(name, || ()).await
    }

    /// Like [`stop`](Self::stop), then run `after_stop` before another start
    /// for the same name can begin. `after_stop` runs even when nothing was
    /// running.
    pub async fn stop_with<F>(&self, name: &str, after_stop: F) -> bool
    where
        F: FnOnce() + Send,
    {
        // Every running server has a gate, so no gate means nothing to stop.
        let gate = self.gates.lock().get(name).cloned();
        let Some(gate) = gate else {
            after_stop();
            return false;
        };
        let guard = gate.lock().await;

        let stopped = self.stop_locked(name).await;
        after_stop();

        self.release_gate(name, &gate);
        drop(guard);
        stopped
    }

    async fn stop_locked(&self, name: &str) -> bool {
        let Some(server) = self.servers.write().await.remove(name) else {
            return false;
        };

        if let Err(e) = server.session.close().await {
            warn!(server = %name, error = %e, "Error closing MCP server, removed anyway");
        }
        info!(server = %name, "MCP server stopped");
        true
    }

    /// Forward a tool call to the named server.
    ///
    /// The tool name is not validated here; the child decides.
    pub async fn call(&self, name: &str, tool: &str, arguments: Value) -> ForageResult<Value> {
        let server = self
            .servers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ForageError::NotRunning(name.to_string()))?;

        debug!(server = %name, tool = %tool, "Forwarding tool call");
        server.session.call_tool(tool, arguments).await
    }

    /// Snapshot of the running servers. May be stale by the time it is used.
    pub async fn list(&self) -> HashMap<String, Arc<ManagedServer>> {
        self.servers.read().await.clone()
    }

    /// Look up one running server.
    pub async fn get(&self, name: &str) -> Option<Arc<ManagedServer>> {
        self.servers.read().await.get(name).cloned()
    }

    /// Whether a server is registered under `name`.
    pub async fn is_running(&self, name: &str) -> bool {
        self.servers.read().await.contains_key(name)
    }

    /// Get the number of running servers.
    pub async fn len(&self) -> usize {
        self.servers.read().await.len()
    }

    /// Whether no server is running.
    pub async fn is_empty(&self) -> bool {
        self.servers.read().await.is_empty()
    }

    /// Stop every registered server concurrently.
    pub async fn stop_all(&self) {
        let names: Vec<String> = self.servers.read().await.keys().cloned().collect();
        if names.is_empty() {
            return;
        }
        info!(count = names.len(), "Stopping all MCP servers");
        join_all(names.iter().map(|name| self.stop(name))).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        connects: AtomicUsize,
        closes: AtomicUsize,
    }

    struct FakeSession {
        tools: Vec<ToolDescriptor>,
        fail_discovery: bool,
        fail_close: bool,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl Session for FakeSession {
        async fn list_tools(&self) -> ForageResult<Vec<ToolDescriptor>> {
            if self.fail_discovery {
                return Err(ForageError::Remote {
                    code: -32601,
                    message: "Method not found".into(),
                });
            }
            Ok(self.tools.clone())
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> ForageResult<Value> {
            Ok(serde_json::json!({"tool": name, "echo": arguments}))
        }

        async fn close(&self) -> ForageResult<()> {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(ForageError::Close("broken pipe".into()));
            }
            Ok(())
        }
    }

    struct FakeConnector {
        fail_discovery: bool,
        fail_close: bool,
        counters: Arc<Counters>,
    }

    impl FakeConnector {
        fn new() -> Self {
            Self {
                fail_discovery: false,
                fail_close: false,
                counters: Arc::new(Counters::default()),
            }
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, spec: &LaunchSpec) -> ForageResult<Box<dyn Session>> {
            if spec.command == "missing" {
                return Err(ForageError::Launch("not found".into()));
            }
            self.counters.connects.fetch_add(1, Ordering::SeqCst);
            // Give concurrent starters a chance to interleave.
            tokio::task::yield_now().await;
            Ok(Box::new(FakeSession {
                tools: vec![ToolDescriptor::new("query", "Run SQL")],
                fail_discovery: self.fail_discovery,
                fail_close: self.fail_close,
                counters: self.counters.clone(),
            }))
        }
    }

    fn spec(name: &str) -> LaunchSpec {
        LaunchSpec::new(name, "fake-server")
    }

    impl ProcessRegistry {
        fn gate_count(&self) -> usize {
            self.gates.lock().len()
        }
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let connector = Arc::new(FakeConnector::new());
        let registry = ProcessRegistry::new(connector.clone());

        let first = registry.start(&spec("pg")).await.unwrap();
        let second = registry.start(&spec("pg")).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.counters.connects.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_start_spawns_once() {
        let connector = Arc::new(FakeConnector::new());
        let registry = Arc::new(ProcessRegistry::new(connector.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.start(&spec("pg")).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(connector.counters.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_discovery_leaves_no_entry() {
        let mut connector = FakeConnector::new();
        connector.fail_discovery = true;
        let connector = Arc::new(connector);
        let registry = ProcessRegistry::new(connector.clone());

        let err = registry.start(&spec("pg")).await.unwrap_err();
        assert!(matches!(err, ForageError::Discovery(_)), "got {err:?}");
        assert!(registry.is_empty().await);
        assert_eq!(connector.counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_launch_error_propagates() {
        let registry = ProcessRegistry::new(Arc::new(FakeConnector::new()));
        let err = registry
            .start(&LaunchSpec::new("pg", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, ForageError::Launch(_)));
        assert!(!registry.is_running("pg").await);
    }

    #[tokio::test]
    async fn test_stop_unknown_returns_false() {
        let registry = ProcessRegistry::new(Arc::new(FakeConnector::new()));
        assert!(!registry.stop("ghost").await);
    }

    #[tokio::test]
    async fn test_stop_removes_entry_even_if_close_fails() {
        let mut connector = FakeConnector::new();
        connector.fail_close = true;
        let registry = ProcessRegistry::new(Arc::new(connector));

        registry.start(&spec("pg")).await.unwrap();
        assert!(registry.stop("pg").await);
        assert!(!registry.is_running("pg").await);
        assert!(!registry.stop("pg").await);
    }

    #[tokio::test]
    async fn test_call_forwards_and_reports_not_running() {
        let registry = ProcessRegistry::new(Arc::new(FakeConnector::new()));
        registry.start(&spec("pg")).await.unwrap();

        let result = registry
            .call("pg", "query", serde_json::json!({"sql": "select 1"}))
            .await
            .unwrap();
        assert_eq!(result["tool"], "query");
        assert_eq!(result["echo"]["sql"], "select 1");

        let err = registry
            .call("ghost", "query", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ForageError::NotRunning(ref n) if n == "ghost"));
    }

    #[tokio::test]
    async fn test_stop_all_closes_every_session() {
        let connector = Arc::new(FakeConnector::new());
        let registry = ProcessRegistry::new(connector.clone());
        for name in ["a", "b", "c"] {
            registry.start(&spec(name)).await.unwrap();
        }

        registry.stop_all().await;

        assert!(registry.is_empty().await);
        assert_eq!(connector.counters.closes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gates_do_not_accumulate() {
        let registry = ProcessRegistry::new(Arc::new(FakeConnector::new()));

        assert!(!registry.stop("ghost").await);
        assert_eq!(registry.gate_count(), 0);

        registry.start(&spec("pg")).await.unwrap();
        assert_eq!(registry.gate_count(), 1);
        registry.stop("pg").await;
        assert_eq!(registry.gate_count(), 0);

        registry.start(&LaunchSpec::new("pg", "missing")).await.unwrap_err();
        assert_eq!(registry.gate_count(), 0);
    }

    #[tokio::test]
    async fn test_start_with_failure_stops_server() {
        let connector = Arc::new(FakeConnector::new());
        let registry = ProcessRegistry::new(connector.clone());

        let err = registry
            .start_with(&spec("pg"), |_| Err(ForageError::Catalog("taken".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, ForageError::Catalog(_)));
        assert!(!registry.is_running("pg").await);
        assert_eq!(connector.counters.closes.load(Ordering::SeqCst), 1);
        assert_eq!(registry.gate_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_with_runs_for_unknown_name() {
        let registry = ProcessRegistry::new(Arc::new(FakeConnector::new()));
        let mut ran = false;
        assert!(!registry.stop_with("ghost", || ran = true).await);
        assert!(ran);
    }

    #[tokio::test]
    async fn test_restart_after_stop_spawns_again() {
        let connector = Arc::new(FakeConnector::new());
        let registry = ProcessRegistry::new(connector.clone());

        registry.start(&spec("pg")).await.unwrap();
        registry.stop("pg").await;
        registry.start(&spec("pg")).await.unwrap();

        assert_eq!(connector.counters.connects.load(Ordering::SeqCst), 2);
        assert_eq!(registry.list().await.len(), 1);
    }
}
