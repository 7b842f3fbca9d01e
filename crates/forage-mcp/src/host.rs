//! Line-delimited JSON-RPC MCP server that exposes the Forage catalog to the
//! upstream agent.
//!
//! Requests are answered in arrival order except `tools/call`, which runs on
//! its own task so a slow child never blocks the catalog.

use crate::catalog::{CatalogHandle, CatalogHost, ToolHandler};
use crate::namespace;
use crate::protocol::*;
use forage_core::{error_result, ForageError, ForageResult, ToolDescriptor};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long `serve` waits for in-flight replies after the input closes.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct HostEntry {
    token: u64,
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

struct HostState {
    info: ServerInfo,
    tools: parking_lot::RwLock<BTreeMap<String, HostEntry>>,
    next_token: AtomicU64,
    // Upgrades only while a peer or an in-flight call holds the sender.
    outbound: parking_lot::Mutex<Option<mpsc::WeakUnboundedSender<String>>>,
}

/// Handle for one entry in a [`StdioHost`] catalog.
struct HostHandle {
    state: Weak<HostState>,
    name: String,
    token: u64,
}

impl CatalogHandle for HostHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn remove(self: Box<Self>) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut tools = state.tools.write();
        // A newer registration under the same name is left alone.
        if tools.get(&self.name).is_some_and(|e| e.token == self.token) {
            tools.remove(&self.name);
            debug!(tool = %self.name, "Catalog entry removed");
        }
    }
}

/// MCP server speaking JSON-RPC over a byte stream (stdio in production).
pub struct StdioHost {
    state: Arc<HostState>,
}

impl StdioHost {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            state: Arc::new(HostState {
                info: ServerInfo {
                    name: name.into(),
                    version: version.into(),
                },
                tools: parking_lot::RwLock::new(BTreeMap::new()),
                next_token: AtomicU64::new(1),
                outbound: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Names currently in the catalog, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        self.state.tools.read().keys().cloned().collect()
    }

    /// Whether `name` is currently in the catalog.
    pub fn has_tool(&self, name: &str) -> bool {
        self.state.tools.read().contains_key(name)
    }

    /// Invoke a catalog entry directly, bypassing the wire.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> ForageResult<Value> {
        let handler = self
            .state
            .tools
            .read()
            .get(name)
            .map(|e| e.handler.clone())
            .ok_or_else(|| ForageError::Catalog(unknown_tool_message(name)))?;
        handler.call(arguments).await
    }

    /// Serve the process's own stdin/stdout until stdin closes.
    pub async fn serve_stdio(&self) -> ForageResult<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one peer until `reader` reaches EOF.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> ForageResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *self.state.outbound.lock() = Some(tx.downgrade());

        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(line) = rx.recv().await {
                let written = async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = written {
                    warn!(error = %e, "Failed to write to MCP peer");
                    break;
                }
            }
        });

        info!(server = %self.state.info.name, "MCP host serving");
        let mut lines = BufReader::new(reader).lines();
        let read_result = loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        self.handle_line(trimmed, &tx);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(ForageError::Io(e)),
            }
        };

        drop(tx);
        if tokio::time::timeout(DRAIN_TIMEOUT, writer_task).await.is_err() {
            warn!("Timed out waiting for in-flight MCP replies");
        }
        self.state.outbound.lock().take();
        info!(server = %self.state.info.name, "MCP host input closed");
        read_result
    }

    fn handle_line(&self, line: &str, tx: &mpsc::UnboundedSender<String>) {
        let msg: IncomingMessage = match serde_json::from_str(line) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "Unparseable line from MCP peer");
                send(
                    tx,
                    OutgoingResponse::failure(
                        Value::Null,
                        JsonRpcError::new(codes::PARSE_ERROR, format!("Parse error: {e}")),
                    ),
                );
                return;
            }
        };

        let Some(method) = msg.method else {
            debug!(id = ?msg.id, "Ignoring response from MCP peer");
            return;
        };
        let Some(id) = msg.id else {
            debug!(method = %method, "Notification from MCP peer");
            return;
        };

        match method.as_str() {
            methods::INITIALIZE => {
                send(tx, OutgoingResponse::success(id, self.initialize_result(msg.params.as_ref())));
            }
            methods::PING => send(tx, OutgoingResponse::success(id, serde_json::json!({}))),
            methods::TOOLS_LIST => {
                let tools: Vec<ToolDescriptor> = self
                    .state
                    .tools
                    .read()
                    .values()
                    .map(|e| e.descriptor.clone())
                    .collect();
                send(tx, OutgoingResponse::success(id, serde_json::json!({ "tools": tools })));
            }
            methods::TOOLS_CALL => self.spawn_call(id, msg.params, tx.clone()),
            other => send(
                tx,
                OutgoingResponse::failure(
                    id,
                    JsonRpcError::new(codes::METHOD_NOT_FOUND, format!("Method not found: {other}")),
                ),
            ),
        }
    }

    fn initialize_result(&self, params: Option<&Value>) -> Value {
        let version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION);
        serde_json::json!({
            "protocolVersion": version,
            "capabilities": { "tools": { "listChanged": true } },
            "serverInfo": self.state.info,
        })
    }

    fn spawn_call(&self, id: Value, params: Option<Value>, tx: mpsc::UnboundedSender<String>) {
        let params: CallToolParams = match params.map(serde_json::from_value) {
            Some(Ok(p)) => p,
            _ => {
                send(
                    &tx,
                    OutgoingResponse::failure(
                        id,
                        JsonRpcError::new(codes::INVALID_PARAMS, "tools/call requires a tool name"),
                    ),
                );
                return;
            }
        };

        let entry = self.state.tools.read().get(&params.name).cloned();
        let Some(entry) = entry else {
            send(
                &tx,
                OutgoingResponse::failure(
                    id,
                    JsonRpcError::new(codes::INVALID_PARAMS, unknown_tool_message(&params.name)),
                ),
            );
            return;
        };

        let arguments = params.arguments.unwrap_or_else(|| serde_json::json!({}));
        let tool = params.name;
        tokio::spawn(async move {
            let result = match entry.handler.call(arguments).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(tool = %tool, error = %e, "Tool call failed");
                    error_result(e.to_string())
                }
            };
            send(&tx, OutgoingResponse::success(id, result));
        });
    }
}

impl CatalogHost for StdioHost {
    fn register_tool(
        &self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> ForageResult<Box<dyn CatalogHandle>> {
        let mut tools = self.state.tools.write();
        if tools.contains_key(&descriptor.name) {
            return Err(ForageError::Catalog(format!(
                "Tool '{}' is already registered",
                descriptor.name
            )));
        }

        let token = self.state.next_token.fetch_add(1, Ordering::SeqCst);
        let name = descriptor.name.clone();
        tools.insert(
            name.clone(),
            HostEntry {
                token,
                descriptor,
                handler,
            },
        );
        debug!(tool = %name, "Catalog entry added");

        Ok(Box::new(HostHandle {
            state: Arc::downgrade(&self.state),
            name,
            token,
        }))
    }

    fn notify_catalog_changed(&self) {
        let outbound = self.state.outbound.lock().as_ref().and_then(|w| w.upgrade());
        match outbound {
            Some(tx) => {
                let note = JsonRpcNotification::new(methods::TOOLS_LIST_CHANGED, None);
                match serde_json::to_string(&note) {
                    Ok(line) => {
                        let _ = tx.send(line);
                    }
                    Err(e) => warn!(error = %e, "Failed to encode list_changed"),
                }
            }
            None => debug!("No MCP peer connected, skipping list_changed"),
        }
    }
}

fn unknown_tool_message(name: &str) -> String {
    match namespace::unwrap(name) {
        Some((server, _)) => format!("Unknown tool: {name} (server \"{server}\" is not running)"),
        None => format!("Unknown tool: {name}"),
    }
}

fn send(tx: &mpsc::UnboundedSender<String>, response: OutgoingResponse) {
    match serde_json::to_string(&response) {
        Ok(line) => {
            let _ = tx.send(line);
        }
        Err(e) => warn!(error = %e, "Failed to encode MCP reply"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::io::AsyncReadExt;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, arguments: Value) -> ForageResult<Value> {
            Ok(serde_json::json!({"content": [{"type": "text", "text": arguments.to_string()}]}))
        }
    }

    struct Failing;

    #[async_trait]
    impl ToolHandler for Failing {
        async fn call(&self, _arguments: Value) -> ForageResult<Value> {
            Err(ForageError::NotRunning("pg".into()))
        }
    }

    struct Notifier(Arc<StdioHost>);

    #[async_trait]
    impl ToolHandler for Notifier {
        async fn call(&self, _arguments: Value) -> ForageResult<Value> {
            self.0.notify_catalog_changed();
            Ok(serde_json::json!({"content": []}))
        }
    }

    async fn exchange(host: &StdioHost, requests: &[Value]) -> Vec<Value> {
        let input: String = requests.iter().map(|r| format!("{r}\n")).collect();
        let (writer, mut reader) = tokio::io::duplex(1 << 20);
        host.serve(input.as_bytes(), writer).await.unwrap();

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        out.lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn by_id(replies: &[Value], id: i64) -> &Value {
        replies
            .iter()
            .find(|r| r["id"] == id)
            .unwrap_or_else(|| panic!("no reply with id {id}: {replies:?}"))
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let host = StdioHost::new("forage", "0.1.0");
        host.register_tool(ToolDescriptor::new("echo", "Echo"), Arc::new(Echo))
            .unwrap();

        let replies = exchange(
            &host,
            &[
                serde_json::json!({"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05"}}),
                serde_json::json!({"jsonrpc":"2.0","method":"notifications/initialized"}),
                serde_json::json!({"jsonrpc":"2.0","id":2,"method":"tools/list"}),
                serde_json::json!({"jsonrpc":"2.0","id":3,"method":"ping"}),
            ],
        )
        .await;

        assert_eq!(replies.len(), 3, "notifications get no reply");
        let init = by_id(&replies, 1);
        assert_eq!(init["result"]["capabilities"]["tools"]["listChanged"], true);
        assert_eq!(init["result"]["serverInfo"]["name"], "forage");
        let list = by_id(&replies, 2);
        assert_eq!(list["result"]["tools"][0]["name"], "echo");
        assert!(list["result"]["tools"][0]["inputSchema"].is_object());
        assert_eq!(by_id(&replies, 3)["result"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_call_success_and_failure() {
        let host = StdioHost::new("forage", "0.1.0");
        host.register_tool(ToolDescriptor::new("echo", ""), Arc::new(Echo))
            .unwrap();
        host.register_tool(ToolDescriptor::new("broken", ""), Arc::new(Failing))
            .unwrap();

        let replies = exchange(
            &host,
            &[
                serde_json::json!({"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo","arguments":{"x":1}}}),
                serde_json::json!({"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"broken"}}),
            ],
        )
        .await;

        let ok = by_id(&replies, 1);
        assert_eq!(ok["result"]["content"][0]["text"], "{\"x\":1}");
        let failed = by_id(&replies, 2);
        assert_eq!(failed["result"]["isError"], true);
        assert!(failed["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("not running"));
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let host = StdioHost::new("forage", "0.1.0");
        let input = concat!(
            "{not json}\n",
            r#"{"jsonrpc":"2.0","id":1,"method":"resources/list"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"forage__pg__query"}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{}}"#,
            "\n",
        );
        let (writer, mut reader) = tokio::io::duplex(1 << 16);
        host.serve(input.as_bytes(), writer).await.unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        let replies: Vec<Value> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();

        let parse = replies.iter().find(|r| r["id"].is_null()).unwrap();
        assert_eq!(parse["error"]["code"], codes::PARSE_ERROR);
        assert_eq!(by_id(&replies, 1)["error"]["code"], codes::METHOD_NOT_FOUND);
        let unknown = by_id(&replies, 2);
        assert_eq!(unknown["error"]["code"], codes::INVALID_PARAMS);
        assert!(unknown["error"]["message"]
            .as_str()
            .unwrap()
            .contains("server \"pg\" is not running"));
        assert_eq!(by_id(&replies, 3)["error"]["code"], codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_list_changed_is_sent_while_serving() {
        let host = Arc::new(StdioHost::new("forage", "0.1.0"));
        host.register_tool(
            ToolDescriptor::new("install", ""),
            Arc::new(Notifier(host.clone())),
        )
        .unwrap();

        let replies = exchange(
            &host,
            &[serde_json::json!({"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"install"}})],
        )
        .await;

        assert!(replies
            .iter()
            .any(|r| r["method"] == methods::TOOLS_LIST_CHANGED && r.get("id").is_none()));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let host = StdioHost::new("forage", "0.1.0");
        host.register_tool(ToolDescriptor::new("echo", ""), Arc::new(Echo))
            .unwrap();
        let err = host
            .register_tool(ToolDescriptor::new("echo", ""), Arc::new(Echo))
            .err()
            .unwrap();
        assert!(matches!(err, ForageError::Catalog(_)));
    }

    #[test]
    fn test_stale_handle_does_not_remove_newer_entry() {
        let host = StdioHost::new("forage", "0.1.0");
        let first = host
            .register_tool(ToolDescriptor::new("echo", ""), Arc::new(Echo))
            .unwrap();
        first.remove();
        assert!(!host.has_tool("echo"));

        let second = host
            .register_tool(ToolDescriptor::new("echo", ""), Arc::new(Echo))
            .unwrap();
        assert_eq!(second.name(), "echo");
        assert_eq!(host.tool_names(), vec!["echo".to_string()]);
    }

    #[test]
    fn test_notify_without_peer_is_noop() {
        let host = StdioHost::new("forage", "0.1.0");
        host.notify_catalog_changed();
    }

    #[tokio::test]
    async fn test_direct_call() {
        let host = StdioHost::new("forage", "0.1.0");
        host.register_tool(ToolDescriptor::new("echo", ""), Arc::new(Echo))
            .unwrap();
        let result = host.call_tool("echo", serde_json::json!({"a": 1})).await.unwrap();
        assert_eq!(result["content"][0]["text"], "{\"a\":1}");
        assert!(host.call_tool("nope", Value::Null).await.is_err());
    }
}
