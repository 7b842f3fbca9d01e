//! MCP client: connects to an MCP server via stdio (subprocess) and
//! exchanges JSON-RPC 2.0 messages.

use crate::protocol::*;
use crate::transport::{Connector, Session};
use async_trait::async_trait;
use forage_core::{ForageError, ForageResult, LaunchSpec, ToolDescriptor};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;
type SharedStdin = Arc<Mutex<Option<ChildStdin>>>;

/// Grace period a child gets to exit after its stdin closes.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// MCP client that communicates with an MCP server over stdio.
pub struct McpClient {
    stdin: SharedStdin,
    child: Mutex<Child>,
    pending: PendingMap,
    next_id: AtomicU64,
    server_name: String,
    request_timeout: Duration,
}

impl McpClient {
    /// Spawn an MCP server subprocess and perform the initialization handshake.
    ///
    /// The child inherits the parent environment with `spec.env` layered on
    /// top, and is killed if the client is dropped without being closed.
    pub async fn connect(
        spec: &LaunchSpec,
        handshake_timeout: Duration,
        request_timeout: Duration,
    ) -> ForageResult<Self> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ForageError::Launch(format!(
                "Failed to spawn MCP server '{}' ({}): {e}",
                spec.name,
                spec.command_line()
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ForageError::Launch("MCP server stdin not available".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ForageError::Launch("MCP server stdout not available".into()))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let stdin: SharedStdin = Arc::new(Mutex::new(Some(stdin)));

        // Spawn reader task to process responses
        let pending_clone = pending.clone();
        let reader_stdin = stdin.clone();
        let reader_name = spec.name.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(server = %reader_name, "MCP server stdout closed");
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        if let Ok(IncomingMessage {
                            method: Some(method),
                            id,
                            ..
                        }) = serde_json::from_str::<IncomingMessage>(trimmed)
                        {
                            if let Some(id) = id {
                                answer_server_request(&reader_stdin, &reader_name, id, &method).await;
                            } else {
                                debug!(server = %reader_name, method = %method, "Notification from MCP server");
                            }
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                            Ok(resp) => {
                                if let Some(id) = resp.id {
                                    let mut map = pending_clone.lock().await;
                                    if let Some(tx) = map.remove(&id) {
                                        let _ = tx.send(resp);
                                    }
                                }
                            }
                            Err(e) => {
                                debug!(line = %trimmed, error = %e, "Non-JSON-RPC line from MCP server");
                            }
                        }
                    }
                    Err(e) => {
                        error!(server = %reader_name, error = %e, "Error reading MCP server stdout");
                        break;
                    }
                }
            }
            // Fail everything still in flight.
            pending_clone.lock().await.clear();
        });

        if let Some(stderr) = child.stderr.take() {
            let stderr_name = spec.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %stderr_name, line = %line, "MCP server stderr");
                }
            });
        }

        let client = Self {
            stdin,
            child: Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            server_name: spec.name.clone(),
            request_timeout,
        };

        if let Err(e) = client.handshake(handshake_timeout).await {
            let _ = client.close().await;
            return Err(e);
        }

        Ok(client)
    }

    async fn handshake(&self, timeout: Duration) -> ForageResult<()> {
        let init_result = tokio::time::timeout(timeout, self.initialize())
            .await
            .map_err(|_| {
                ForageError::Handshake(format!(
                    "MCP server '{}' did not answer initialize within {}s",
                    self.server_name,
                    timeout.as_secs()
                ))
            })?
            .map_err(as_handshake)?;

        info!(
            server = %self.server_name,
            version = %init_result.protocol_version,
            "MCP server initialized"
        );

        self.notify(methods::INITIALIZED, None)
            .await
            .map_err(as_handshake)
    }

    /// Send a JSON-RPC request and wait for the response.
    async fn request(&self, method: &str, params: Option<Value>) -> ForageResult<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);
        let msg = serde_json::to_string(&req)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut map = self.pending.lock().await;
            map.insert(id, tx);
        }

        if let Err(e) = self.write_line(&msg).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let resp = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => {
                return Err(ForageError::Close(format!(
                    "MCP server '{}' closed before answering '{method}'",
                    self.server_name
                )))
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(ForageError::Timeout(format!(
                    "MCP request '{method}' to '{}' timed out",
                    self.server_name
                )));
            }
        };

        if let Some(err) = &resp.error {
            return Err(ForageError::Remote {
                code: err.code,
                message: err.message.clone(),
            });
        }

        Ok(resp)
    }

    /// Send a JSON-RPC notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> ForageResult<()> {
        let note = JsonRpcNotification::new(method, Some(params.unwrap_or(serde_json::json!({}))));
        let serialized = serde_json::to_string(&note)?;
        self.write_line(&serialized).await
    }

    async fn write_line(&self, msg: &str) -> ForageResult<()> {
        write_line(&self.stdin, &self.server_name, msg).await
    }

    /// Perform the MCP initialize handshake.
    async fn initialize(&self) -> ForageResult<InitializeResult> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": format!("forage-proxy-{}", self.server_name),
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let resp = self.request(methods::INITIALIZE, Some(params)).await?;
        let result = resp
            .result
            .ok_or_else(|| ForageError::Handshake("Empty initialize result".into()))?;
        let result: InitializeResult = serde_json::from_value(result).map_err(|e| {
            ForageError::Handshake(format!("Failed to parse initialize result: {e}"))
        })?;

        Ok(result)
    }

    /// Get the server name.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }
}

#[async_trait]
impl Session for McpClient {
    async fn list_tools(&self) -> ForageResult<Vec<ToolDescriptor>> {
        let resp = self
            .request(methods::TOOLS_LIST, None)
            .await
            .map_err(|e| ForageError::Discovery(e.to_string()))?;
        let result = resp
            .result
            .ok_or_else(|| ForageError::Discovery("Empty tools/list result".into()))?;

        let tools: Vec<ToolDescriptor> = serde_json::from_value(
            result
                .get("tools")
                .cloned()
                .unwrap_or_else(|| serde_json::json!([])),
        )
        .map_err(|e| ForageError::Discovery(format!("Failed to parse tools: {e}")))?;

        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> ForageResult<Value> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });

        let resp = self.request(methods::TOOLS_CALL, Some(params)).await?;
        Ok(resp.result.unwrap_or(Value::Null))
    }

    async fn close(&self) -> ForageResult<()> {
        // Dropping stdin is the polite shutdown signal for stdio servers.
        self.stdin.lock().await.take();

        let mut child = self.child.lock().await;
        let exited = matches!(
            tokio::time::timeout(EXIT_GRACE, child.wait()).await,
            Ok(Ok(_))
        );
        if !exited {
            warn!(server = %self.server_name, "MCP server did not exit, killing");
            child
                .kill()
                .await
                .map_err(|e| ForageError::Close(format!("Failed to kill MCP server: {e}")))?;
        }

        self.pending.lock().await.clear();
        debug!(server = %self.server_name, "MCP session closed");
        Ok(())
    }
}

async fn write_line(stdin: &Mutex<Option<ChildStdin>>, server: &str, msg: &str) -> ForageResult<()> {
    let mut guard = stdin.lock().await;
    let stdin = guard
        .as_mut()
        .ok_or_else(|| ForageError::Close(format!("MCP session '{server}' is closed")))?;
    stdin
        .write_all(msg.as_bytes())
        .await
        .map_err(|e| ForageError::Close(format!("Failed to write to MCP stdin: {e}")))?;
    stdin
        .write_all(b"\n")
        .await
        .map_err(|e| ForageError::Close(format!("Failed to write newline: {e}")))?;
    stdin
        .flush()
        .await
        .map_err(|e| ForageError::Close(format!("Failed to flush stdin: {e}")))?;
    Ok(())
}

/// Reply to a request the child sent us. Only `ping` is supported.
async fn answer_server_request(
    stdin: &Mutex<Option<ChildStdin>>,
    server: &str,
    id: Value,
    method: &str,
) {
    let reply = if method == methods::PING {
        OutgoingResponse::success(id, serde_json::json!({}))
    } else {
        debug!(server, method, "Rejecting request from MCP server");
        OutgoingResponse::failure(
            id,
            JsonRpcError::new(codes::METHOD_NOT_FOUND, format!("Method not found: {method}")),
        )
    };
    let sent = match serde_json::to_string(&reply) {
        Ok(line) => write_line(stdin, server, &line).await,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = sent {
        debug!(server, method, error = %e, "Could not answer MCP server request");
    }
}

fn as_handshake(e: ForageError) -> ForageError {
    match e {
        ForageError::Handshake(_) => e,
        other => ForageError::Handshake(other.to_string()),
    }
}

/// [`Connector`] that launches children as stdio subprocesses.
#[derive(Debug, Clone)]
pub struct StdioConnector {
    handshake_timeout: Duration,
    request_timeout: Duration,
}

impl StdioConnector {
    /// Creates a connector with explicit handshake and per-request timeouts.
    pub fn new(handshake_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            handshake_timeout,
            request_timeout,
        }
    }
}

impl Default for StdioConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(60))
    }
}

#[async_trait]
impl Connector for StdioConnector {
    async fn connect(&self, spec: &LaunchSpec) -> ForageResult<Box<dyn Session>> {
        let client = McpClient::connect(spec, self.handshake_timeout, self.request_timeout).await?;
        Ok(Box::new(client))
    }
}
