//! Trait seams between the process registry and a concrete transport.

use async_trait::async_trait;
use forage_core::{ForageResult, LaunchSpec, ToolDescriptor};
use serde_json::Value;

/// One live connection to one child capability-server.
#[async_trait]
pub trait Session: Send + Sync {
    /// Lists the child's tools.
    async fn list_tools(&self) -> ForageResult<Vec<ToolDescriptor>>;

    /// Invokes one tool. The child's result is returned unmodified.
    async fn call_tool(&self, name: &str, arguments: Value) -> ForageResult<Value>;

    /// Closes the connection and releases the child process.
    ///
    /// Requests still waiting on this session fail with a close error.
    async fn close(&self) -> ForageResult<()>;
}

/// Spawns a child and completes the protocol handshake.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Fails with `Launch` when the process cannot be spawned and with
    /// `Handshake` when negotiation fails or times out.
    async fn connect(&self, spec: &LaunchSpec) -> ForageResult<Box<dyn Session>>;
}
