//! MCP plumbing for Forage.
//!
//! Spawns child MCP servers over stdio, keeps one live session per logical
//! name, exposes their tools under collision-safe names and serves the
//! resulting catalog to the upstream agent.

pub mod catalog;
pub mod client;
pub mod host;
pub mod namespace;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use catalog::{AutostartReport, CatalogHandle, CatalogHost, CatalogSync, ProxiedTool, ToolHandler};
pub use client::{McpClient, StdioConnector};
pub use host::StdioHost;
pub use namespace::WrappedTool;
pub use registry::{ManagedServer, ProcessRegistry};
pub use transport::{Connector, Session};
