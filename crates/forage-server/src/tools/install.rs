use super::parse_args;
use crate::context::Forage;
use async_trait::async_trait;
use forage_core::{json_result, ForageResult, ToolDescriptor};
use forage_mcp::ToolHandler;
use forage_store::{InstalledTool, LogEntry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallInput {
    pub package_name: String,
    /// Defaults to `npx`.
    #[serde(default)]
    pub command: Option<String>,
    /// Defaults to `["-y", package_name]`.
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallReport {
    pub success: bool,
    pub name: String,
    pub tools: Vec<ToolSummary>,
    pub message: String,
}

impl InstallReport {
    fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            name: name.into(),
            tools: Vec::new(),
            message: message.into(),
        }
    }
}

/// Manifest key for a package: leading `@` dropped, `/` replaced by `__`.
pub fn install_name(package_name: &str) -> String {
    package_name
        .strip_prefix('@')
        .unwrap_or(package_name)
        .replace('/', "__")
}

/// `forage_install`: start a server and make its tools available now.
pub struct InstallTool {
    forage: Arc<Forage>,
}

impl InstallTool {
    pub const NAME: &'static str = "forage_install";

    pub fn new(forage: Arc<Forage>) -> Self {
        Self { forage }
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            Self::NAME,
            "Install an MCP server and start it as a proxied subprocess. Its tools become \
             available immediately, no restart needed. Set confirm=true to proceed.",
        )
        .with_schema(serde_json::json!({
            "type": "object",
            "properties": {
                "packageName": {
                    "type": "string",
                    "description": "Package to install, e.g. '@modelcontextprotocol/server-filesystem'"
                },
                "command": {"type": "string", "description": "Command to run the server. Defaults to 'npx'."},
                "args": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Arguments for the command. Defaults to ['-y', packageName]."
                },
                "env": {
                    "type": "object",
                    "additionalProperties": {"type": "string"},
                    "description": "Environment variables for the server process."
                },
                "confirm": {
                    "type": "boolean",
                    "description": "Must be true to install. The user sees and approves this call."
                }
            },
            "required": ["packageName", "confirm"]
        }))
    }

    pub async fn run(&self, input: InstallInput) -> InstallReport {
        let package = input.package_name.trim().to_string();
        if package.is_empty() {
            return InstallReport::failed(package, "packageName must not be empty.");
        }

        if !input.confirm {
            return InstallReport::failed(
                &package,
                format!(
                    "Install requires confirmation. Call {} again with confirm: true to install \"{package}\".",
                    Self::NAME
                ),
            );
        }

        if self.forage.verify_packages {
            let missing = match self.forage.npm.package_exists(&package).await {
                Ok(true) => None,
                Ok(false) => Some("Package not found on npm".to_string()),
                Err(e) => Some(format!("Could not verify package on npm: {e}")),
            };
            if let Some(reason) = missing {
                warn!(package = %package, reason = %reason, "Install rejected");
                self.forage
                    .log
                    .record(LogEntry::install(&package).failed(&reason))
                    .await;
                return InstallReport::failed(&package, format!("{reason}: \"{package}\"."));
            }
        }

        let mut record = InstalledTool::new(
            install_name(&package),
            &package,
            input.command.unwrap_or_else(|| "npx".into()),
            input
                .args
                .unwrap_or_else(|| vec!["-y".into(), package.clone()]),
        );
        record.env = input.env.unwrap_or_default();

        let spec = record.to_launch_spec();
        let server = match self.forage.sync.start_and_register(&spec).await {
            Ok(server) => server,
            Err(e) => return self.fail(&package, format!("Failed to start \"{package}\": {e}")).await,
        };

        if let Err(e) = self.forage.manifest.record_installed(record.clone()).await {
            self.forage.sync.stop_and_unregister(&record.name).await;
            return self
                .fail(&package, format!("Failed to save \"{package}\" to the manifest: {e}"))
                .await;
        }

        self.forage
            .log
            .record(
                LogEntry::install(&package)
                    .with_version(&record.version)
                    .with_source(record.source),
            )
            .await;
        info!(package = %package, server = %record.name, tools = server.tool_count(), "Installed");

        InstallReport {
            success: true,
            name: record.name,
            tools: server
                .tools
                .iter()
                .map(|t| ToolSummary {
                    name: t.name.clone(),
                    description: t.description.clone(),
                })
                .collect(),
            message: format!(
                "Installed and started \"{package}\". {} tools now available.",
                server.tool_count()
            ),
        }
    }

    async fn fail(&self, package: &str, message: String) -> InstallReport {
        warn!(package, error = %message, "Install failed");
        self.forage
            .log
            .record(LogEntry::install(package).failed(&message))
            .await;
        InstallReport::failed(package, message)
    }
}

#[async_trait]
impl ToolHandler for InstallTool {
    async fn call(&self, arguments: Value) -> ForageResult<Value> {
        let input: InstallInput = parse_args(Self::NAME, arguments)?;
        Ok(json_result(&self.run(input).await)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_name() {
        assert_eq!(install_name("@modelcontextprotocol/server-github"), "modelcontextprotocol__server-github");
        assert_eq!(install_name("pg-mcp"), "pg-mcp");
        assert_eq!(install_name("a/b/c"), "a__b__c");
        assert_eq!(install_name("@@odd"), "@odd");
    }
}
