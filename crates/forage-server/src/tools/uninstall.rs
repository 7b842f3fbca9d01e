use super::parse_args;
use crate::context::Forage;
use async_trait::async_trait;
use forage_core::{json_result, ForageResult, ToolDescriptor};
use forage_mcp::ToolHandler;
use forage_store::LogEntry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UninstallInput {
    pub name: String,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UninstallReport {
    pub success: bool,
    pub message: String,
}

impl UninstallReport {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// `forage_uninstall`: stop a server and forget it.
pub struct UninstallTool {
    forage: Arc<Forage>,
}

impl UninstallTool {
    pub const NAME: &'static str = "forage_uninstall";

    pub fn new(forage: Arc<Forage>) -> Self {
        Self { forage }
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            Self::NAME,
            "Remove a previously installed tool. Stops the server and removes it from the \
             manifest. Set confirm=true to proceed.",
        )
        .with_schema(serde_json::json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Name of the installed tool, as shown by forage_status"
                },
                "confirm": {"type": "boolean", "description": "Must be true to uninstall."}
            },
            "required": ["name"]
        }))
    }

    pub async fn run(&self, input: UninstallInput) -> UninstallReport {
        let name = input.name;

        if !input.confirm {
            return match self.forage.manifest.get(&name).await {
                Ok(Some(tool)) => UninstallReport::failed(format!(
                    "Uninstall requires confirmation. Call {} again with confirm: true to remove \"{name}\" ({}).",
                    Self::NAME,
                    tool.package_name
                )),
                Ok(None) => not_installed(&name),
                Err(e) => UninstallReport::failed(format!("Failed to uninstall: {e}")),
            };
        }

        self.forage.sync.stop_and_unregister(&name).await;

        let removed = match self.forage.manifest.record_removed(&name).await {
            Ok(Some(tool)) => tool,
            Ok(None) => return not_installed(&name),
            Err(e) => {
                warn!(server = %name, error = %e, "Manifest update failed");
                self.forage
                    .log
                    .record(LogEntry::uninstall(&name).failed(e.to_string()))
                    .await;
                return UninstallReport::failed(format!("Failed to uninstall: {e}"));
            }
        };

        self.forage
            .log
            .record(LogEntry::uninstall(&removed.package_name).with_source(removed.source))
            .await;
        info!(server = %name, package = %removed.package_name, "Uninstalled");

        UninstallReport {
            success: true,
            message: format!(
                "Uninstalled \"{name}\" ({}). Stopped the server and removed its tools.",
                removed.package_name
            ),
        }
    }
}

fn not_installed(name: &str) -> UninstallReport {
    UninstallReport::failed(format!("Tool \"{name}\" is not installed."))
}

#[async_trait]
impl ToolHandler for UninstallTool {
    async fn call(&self, arguments: Value) -> ForageResult<Value> {
        let input: UninstallInput = parse_args(Self::NAME, arguments)?;
        Ok(json_result(&self.run(input).await)?)
    }
}
