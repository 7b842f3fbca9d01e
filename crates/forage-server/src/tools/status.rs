use super::install::ToolSummary;
use crate::context::Forage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forage_core::{json_result, ForageResult, ToolDescriptor};
use forage_mcp::ToolHandler;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningStatus {
    pub name: String,
    pub package_name: String,
    pub tools: Vec<ToolSummary>,
    pub started_at: DateTime<Utc>,
    /// `None` for servers started outside the manifest.
    pub installed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledStatus {
    pub name: String,
    pub package_name: String,
    pub auto_start: bool,
    pub installed_at: DateTime<Utc>,
    pub running: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusReport {
    pub running: Vec<RunningStatus>,
    pub installed: Vec<InstalledStatus>,
}

/// `forage_status`: what is installed and what is running.
pub struct StatusTool {
    forage: Arc<Forage>,
}

impl StatusTool {
    pub const NAME: &'static str = "forage_status";

    pub fn new(forage: Arc<Forage>) -> Self {
        Self { forage }
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            Self::NAME,
            "List the tools Forage has installed and is proxying: which servers are running, \
             what tools they provide and their install status.",
        )
    }

    pub async fn run(&self) -> ForageResult<StatusReport> {
        let installed = self.forage.manifest.list().await?;
        let by_name: HashMap<&str, _> = installed.iter().map(|t| (t.name.as_str(), t)).collect();
        let servers = self.forage.registry().list().await;

        let mut running: Vec<RunningStatus> = servers
            .values()
            .map(|server| {
                let record = by_name.get(server.name.as_str());
                RunningStatus {
                    name: server.name.clone(),
                    package_name: record
                        .map(|t| t.package_name.clone())
                        .unwrap_or_else(|| server.name.clone()),
                    tools: server
                        .tools
                        .iter()
                        .map(|t| ToolSummary {
                            name: t.name.clone(),
                            description: t.description.clone(),
                        })
                        .collect(),
                    started_at: server.started_at,
                    installed_at: record.map(|t| t.installed_at),
                }
            })
            .collect();
        running.sort_by(|a, b| a.name.cmp(&b.name));

        let installed = installed
            .iter()
            .map(|t| InstalledStatus {
                name: t.name.clone(),
                package_name: t.package_name.clone(),
                auto_start: t.auto_start,
                installed_at: t.installed_at,
                running: servers.contains_key(&t.name),
            })
            .collect();

        Ok(StatusReport { running, installed })
    }
}

#[async_trait]
impl ToolHandler for StatusTool {
    async fn call(&self, _arguments: Value) -> ForageResult<Value> {
        Ok(json_result(&self.run().await?)?)
    }
}
