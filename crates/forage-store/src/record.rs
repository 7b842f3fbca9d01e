use chrono::{DateTime, Utc};
use forage_core::{LaunchSpec, Source};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A capability server the user installed, as persisted in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledTool {
    /// Manifest key and logical server name.
    pub name: String,
    pub package_name: String,
    pub version: String,
    pub source: Source,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Start this server when Forage starts.
    #[serde(default)]
    pub auto_start: bool,
    pub installed_at: DateTime<Utc>,
}

impl InstalledTool {
    /// A fresh npm install record that auto-starts.
    pub fn new(
        name: impl Into<String>,
        package_name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            package_name: package_name.into(),
            version: "latest".into(),
            source: Source::Npm,
            command: command.into(),
            args,
            env: HashMap::new(),
            auto_start: true,
            installed_at: Utc::now(),
        }
    }

    /// How to spawn this server.
    pub fn to_launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            name: self.name.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let tool = InstalledTool::new("pg", "pg-mcp", "npx", vec!["-y".into(), "pg-mcp".into()]);
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["packageName"], "pg-mcp");
        assert_eq!(json["autoStart"], true);
        assert_eq!(json["source"], "npm");
        assert_eq!(json["version"], "latest");
        assert!(json.get("env").is_none());
        assert!(json["installedAt"].is_string());
    }

    #[test]
    fn test_parses_foreign_record() {
        let tool: InstalledTool = serde_json::from_value(serde_json::json!({
            "name": "modelcontextprotocol__server-github",
            "packageName": "@modelcontextprotocol/server-github",
            "version": "latest",
            "source": "official-registry",
            "command": "npx",
            "args": ["-y", "@modelcontextprotocol/server-github"],
            "env": {"GITHUB_TOKEN": "t"},
            "autoStart": false,
            "installedAt": "2025-03-01T12:00:00.000Z",
            "rules": "ignored"
        }))
        .unwrap();
        assert_eq!(tool.source, Source::OfficialRegistry);
        assert!(!tool.auto_start);

        let spec = tool.to_launch_spec();
        assert_eq!(spec.name, "modelcontextprotocol__server-github");
        assert_eq!(spec.env.get("GITHUB_TOKEN").unwrap(), "t");
        assert_eq!(spec.command_line(), "npx -y @modelcontextprotocol/server-github");
    }
}
