use super::parse_args;
use crate::context::Forage;
use async_trait::async_trait;
use forage_core::{json_result, ForageResult, Source, ToolDescriptor};
use forage_mcp::ToolHandler;
use forage_registry::{PackageDetails, ServerDetails};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// README characters kept in an evaluation.
pub const README_LIMIT: usize = 3000;

const TRUNCATION_MARKER: &str = "\n\n... (truncated)";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateInput {
    pub package_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateReport {
    pub name: String,
    pub description: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_downloads: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_command: Option<String>,
    pub source: Source,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EvaluateOutcome {
    Found(EvaluateReport),
    NotFound { error: String },
}

/// `forage_evaluate`: details for one package before installing it.
pub struct EvaluateTool {
    forage: Arc<Forage>,
}

impl EvaluateTool {
    pub const NAME: &'static str = "forage_evaluate";

    pub fn new(forage: Arc<Forage>) -> Self {
        Self { forage }
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            Self::NAME,
            "Get details about a specific package: version, downloads, README summary and \
             install command. Use this before installing to check quality.",
        )
        .with_schema(serde_json::json!({
            "type": "object",
            "properties": {
                "packageName": {
                    "type": "string",
                    "description": "Package to evaluate, e.g. '@modelcontextprotocol/server-postgres'"
                }
            },
            "required": ["packageName"]
        }))
    }

    pub async fn run(&self, input: EvaluateInput) -> EvaluateOutcome {
        let package = input.package_name.as_str();
        let (official, npm) = tokio::join!(
            self.forage.official.server_details(package),
            self.forage.npm.package_details(package),
        );
        let official = official.unwrap_or_else(|e| {
            warn!(package, error = %e, "Official registry lookup failed");
            None
        });
        let npm = npm.unwrap_or_else(|e| {
            warn!(package, error = %e, "npm lookup failed");
            None
        });
        build_report(package, official, npm)
    }
}

#[async_trait]
impl ToolHandler for EvaluateTool {
    async fn call(&self, arguments: Value) -> ForageResult<Value> {
        let input: EvaluateInput = parse_args(Self::NAME, arguments)?;
        Ok(json_result(&self.run(input).await)?)
    }
}

fn build_report(
    package: &str,
    official: Option<ServerDetails>,
    npm: Option<PackageDetails>,
) -> EvaluateOutcome {
    if official.is_none() && npm.is_none() {
        return EvaluateOutcome::NotFound {
            error: format!("Package \"{package}\" not found in any registry"),
        };
    }

    let npm_pkg = official.as_ref().and_then(ServerDetails::npm_package);
    let install_command = match (npm_pkg.and_then(|p| p.package_id()), &npm) {
        (Some(id), _) => Some(format!("npx -y {id}")),
        (None, Some(_)) => Some(format!("npx -y {package}")),
        (None, None) => None,
    };

    let version = npm
        .as_ref()
        .map(|n| n.version.clone())
        .or_else(|| npm_pkg.and_then(|p| p.version.clone()))
        .or_else(|| official.as_ref().and_then(|o| o.version.clone()))
        .unwrap_or_else(|| "unknown".into());

    EvaluateOutcome::Found(EvaluateReport {
        name: official
            .as_ref()
            .map(|o| o.name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| package.to_string()),
        description: official
            .as_ref()
            .and_then(|o| o.description.clone())
            .or_else(|| npm.as_ref().map(|n| n.description.clone()))
            .unwrap_or_default(),
        version,
        repository: npm
            .as_ref()
            .and_then(|n| n.repository.clone())
            .or_else(|| official.as_ref().and_then(|o| o.repository_url().map(str::to_string))),
        weekly_downloads: npm.as_ref().and_then(|n| n.weekly_downloads),
        readme: npm.as_ref().and_then(|n| n.readme.as_deref()).map(truncate_readme),
        install_command,
        source: if official.is_some() {
            Source::OfficialRegistry
        } else {
            Source::Npm
        },
    })
}

fn truncate_readme(readme: &str) -> String {
    match readme.char_indices().nth(README_LIMIT) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &readme[..cut]),
        None => readme.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn npm_details(readme: &str) -> PackageDetails {
        PackageDetails {
            description: "npm description".into(),
            version: "1.4.0".into(),
            readme: Some(readme.into()),
            repository: Some("https://github.com/acme/pg".into()),
            weekly_downloads: Some(99),
        }
    }

    #[test]
    fn test_neither_registry() {
        assert_eq!(
            build_report("ghost", None, None),
            EvaluateOutcome::NotFound {
                error: "Package \"ghost\" not found in any registry".into()
            }
        );
    }

    #[test]
    fn test_npm_only() {
        let EvaluateOutcome::Found(report) = build_report("pg-mcp", None, Some(npm_details("# pg"))) else {
            panic!("expected a report");
        };
        assert_eq!(report.name, "pg-mcp");
        assert_eq!(report.source, Source::Npm);
        assert_eq!(report.version, "1.4.0");
        assert_eq!(report.install_command.as_deref(), Some("npx -y pg-mcp"));
        assert_eq!(report.readme.as_deref(), Some("# pg"));
    }

    #[test]
    fn test_official_wins_fields() {
        let official: ServerDetails = serde_json::from_value(serde_json::json!({
            "name": "io.github.acme/pg",
            "description": "Official description",
            "version": "0.9.0",
            "packages": [{"registryType": "npm", "identifier": "@acme/pg", "version": "0.9.1"}]
        }))
        .unwrap();
        let EvaluateOutcome::Found(report) = build_report("@acme/pg", Some(official), None) else {
            panic!("expected a report");
        };
        assert_eq!(report.name, "io.github.acme/pg");
        assert_eq!(report.description, "Official description");
        assert_eq!(report.version, "0.9.1");
        assert_eq!(report.install_command.as_deref(), Some("npx -y @acme/pg"));
        assert_eq!(report.source, Source::OfficialRegistry);
        assert!(report.readme.is_none());
    }

    #[test]
    fn test_readme_truncation() {
        let long = "é".repeat(README_LIMIT + 10);
        let cut = truncate_readme(&long);
        assert!(cut.ends_with("... (truncated)"));
        assert_eq!(cut.chars().count(), README_LIMIT + TRUNCATION_MARKER.chars().count());

        let exact = "a".repeat(README_LIMIT);
        assert_eq!(truncate_readme(&exact), exact);
    }
}
