//! Adapter for the official MCP server registry.

use crate::backend::{endpoint, get_json, SearchBackend, DEFAULT_HTTP_TIMEOUT, PAGE_SIZE};
use async_trait::async_trait;
use forage_core::{ForageResult, SearchResult, Source};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Public endpoint of the official registry.
pub const DEFAULT_BASE_URL: &str = "https://registry.modelcontextprotocol.io/v0";

/// A server listing as the official registry describes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDetails {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<Repository>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub packages: Vec<ServerPackage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One distributable package of a listed server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPackage {
    #[serde(default)]
    pub registry_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Extra launch arguments. Non-string entries are ignored.
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl ServerDetails {
    /// The first package published to npm, if any.
    pub fn npm_package(&self) -> Option<&ServerPackage> {
        self.packages.iter().find(|p| p.registry_type == "npm")
    }

    /// Repository link, if the listing has one.
    pub fn repository_url(&self) -> Option<&str> {
        self.repository.as_ref().and_then(|r| r.url.as_deref())
    }
}

impl ServerPackage {
    /// Installable identifier: `identifier`, else `name`.
    pub fn package_id(&self) -> Option<&str> {
        self.identifier.as_deref().or(self.name.as_deref())
    }

    fn string_arguments(&self) -> impl Iterator<Item = String> + '_ {
        self.arguments
            .iter()
            .filter_map(|a| a.as_str().map(str::to_string))
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    servers: Vec<SearchEntry>,
}

#[derive(Deserialize)]
struct SearchEntry {
    #[serde(default)]
    server: Option<ServerDetails>,
}

/// The details endpoint answers either `{ "server": {...} }` or the bare
/// object.
#[derive(Deserialize)]
#[serde(untagged)]
enum DetailsBody {
    Wrapped { server: ServerDetails },
    Bare(ServerDetails),
}

/// Client for the official registry.
pub struct OfficialRegistry {
    base_url: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl OfficialRegistry {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full listing for one server, or `None` when the registry has no such
    /// entry.
    pub async fn server_details(&self, name: &str) -> ForageResult<Option<ServerDetails>> {
        let url = endpoint(&self.base_url, &["servers", name], &[])?;
        let body: Option<DetailsBody> = get_json(&self.http, url, self.timeout).await?;
        Ok(body.map(|b| match b {
            DetailsBody::Wrapped { server } | DetailsBody::Bare(server) => server,
        }))
    }
}

impl Default for OfficialRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchBackend for OfficialRegistry {
    fn source(&self) -> Source {
        Source::OfficialRegistry
    }

    async fn search(&self, query: &str) -> ForageResult<Vec<SearchResult>> {
        let url = endpoint(
            &self.base_url,
            &["servers"],
            &[("search", query), ("limit", PAGE_SIZE)],
        )?;
        let body: Option<SearchResponse> = get_json(&self.http, url, self.timeout).await?;
        let hits: Vec<SearchResult> = body
            .map(|b| b.servers)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| entry.server)
            .filter_map(to_search_result)
            .collect();
        debug!(query, hits = hits.len(), "Official registry search");
        Ok(hits)
    }
}

fn to_search_result(server: ServerDetails) -> Option<SearchResult> {
    if server.name.is_empty() {
        return None;
    }

    let npm = server.npm_package();
    let package_name = npm
        .and_then(ServerPackage::package_id)
        .unwrap_or(&server.name)
        .to_string();

    let mut hit = SearchResult::new(
        &server.name,
        &package_name,
        server.description.clone().unwrap_or_default(),
        Source::OfficialRegistry,
    );
    hit.url = server.repository_url().map(str::to_string);
    hit.version = server
        .version
        .clone()
        .or_else(|| npm.and_then(|p| p.version.clone()));
    if let Some(pkg) = npm {
        let mut args = vec!["-y".to_string(), package_name];
        args.extend(pkg.string_arguments());
        hit.command = Some("npx".into());
        hit.args = Some(args);
    }
    Some(hit)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(v: Value) -> ServerDetails {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_npm_package_drives_launch_hint() {
        let server = parse(serde_json::json!({
            "name": "io.github.acme/postgres",
            "description": "Postgres access",
            "repository": {"url": "https://github.com/acme/pg"},
            "packages": [
                {"registryType": "pypi", "identifier": "acme-pg"},
                {"registryType": "npm", "identifier": "@acme/pg-mcp", "version": "1.2.0", "arguments": ["--ro", {"type": "named"}]}
            ]
        }));
        let hit = to_search_result(server).unwrap();
        assert_eq!(hit.package_name, "@acme/pg-mcp");
        assert_eq!(hit.version.as_deref(), Some("1.2.0"));
        assert_eq!(hit.url.as_deref(), Some("https://github.com/acme/pg"));
        assert_eq!(hit.command.as_deref(), Some("npx"));
        assert_eq!(hit.args.unwrap(), vec!["-y", "@acme/pg-mcp", "--ro"]);
    }

    #[test]
    fn test_without_npm_package_falls_back_to_server_name() {
        let hit = to_search_result(parse(serde_json::json!({"name": "remote-only", "version": "0.1.0"}))).unwrap();
        assert_eq!(hit.package_name, "remote-only");
        assert!(hit.command.is_none() && hit.args.is_none());
        assert_eq!(hit.description, "");
    }

    #[test]
    fn test_nameless_server_is_skipped() {
        assert!(to_search_result(ServerDetails::default()).is_none());
    }

    #[test]
    fn test_package_id_falls_back_to_name() {
        let pkg = ServerPackage {
            identifier: None,
            name: Some("legacy-name".into()),
            ..Default::default()
        };
        assert_eq!(pkg.package_id(), Some("legacy-name"));
    }
}
