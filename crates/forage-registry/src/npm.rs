//! Adapter for the npm registry, plus the package lookups used when
//! evaluating and verifying installs.

use crate::backend::{endpoint, get_json, SearchBackend, DEFAULT_HTTP_TIMEOUT, PAGE_SIZE};
use async_trait::async_trait;
use forage_core::{ForageResult, SearchResult, Source};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://registry.npmjs.org";
pub const DEFAULT_DOWNLOADS_URL: &str = "https://api.npmjs.org";

const DOWNLOADS_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    objects: Vec<SearchObject>,
}

#[derive(Debug, Deserialize)]
struct SearchObject {
    package: NpmPackage,
}

#[derive(Debug, Deserialize)]
struct NpmPackage {
    name: String,
    description: Option<String>,
    version: Option<String>,
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct Links {
    repository: Option<String>,
    npm: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadsPoint {
    downloads: Option<u64>,
}

/// What the npm registry knows about one package.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDetails {
    pub description: String,
    /// The `latest` dist-tag, empty when unpublished.
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_downloads: Option<u64>,
}

/// Client for the npm registry and its download-count API.
pub struct NpmRegistry {
    base_url: String,
    downloads_url: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl NpmRegistry {
    pub fn new() -> Self {
        Self::with_base_urls(DEFAULT_BASE_URL, DEFAULT_DOWNLOADS_URL)
    }

    pub fn with_base_urls(base_url: impl Into<String>, downloads_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            downloads_url: downloads_url.into(),
            http: reqwest::Client::new(),
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn document(&self, package: &str) -> ForageResult<Option<Value>> {
        let url = endpoint(&self.base_url, &[package], &[])?;
        get_json(&self.http, url, self.timeout).await
    }

    /// Whether `package` is published on npm.
    pub async fn package_exists(&self, package: &str) -> ForageResult<bool> {
        Ok(self.document(package).await?.is_some())
    }

    /// Registry metadata for `package` with last week's download count.
    pub async fn package_details(&self, package: &str) -> ForageResult<Option<PackageDetails>> {
        let Some(doc) = self.document(package).await? else {
            return Ok(None);
        };

        let text = |key: &str| doc.get(key).and_then(Value::as_str).map(str::to_string);
        let repository = match doc.get("repository") {
            Some(Value::Object(repo)) => repo.get("url").and_then(Value::as_str).map(str::to_string),
            _ => None,
        };

        Ok(Some(PackageDetails {
            description: text("description").unwrap_or_default(),
            version: doc
                .pointer("/dist-tags/latest")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            readme: text("readme"),
            repository,
            weekly_downloads: self.weekly_downloads(package).await,
        }))
    }

    /// Download count for the last week. Failures read as unknown.
    pub async fn weekly_downloads(&self, package: &str) -> Option<u64> {
        let url = endpoint(
            &self.downloads_url,
            &["downloads", "point", "last-week", package],
            &[],
        )
        .ok()?;
        match get_json::<DownloadsPoint>(&self.http, url, DOWNLOADS_TIMEOUT).await {
            Ok(point) => point.and_then(|p| p.downloads),
            Err(e) => {
                debug!(package, error = %e, "Download count unavailable");
                None
            }
        }
    }
}

impl Default for NpmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchBackend for NpmRegistry {
    fn source(&self) -> Source {
        Source::Npm
    }

    async fn search(&self, query: &str) -> ForageResult<Vec<SearchResult>> {
        let text = format!("{query} mcp server");
        let url = endpoint(
            &self.base_url,
            &["-", "v1", "search"],
            &[("text", text.as_str()), ("size", PAGE_SIZE)],
        )?;
        let body: Option<SearchResponse> = get_json(&self.http, url, self.timeout).await?;
        let hits: Vec<SearchResult> = body
            .map(|b| b.objects)
            .unwrap_or_default()
            .into_iter()
            .map(|o| o.package)
            .filter(looks_like_mcp_server)
            .map(to_search_result)
            .collect();
        debug!(query, hits = hits.len(), "npm search");
        Ok(hits)
    }
}

fn looks_like_mcp_server(pkg: &NpmPackage) -> bool {
    let name = pkg.name.to_lowercase();
    let desc = pkg.description.as_deref().unwrap_or_default().to_lowercase();
    name.contains("mcp") || desc.contains("mcp") || desc.contains("model context protocol")
}

fn to_search_result(pkg: NpmPackage) -> SearchResult {
    let url = pkg
        .links
        .and_then(|l| l.repository.or(l.npm));
    let mut hit = SearchResult::new(
        &pkg.name,
        &pkg.name,
        pkg.description.unwrap_or_default(),
        Source::Npm,
    );
    hit.url = url;
    hit.version = pkg.version;
    hit.command = Some("npx".into());
    hit.args = Some(vec!["-y".into(), pkg.name]);
    hit
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pkg(name: &str, description: Option<&str>) -> NpmPackage {
        NpmPackage {
            name: name.into(),
            description: description.map(str::to_string),
            version: Some("1.0.0".into()),
            links: None,
        }
    }

    #[test]
    fn test_mcp_filter() {
        assert!(looks_like_mcp_server(&pkg("pg-mcp", None)));
        assert!(looks_like_mcp_server(&pkg("pg", Some("An MCP server"))));
        assert!(looks_like_mcp_server(&pkg("pg", Some("Model Context Protocol bridge"))));
        assert!(!looks_like_mcp_server(&pkg("left-pad", Some("Pads strings"))));
    }

    #[test]
    fn test_launch_hint() {
        let hit = to_search_result(pkg("@acme/pg-mcp", None));
        assert_eq!(hit.command.as_deref(), Some("npx"));
        assert_eq!(hit.args.unwrap(), vec!["-y", "@acme/pg-mcp"]);
        assert_eq!(hit.source, Source::Npm);
    }
}
