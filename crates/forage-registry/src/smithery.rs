//! Adapter for the Smithery server index.

use crate::backend::{endpoint, get_json, SearchBackend, DEFAULT_HTTP_TIMEOUT, PAGE_SIZE};
use async_trait::async_trait;
use forage_core::{ForageResult, SearchResult, Source};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://registry.smithery.ai";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SmitheryServer {
    #[serde(default)]
    qualified_name: String,
    display_name: Option<String>,
    description: Option<String>,
    homepage: Option<String>,
    use_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    servers: Vec<SmitheryServer>,
}

pub struct Smithery {
    base_url: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl Smithery {
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

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for Smithery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchBackend for Smithery {
    fn source(&self) -> Source {
        Source::Smithery
    }

    async fn search(&self, query: &str) -> ForageResult<Vec<SearchResult>> {
        let url = endpoint(
            &self.base_url,
            &["servers"],
            &[("q", query), ("pageSize", PAGE_SIZE)],
        )?;
        let body: Option<SearchResponse> = get_json(&self.http, url, self.timeout).await?;
        let hits: Vec<SearchResult> = body
            .map(|b| b.servers)
            .unwrap_or_default()
            .into_iter()
            .map(to_search_result)
            .collect();
        debug!(query, hits = hits.len(), "Smithery search");
        Ok(hits)
    }
}

fn to_search_result(server: SmitheryServer) -> SearchResult {
    let url = server
        .homepage
        .unwrap_or_else(|| format!("https://smithery.ai/server/{}", server.qualified_name));
    let mut hit = SearchResult::new(
        server
            .display_name
            .unwrap_or_else(|| server.qualified_name.clone()),
        server.qualified_name,
        server.description.unwrap_or_default(),
        Source::Smithery,
    );
    hit.url = Some(url);
    hit.downloads = server.use_count;
    hit
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fallbacks() {
        let server: SmitheryServer =
            serde_json::from_value(serde_json::json!({"qualifiedName": "@acme/notes", "useCount": 42}))
                .unwrap();
        let hit = to_search_result(server);
        assert_eq!(hit.name, "@acme/notes");
        assert_eq!(hit.package_name, "@acme/notes");
        assert_eq!(hit.url.as_deref(), Some("https://smithery.ai/server/@acme/notes"));
        assert_eq!(hit.downloads, Some(42));
    }

    #[test]
    fn test_display_name_and_homepage_win() {
        let server: SmitheryServer = serde_json::from_value(serde_json::json!({
            "qualifiedName": "notes",
            "displayName": "Notes",
            "homepage": "https://notes.example",
            "description": "Take notes"
        }))
        .unwrap();
        let hit = to_search_result(server);
        assert_eq!(hit.name, "Notes");
        assert_eq!(hit.url.as_deref(), Some("https://notes.example"));
        assert_eq!(hit.description, "Take notes");
        assert!(hit.downloads.is_none());
    }
}
