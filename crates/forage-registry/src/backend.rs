//! The discovery backend seam plus the HTTP plumbing the adapters share.

use async_trait::async_trait;
use forage_core::{ForageError, ForageResult, SearchResult, Source};
use reqwest::header::ACCEPT;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Request timeout used by the adapters when none is configured.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of hits requested from each backend.
pub(crate) const PAGE_SIZE: &str = "10";

/// A source of capability-server listings.
///
/// Implementations return errors freely; the aggregator turns any failure
/// into an empty contribution.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Which source this backend reports as.
    fn source(&self) -> Source;

    /// Hits for `query`, in backend order.
    async fn search(&self, query: &str) -> ForageResult<Vec<SearchResult>>;
}

/// `base` with `segments` appended as percent-encoded path segments and
/// `query` appended as form-encoded pairs.
pub(crate) fn endpoint(base: &str, segments: &[&str], query: &[(&str, &str)]) -> ForageResult<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| ForageError::Config(format!("Invalid base URL '{base}': {e}")))?;
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|()| ForageError::Config(format!("Base URL '{base}' cannot carry a path")))?;
        path.pop_if_empty();
        path.extend(segments);
    }
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

/// GET `url` and decode the JSON body. A 404 yields `Ok(None)`; any other
/// non-success status is a backend error.
pub(crate) async fn get_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: Url,
    timeout: Duration,
) -> ForageResult<Option<T>> {
    let resp = http
        .get(url.clone())
        .header(ACCEPT, "application/json")
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| ForageError::Http(e.to_string()))?;

    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(ForageError::Backend(format!(
            "{} returned {status}",
            url.path()
        )));
    }

    let body = resp
        .json::<T>()
        .await
        .map_err(|e| ForageError::Http(e.to_string()))?;
    Ok(Some(body))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_appends_segments() {
        let url = endpoint("https://registry.example/v0", &["servers"], &[("search", "pg"), ("limit", "10")]).unwrap();
        assert_eq!(url.as_str(), "https://registry.example/v0/servers?search=pg&limit=10");
    }

    #[test]
    fn test_endpoint_trailing_slash_and_encoding() {
        let url = endpoint("https://registry.example/", &["@scope/pkg"], &[]).unwrap();
        assert_eq!(url.as_str(), "https://registry.example/@scope%2Fpkg");

        let url = endpoint("https://registry.example", &["-", "v1", "search"], &[("text", "pg mcp server")]).unwrap();
        assert_eq!(url.as_str(), "https://registry.example/-/v1/search?text=pg+mcp+server");
    }

    #[test]
    fn test_endpoint_rejects_bad_base() {
        assert!(matches!(endpoint("not a url", &[], &[]), Err(ForageError::Config(_))));
    }
}
