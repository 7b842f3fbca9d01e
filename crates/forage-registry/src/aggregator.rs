//! Fan-out search across every discovery backend.
//!
//! Each backend races its own timeout and any failure contributes nothing,
//! so one dead registry never empties the whole result list.

use crate::backend::SearchBackend;
use crate::npm::NpmRegistry;
use crate::official::OfficialRegistry;
use crate::smithery::Smithery;
use forage_core::{SearchResult, Source};
use futures_util::future::join_all;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long one backend may take before its contribution is dropped.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SearchAggregator {
    backends: Vec<Arc<dyn SearchBackend>>,
    timeout: Duration,
}

impl SearchAggregator {
    pub fn new(backends: Vec<Arc<dyn SearchBackend>>) -> Self {
        Self {
            backends,
            timeout: DEFAULT_SEARCH_TIMEOUT,
        }
    }

    /// The three public registries at their default endpoints.
    pub fn with_default_backends() -> Self {
        Self::new(vec![
            Arc::new(OfficialRegistry::new()),
            Arc::new(Smithery::new()),
            Arc::new(NpmRegistry::new()),
        ])
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sources this aggregator can query.
    pub fn sources(&self) -> Vec<Source> {
        self.backends.iter().map(|b| b.source()).collect()
    }

    /// Query the selected backends (all when `sources` is `None`) and merge
    /// their hits.
    ///
    /// Never fails: errors, timeouts and bad statuses all read as "no hits"
    /// from that backend.
    pub async fn search(&self, query: &str, sources: Option<&[Source]>) -> Vec<SearchResult> {
        let timeout = self.timeout;
        let selected = self
            .backends
            .iter()
            .filter(|b| sources.map_or(true, |wanted| wanted.contains(&b.source())));

        let batches = join_all(selected.map(|backend| async move {
            let source = backend.source();
            match tokio::time::timeout(timeout, backend.search(query)).await {
                Ok(Ok(hits)) => {
                    debug!(source = %source, hits = hits.len(), "Backend answered");
                    hits
                }
                Ok(Err(e)) => {
                    warn!(source = %source, error = %e, "Search backend failed");
                    Vec::new()
                }
                Err(_) => {
                    warn!(source = %source, timeout_ms = timeout.as_millis() as u64, "Search backend timed out");
                    Vec::new()
                }
            }
        }))
        .await;

        let results = merge(batches);
        info!(query, results = results.len(), "Search complete");
        results
    }
}

/// Flatten, deduplicate and order backend batches.
///
/// Hits without an identifier are dropped. For each case-folded identifier
/// the hit from the most trusted source is kept, the first one seen on a
/// tie. The output is sorted by source rank, then by name.
pub fn merge(batches: Vec<Vec<SearchResult>>) -> Vec<SearchResult> {
    let mut kept: Vec<SearchResult> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for hit in batches.into_iter().flatten() {
        let Some(id) = hit.canonical_id() else {
            continue;
        };
        match index.get(&id) {
            Some(&slot) => {
                if hit.source.rank() < kept[slot].source.rank() {
                    kept[slot] = hit;
                }
            }
            None => {
                index.insert(id, kept.len());
                kept.push(hit);
            }
        }
    }

    kept.sort_by(|a, b| {
        a.source
            .rank()
            .cmp(&b.source.rank())
            .then_with(|| compare_names(&a.name, &b.name))
    });
    kept
}

/// Case-insensitive first, exact second.
fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}
