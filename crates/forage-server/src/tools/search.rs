use super::parse_args;
use crate::context::Forage;
use async_trait::async_trait;
use forage_core::{json_result, ForageResult, SearchResult, Source, ToolDescriptor};
use forage_mcp::ToolHandler;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
pub struct SearchInput {
    pub query: String,
    /// Backends to query. All of them when absent.
    #[serde(default)]
    pub sources: Option<Vec<Source>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutput {
    pub results: Vec<SearchResult>,
    pub query: String,
}

/// `forage_search`: fan a query out to every registry.
pub struct SearchTool {
    forage: Arc<Forage>,
}

impl SearchTool {
    pub const NAME: &'static str = "forage_search";

    pub fn new(forage: Arc<Forage>) -> Self {
        Self { forage }
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            Self::NAME,
            "Search for MCP servers across registries (Official MCP Registry, Smithery, npm). \
             Describe the capability you need and get ranked results.",
        )
        .with_schema(serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What you need, e.g. 'query postgres database' or 'manage github issues'"
                },
                "sources": {
                    "type": "array",
                    "items": {"type": "string", "enum": ["official-registry", "npm", "smithery"]},
                    "description": "Which registries to search. Defaults to all."
                }
            },
            "required": ["query"]
        }))
    }

    pub async fn run(&self, input: SearchInput) -> SearchOutput {
        let results = self
            .forage
            .search
            .search(&input.query, input.sources.as_deref())
            .await;
        SearchOutput {
            results,
            query: input.query,
        }
    }
}

#[async_trait]
impl ToolHandler for SearchTool {
    async fn call(&self, arguments: Value) -> ForageResult<Value> {
        let input: SearchInput = parse_args(Self::NAME, arguments)?;
        Ok(json_result(&self.run(input).await)?)
    }
}
