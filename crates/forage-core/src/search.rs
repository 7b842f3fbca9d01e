use serde::{Deserialize, Serialize};
use std::fmt;

/// Discovery backend a [`SearchResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    /// The official MCP registry.
    OfficialRegistry,
    /// The Smithery index.
    Smithery,
    /// The npm package registry.
    Npm,
    /// Anything else.
    #[serde(other)]
    Other,
}

impl Source {
    /// Every backend-backed source, in trust order.
    pub const ALL: [Source; 3] = [Source::OfficialRegistry, Source::Smithery, Source::Npm];

    /// Trust rank used for dedup and ordering. Lower wins.
    pub fn rank(self) -> u8 {
        match self {
            Source::OfficialRegistry => 0,
            Source::Smithery => 1,
            Source::Npm => 2,
            Source::Other => 3,
        }
    }

    /// Wire identifier (`official-registry`, `smithery`, `npm`, `other`).
    pub fn as_str(self) -> &'static str {
        match self {
            Source::OfficialRegistry => "official-registry",
            Source::Smithery => "smithery",
            Source::Npm => "npm",
            Source::Other => "other",
        }
    }

    /// Parses a wire identifier; unknown strings map to [`Source::Other`].
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "official-registry" | "official" => Source::OfficialRegistry,
            "smithery" => Source::Smithery,
            "npm" => Source::Npm,
            _ => Source::Other,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discovery hit in the uniform shape every backend produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Display name.
    pub name: String,
    /// Canonical package identifier. Case-folded for deduplication.
    pub package_name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Backend that produced this hit.
    pub source: Source,
    /// Homepage or repository link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Latest known version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Popularity signal, when the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads: Option<u64>,
    /// Star count, when the backend reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stars: Option<u64>,
    /// Suggested launch command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Suggested launch arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

impl SearchResult {
    /// Creates a hit with only the required fields populated.
    pub fn new(
        name: impl Into<String>,
        package_name: impl Into<String>,
        description: impl Into<String>,
        source: Source,
    ) -> Self {
        Self {
            name: name.into(),
            package_name: package_name.into(),
            description: description.into(),
            source,
            url: None,
            version: None,
            downloads: None,
            stars: None,
            command: None,
            args: None,
        }
    }

    /// Case-folded identity used for deduplication. `None` when the hit has
    /// no identifier.
    pub fn canonical_id(&self) -> Option<String> {
        if self.package_name.is_empty() {
            None
        } else {
            Some(self.package_name.to_lowercase())
        }
    }
}
