//! Collision-safe names for proxied tools.
//!
//! A child's tool `query` on server `server-postgres` is exposed upstream as
//! `forage__server-postgres__query`. Server names are sanitized to
//! `[A-Za-z0-9_-]`, which is many-to-one: two servers whose names differ only
//! in replaced characters map to the same prefix. That collision is not
//! resolved here; the host rejects the second registration.

use forage_core::ToolDescriptor;
use serde::Serialize;
use serde_json::Value;

/// Prefix shared by every proxied tool name.
pub const PREFIX: &str = "forage__";

/// Separator between the sanitized server name and the tool name.
pub const SEPARATOR: &str = "__";

/// A child tool as exposed in the upstream catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedTool {
    /// Namespaced name advertised upstream.
    pub name: String,
    /// `[via <server>] <description>`, trimmed.
    pub description: String,
    /// The child's schema, passed through untouched.
    pub input_schema: Value,
    /// Logical name of the owning server.
    pub server_name: String,
    /// Tool name as the child knows it.
    pub original_name: String,
}

impl WrappedTool {
    /// Descriptor to register with the host catalog.
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Namespaced name for `tool` on `server_name`.
pub fn wrapped_name(server_name: &str, tool: &str) -> String {
    format!("{PREFIX}{}{SEPARATOR}{tool}", sanitize(server_name))
}

/// Wrap one child tool for the upstream catalog.
pub fn wrap(server_name: &str, tool: &ToolDescriptor) -> WrappedTool {
    WrappedTool {
        name: wrapped_name(server_name, &tool.name),
        description: format!("[via {server_name}] {}", tool.description)
            .trim()
            .to_string(),
        input_schema: tool.input_schema.clone(),
        server_name: server_name.to_string(),
        original_name: tool.name.clone(),
    }
}

/// Split a wrapped name back into `(sanitized server name, tool name)`.
///
/// Only the first separator splits, so tool names that contain `__`
/// themselves survive intact.
pub fn unwrap(name: &str) -> Option<(String, String)> {
    let rest = name.strip_prefix(PREFIX)?;
    let (server, tool) = rest.split_once(SEPARATOR)?;
    Some((server.to_string(), tool.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("server-postgres"), "server-postgres");
        assert_eq!(sanitize("@scope/server.pg"), "_scope_server_pg");
        assert_eq!(sanitize("a b:c"), "a_b_c");
        assert_eq!(sanitize("ünï"), "_n_");
    }

    #[test]
    fn test_wrap_name_and_description() {
        let tool = ToolDescriptor::new("query", "Run a read-only SQL query");
        let wrapped = wrap("server-postgres", &tool);
        assert_eq!(wrapped.name, "forage__server-postgres__query");
        assert_eq!(
            wrapped.description,
            "[via server-postgres] Run a read-only SQL query"
        );
        assert_eq!(wrapped.original_name, "query");
        assert_eq!(wrapped.server_name, "server-postgres");
    }

    #[test]
    fn test_wrap_empty_description_is_trimmed() {
        let wrapped = wrap("pg", &ToolDescriptor::new("query", ""));
        assert_eq!(wrapped.description, "[via pg]");
    }

    #[test]
    fn test_wrap_keeps_schema() {
        let schema = serde_json::json!({"type": "object", "required": ["sql"]});
        let tool = ToolDescriptor::new("query", "").with_schema(schema.clone());
        assert_eq!(wrap("pg", &tool).descriptor().input_schema, schema);
    }

    #[test]
    fn test_round_trip_with_separator_in_tool_name() {
        let name = wrapped_name("server-postgres", "db__query");
        assert_eq!(name, "forage__server-postgres__db__query");
        assert_eq!(
            unwrap(&name).unwrap(),
            ("server-postgres".to_string(), "db__query".to_string())
        );
    }

    #[test]
    fn test_round_trip_sanitized_server_names() {
        let cases = [
            ("@modelcontextprotocol/server-github", "create_issue"),
            ("my server", "a__b__c"),
            ("x.y", "__lead"),
            ("plain", "t"),
        ];
        for (server, tool) in cases {
            let (s, t) = unwrap(&wrapped_name(server, tool)).unwrap();
            assert_eq!(s, sanitize(server));
            assert_eq!(t, tool);
        }
    }

    #[test]
    fn test_unwrap_rejects_foreign_names() {
        assert!(unwrap("forage_search").is_none());
        assert!(unwrap("foraged__pg__query").is_none());
        assert!(unwrap("forage__noseparator").is_none());
        assert!(unwrap("").is_none());
    }

    #[test]
    fn test_sanitize_collision_is_visible() {
        assert_eq!(wrapped_name("a/b", "t"), wrapped_name("a.b", "t"));
    }
}
