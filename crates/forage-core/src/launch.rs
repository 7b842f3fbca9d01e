use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Everything needed to spawn one child capability-server.
///
/// The `name` is the logical key the process registry stores the running
/// server under; it does not have to match the command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Logical server name, unique among running servers.
    pub name: String,
    /// Executable to run (e.g. `npx`).
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides layered on top of the parent environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl LaunchSpec {
    /// Creates a spec with no arguments and no environment overrides.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    /// Replaces the argument list.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Adds one environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Human-readable command line, used in log lines.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let spec = LaunchSpec::new("fs", "npx")
            .with_args(["-y", "@modelcontextprotocol/server-filesystem"])
            .with_env("NODE_ENV", "production");
        assert_eq!(spec.args.len(), 2);
        assert_eq!(spec.env.get("NODE_ENV").unwrap(), "production");
        assert_eq!(
            spec.command_line(),
            "npx -y @modelcontextprotocol/server-filesystem"
        );
    }

    #[test]
    fn test_deserialize_defaults() {
        let spec: LaunchSpec =
            serde_json::from_str(r#"{"name":"pg","command":"server-postgres"}"#).unwrap();
        assert!(spec.args.is_empty());
        assert!(spec.env.is_empty());
    }
}
