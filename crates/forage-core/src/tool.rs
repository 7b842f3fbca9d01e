use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A capability as advertised in an MCP `tools/list` catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within its catalog.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's arguments.
    #[serde(default = "default_input_schema", rename = "inputSchema")]
    pub input_schema: Value,
}

fn default_input_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolDescriptor {
    /// Creates a descriptor with an empty object schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: default_input_schema(),
        }
    }

    /// Replaces the input schema.
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// Builds an MCP tool result carrying a single text block.
pub fn text_result(text: impl Into<String>) -> Value {
    serde_json::json!({
        "content": [{"type": "text", "text": text.into()}],
    })
}

/// Builds an MCP tool result flagged with `isError`.
pub fn error_result(text: impl Into<String>) -> Value {
    serde_json::json!({
        "content": [{"type": "text", "text": text.into()}],
        "isError": true,
    })
}

/// Serializes `value` as pretty JSON inside a text result.
pub fn json_result<T: Serialize>(value: &T) -> Result<Value, serde_json::Error> {
    Ok(text_result(serde_json::to_string_pretty(value)?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_parse_defaults() {
        let tool: ToolDescriptor = serde_json::from_str(r#"{"name":"query"}"#).unwrap();
        assert_eq!(tool.description, "");
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn test_descriptor_wire_name() {
        let tool = ToolDescriptor::new("read_file", "Read a file")
            .with_schema(serde_json::json!({"type": "object", "required": ["path"]}));
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["inputSchema"]["required"][0], "path");
    }

    #[test]
    fn test_result_builders() {
        let ok = text_result("done");
        assert_eq!(ok["content"][0]["text"], "done");
        assert!(ok.get("isError").is_none());

        let err = error_result("boom");
        assert_eq!(err["isError"], true);

        let json = json_result(&serde_json::json!({"a": 1})).unwrap();
        assert!(json["content"][0]["text"].as_str().unwrap().contains("\"a\": 1"));
    }
}
