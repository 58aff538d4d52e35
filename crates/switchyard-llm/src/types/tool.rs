use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::Role;

/// Definition of a tool the model can call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Function name
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the function parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// How the model should select tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// Model decides whether to call tools
    Auto,
    /// Model will not call any tools
    None,
    /// Model must call at least one tool
    Required,
    /// Force a specific function
    Function {
        /// Function to call
        name: String,
    },
}

/// A tool call requested by the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Position of this call within its turn
    pub index: u32,
    /// Unique identifier for this call
    pub id: String,
    /// Function name
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
    /// Role of the turn that requested the call
    #[serde(default = "assistant_role")]
    pub role: Role,
    /// Vendor state that must be echoed back unchanged on the next turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<Continuation>,
}

const fn assistant_role() -> Role {
    Role::Assistant
}

impl ToolInvocation {
    /// Create an invocation with no continuation
    pub fn new(index: u32, id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            index,
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
            role: Role::Assistant,
            continuation: None,
        }
    }

    /// Arguments parsed as a JSON object, `{}` when empty or malformed
    pub fn arguments_json(&self) -> Value {
        serde_json::from_str::<Value>(&self.arguments)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    }
}

/// Opaque vendor state attached to a tool invocation
///
/// Stored verbatim and replayed unchanged; adapters never inspect the payload
/// of a continuation produced by another vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Continuation {
    /// Reasoning blocks that must precede the tool calls in the next request
    Thinking {
        /// Raw reasoning blocks as returned by the vendor
        blocks: Vec<Value>,
    },
    /// Reasoning signature bound to a single call
    Signature {
        /// Signature string as returned by the vendor
        signature: String,
    },
}

/// Output produced by the external tool executor for one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// ID of the invocation this answers
    pub tool_call_id: String,
    /// Function name
    pub name: String,
    /// Tool output, a string or structured JSON
    #[serde(default)]
    pub content: Value,
}

impl ToolResult {
    /// Create a result from any JSON-compatible output
    pub fn new(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<Value>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    /// Whether the executor produced any output
    pub fn has_content(&self) -> bool {
        match &self.content {
            Value::Null => false,
            Value::String(text) => !text.is_empty(),
            _ => true,
        }
    }

    /// Whether the output is an error indicator
    ///
    /// An object with an `error` key or an HTTP-style `status` of 400 or more
    /// is an error. Unparseable text counts as an error when it contains a
    /// quoted `"error"` token.
    pub fn is_error(&self) -> bool {
        match &self.content {
            Value::Null => false,
            Value::String(text) if text.is_empty() => false,
            Value::String(text) => serde_json::from_str::<Value>(text).map_or_else(
                |_| text.to_lowercase().contains("\"error\""),
                |parsed| value_is_error(&parsed),
            ),
            other => value_is_error(other),
        }
    }

    /// Whether the executor produced non-error output
    pub fn is_success(&self) -> bool {
        self.has_content() && !self.is_error()
    }

    /// Output as text, serializing structured JSON
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

fn value_is_error(value: &Value) -> bool {
    value.get("error").is_some() || value.get("status").and_then(Value::as_u64).is_some_and(|status| status >= 400)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn detects_error_results() {
        assert!(ToolResult::new("a", "t", json!({"error": "boom"})).is_error());
        assert!(ToolResult::new("a", "t", json!({"status": 503, "body": ""})).is_error());
        assert!(ToolResult::new("a", "t", r#"{"error":"timeout"}"#).is_error());
        assert!(ToolResult::new("a", "t", r#"partial "error" text"#).is_error());

        assert!(!ToolResult::new("a", "t", json!({"status": 200})).is_error());
        assert!(!ToolResult::new("a", "t", "all good").is_error());
        assert!(!ToolResult::new("a", "t", Value::Null).is_error());
    }

    #[test]
    fn success_requires_content() {
        assert!(ToolResult::new("a", "t", "42").is_success());
        assert!(!ToolResult::new("a", "t", "").is_success());
        assert!(!ToolResult::new("a", "t", json!({"error": "x"})).is_success());
    }

    #[test]
    fn content_text_serializes_json() {
        let result = ToolResult::new("a", "t", json!({"temp": 21}));
        assert_eq!(result.content_text(), r#"{"temp":21}"#);
        assert_eq!(ToolResult::new("a", "t", "plain").content_text(), "plain");
    }

    #[test]
    fn malformed_arguments_become_empty_object() {
        let call = ToolInvocation::new(0, "call_1", "search", "{not json");
        assert_eq!(call.arguments_json(), json!({}));

        let call = ToolInvocation::new(0, "call_1", "search", r#"{"q":"rust"}"#);
        assert_eq!(call.arguments_json(), json!({"q": "rust"}));
    }

    #[test]
    fn continuation_round_trips_verbatim() {
        let block = json!({"type": "thinking", "thinking": "hmm", "signature": "sig=="});
        let mut call = ToolInvocation::new(0, "toolu_1", "search", "{}");
        call.continuation = Some(Continuation::Thinking { blocks: vec![block.clone()] });

        let decoded: ToolInvocation = serde_json::from_value(serde_json::to_value(&call).unwrap()).unwrap();
        assert_eq!(decoded.continuation, Some(Continuation::Thinking { blocks: vec![block] }));
    }
}
