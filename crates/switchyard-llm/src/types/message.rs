use serde::{Deserialize, Serialize};

use super::tool::{ToolInvocation, ToolResult};

/// Role of a message participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    /// System instruction
    System,
    /// User message
    User,
    /// Assistant response
    Assistant,
    /// Tool/function result
    Tool,
}

/// Message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message author
    pub role: Role,
    /// Message content
    #[serde(default)]
    pub content: Content,
    /// Optional participant name (tool name on tool-role turns)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool calls made by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolInvocation>>,
    /// ID of the tool call this message is a response to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Results recorded against this turn's tool calls in stored history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResult>>,
}

impl Message {
    /// Create a plain text message
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Content::Text(text.into()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
            tool_results: None,
        }
    }

    /// System instruction
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// User turn
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Assistant turn
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Assistant turn requesting tool calls
    pub fn tool_use(text: impl Into<String>, calls: Vec<ToolInvocation>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::assistant(text)
        }
    }

    /// Tool-role turn answering one invocation
    pub fn tool(tool_call_id: impl Into<String>, name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, text)
        }
    }

    /// Flattened text content
    pub fn text(&self) -> String {
        self.content.as_text()
    }

    /// Tool calls requested by this turn
    pub fn invocations(&self) -> &[ToolInvocation] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    /// Whether this turn requests at least one tool call
    pub fn has_tool_invocations(&self) -> bool {
        !self.invocations().is_empty()
    }

    /// Recorded tool results attached to this turn
    pub fn recorded_results(&self) -> &[ToolResult] {
        self.tool_results.as_deref().unwrap_or_default()
    }

    /// Identifiers of the tool calls this turn answers, in any encoding
    pub fn result_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.recorded_results().iter().map(|r| r.tool_call_id.as_str()).collect();

        if let Content::Parts(parts) = &self.content {
            ids.extend(parts.iter().filter_map(|part| match part {
                ContentPart::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            }));
        }

        if let Some(id) = &self.tool_call_id {
            ids.push(id);
        }

        ids
    }
}

/// Message content, either plain text or structured parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text content
    Text(String),
    /// Array of content parts (text, images, tool results)
    Parts(Vec<ContentPart>),
}

impl Default for Content {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl Content {
    /// Extract text content, joining text parts
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } | ContentPart::ToolResult { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Whether there is no visible text
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Parts(parts) => parts.iter().all(|part| match part {
                ContentPart::Text { text } => text.trim().is_empty(),
                ContentPart::Image { .. } | ContentPart::ToolResult { .. } => false,
            }),
        }
    }
}

/// Individual part within a multipart message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content block
    Text {
        /// The text string
        text: String,
    },
    /// Image reference
    Image {
        /// URL or base64 data URI for the image
        url: String,
        /// Detail level hint (e.g. "auto", "low", "high")
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// Result of one tool invocation
    ToolResult {
        /// ID of the invocation this answers
        tool_call_id: String,
        /// Tool name, required by vendors that pair results by name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Tool output
        content: String,
        /// Whether the tool failed
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}
