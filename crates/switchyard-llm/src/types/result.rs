use serde::Serialize;
use switchyard_core::UsageRecord;

use super::message::{Content, Message};
use super::tool::ToolInvocation;
use crate::finish::FinishReason;

/// Canonical reply to a blocking call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResult {
    /// Assistant text
    pub content: String,
    /// Normalized finish reason
    pub finish_reason: FinishReason,
    /// Whether the model requested tool calls
    pub use_tool: bool,
    /// Requested tool calls
    pub tools: Vec<ToolInvocation>,
    /// Assistant turn in canonical form, ready to append to history
    pub message: Message,
    /// Vendor's own assistant-turn payload, kept verbatim
    pub native_message: serde_json::Value,
    /// Usage published for this reply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageRecord>,
}

impl ChatResult {
    /// Assemble a result, deriving `use_tool` and the canonical message
    pub fn new(
        content: String,
        finish_reason: FinishReason,
        tools: Vec<ToolInvocation>,
        native_message: serde_json::Value,
        usage: Option<UsageRecord>,
    ) -> Self {
        let use_tool = !tools.is_empty();
        let message = Message {
            tool_calls: use_tool.then(|| tools.clone()),
            ..Message::assistant(content.clone())
        };

        Self {
            content,
            finish_reason,
            use_tool,
            tools,
            message,
            native_message,
            usage,
        }
    }

    /// Whether the reply carries neither text nor tool calls
    pub fn is_empty(&self) -> bool {
        !self.use_tool && Content::Text(self.content.clone()).is_blank()
    }
}

/// Generated or edited image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageData {
    /// Hosted URL, when the vendor returns one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Base64 payload, when the vendor returns one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
    /// Prompt as rewritten by the vendor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

/// Reply to an image generation or edit call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageResult {
    /// Images produced
    pub images: Vec<ImageData>,
    /// Usage published for this reply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageRecord>,
}
