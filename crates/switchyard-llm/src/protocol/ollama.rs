//! Ollama chat API wire format types

use serde::{Deserialize, Serialize};

// -- Request types --

/// Ollama `/api/chat` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaRequest {
    /// Model identifier
    pub model: String,
    /// Conversation messages
    pub messages: Vec<OllamaMessage>,
    /// Stream NDJSON chunks instead of one reply
    pub stream: bool,
    /// Structured output mode (`json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Sampling and length options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<OllamaOptions>,
    /// Tool definitions, `OpenAI` function shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<crate::protocol::openai::OpenAiTool>>,
}

/// Ollama model options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OllamaOptions {
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Top-k sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Stop sequences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl OllamaOptions {
    /// Whether no option is set
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Ollama chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaMessage {
    /// Message role
    pub role: String,
    /// Text content
    #[serde(default)]
    pub content: String,
    /// Base64 images attached to the turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    /// Reasoning text of thinking models
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Tool calls made by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OllamaToolCall>>,
    /// Tool name this message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl OllamaMessage {
    /// Plain text message
    pub fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_owned(),
            content: content.into(),
            images: None,
            thinking: None,
            tool_calls: None,
            tool_name: None,
        }
    }
}

/// Tool call within an Ollama message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaToolCall {
    /// Function call details
    pub function: OllamaFunctionCall,
}

/// Function call with object arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaFunctionCall {
    /// Function name
    pub name: String,
    /// Arguments as a JSON object
    #[serde(default)]
    pub arguments: serde_json::Value,
}

// -- Response types --

/// Ollama chat reply, also the shape of every NDJSON stream line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaResponse {
    /// Model used
    #[serde(default)]
    pub model: String,
    /// Generated message (partial when streaming)
    #[serde(default)]
    pub message: Option<OllamaMessage>,
    /// Whether generation is complete
    #[serde(default)]
    pub done: bool,
    /// Why generation stopped
    #[serde(default)]
    pub done_reason: Option<String>,
    /// Prompt tokens evaluated
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    /// Tokens generated
    #[serde(default)]
    pub eval_count: Option<u64>,
    /// In-band failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Token usage extracted from a final Ollama reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OllamaUsage {
    /// Prompt tokens evaluated
    pub prompt_eval_count: u64,
    /// Tokens generated
    pub eval_count: u64,
}

impl OllamaResponse {
    /// Usage counters, present on the final reply only
    pub fn usage(&self) -> Option<OllamaUsage> {
        if self.prompt_eval_count.is_none() && self.eval_count.is_none() {
            return None;
        }
        Some(OllamaUsage {
            prompt_eval_count: self.prompt_eval_count.unwrap_or(0),
            eval_count: self.eval_count.unwrap_or(0),
        })
    }
}
