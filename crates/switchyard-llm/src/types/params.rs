use serde::{Deserialize, Serialize};

use super::message::Message;
use super::tool::{ToolChoice, ToolDefinition};

/// Sampling controls
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sampling {
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

/// Desired shape of the model's reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Free-form text
    #[default]
    Text,
    /// A single JSON object
    Json,
}

/// Reasoning-effort hint for models that accept one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReasoningEffort {
    /// Minimal reasoning
    Minimal,
    /// Low effort
    Low,
    /// Medium effort
    Medium,
    /// High effort
    High,
}

/// Attached file reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Public URL or base64 data URI
    pub url: String,
    /// MIME type, inferred from a data URI when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Original file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl FileRef {
    /// Split a `data:` URI into its MIME type and base64 payload
    pub fn data_uri(&self) -> Option<(&str, &str)> {
        split_data_uri(&self.url)
    }
}

/// Split a `data:` URI into its MIME type and payload
pub fn split_data_uri(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64").unwrap_or(header);
    Some((mime, data))
}

/// Image generation options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageOptions {
    /// Output size, e.g. `1024x1024`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    /// Number of images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    /// Quality hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    /// Style hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

/// Canonical request for one adapter invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedParams {
    /// Catalog model entry the caller asked for
    pub model: String,
    /// Ordered conversation history
    pub messages: Vec<Message>,
    /// Sampling controls
    pub sampling: Sampling,
    /// Maximum output tokens
    pub max_tokens: Option<u32>,
    /// Tool definitions
    pub tools: Vec<ToolDefinition>,
    /// Tool selection policy
    pub tool_choice: Option<ToolChoice>,
    /// Desired response format
    pub response_format: ResponseFormat,
    /// Attached files
    pub files: Vec<FileRef>,
    /// Reasoning-effort hint
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Ask for extended reasoning when the model supports it
    pub use_reasoning: bool,
    /// Caller cap on the thinking budget
    pub max_thinking_tokens: Option<u32>,
    /// Ask the vendor to cache the prompt prefix
    pub cache: bool,
    /// Image generation options
    pub image: ImageOptions,
}

impl PreparedParams {
    /// Create params for `model` with the given history
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Self::default()
        }
    }

    /// Whether tools are attached
    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    /// Reduced copy targeting a fallback model
    ///
    /// Keeps history, length limits, tools, response format, files and
    /// pass-through flags. Drops sampling and reasoning tuning, which belong to
    /// the primary model's configuration and may be rejected by the fallback.
    pub fn for_fallback(&self, model: &str) -> Self {
        Self {
            model: model.to_owned(),
            messages: self.messages.clone(),
            max_tokens: self.max_tokens,
            tools: self.tools.clone(),
            tool_choice: self.tool_choice.clone(),
            response_format: self.response_format,
            files: self.files.clone(),
            cache: self.cache,
            image: self.image.clone(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_drops_provider_tuning() {
        let params = PreparedParams {
            sampling: Sampling {
                temperature: Some(0.2),
                top_k: Some(40),
                ..Sampling::default()
            },
            max_tokens: Some(512),
            reasoning_effort: Some(ReasoningEffort::High),
            use_reasoning: true,
            max_thinking_tokens: Some(4096),
            cache: true,
            ..PreparedParams::new("custom-model", vec![Message::user("hi")])
        };

        let fallback = params.for_fallback("gpt-4o");

        assert_eq!(fallback.model, "gpt-4o");
        assert_eq!(fallback.messages, params.messages);
        assert_eq!(fallback.max_tokens, Some(512));
        assert!(fallback.cache);
        assert_eq!(fallback.reasoning_effort, None);
        assert!(!fallback.use_reasoning);
        assert_eq!(fallback.max_thinking_tokens, None);
        assert_eq!(fallback.sampling, Sampling::default());
    }

    #[test]
    fn splits_data_uri() {
        let file = FileRef {
            url: "data:image/png;base64,iVBORw0".to_owned(),
            mime_type: None,
            name: None,
        };
        assert_eq!(file.data_uri(), Some(("image/png", "iVBORw0")));

        let remote = FileRef {
            url: "https://example.com/a.png".to_owned(),
            mime_type: None,
            name: None,
        };
        assert_eq!(remote.data_uri(), None);
    }

    #[test]
    fn parses_reasoning_effort() {
        assert_eq!("high".parse::<ReasoningEffort>().unwrap(), ReasoningEffort::High);
        assert_eq!(ReasoningEffort::Minimal.to_string(), "minimal");
    }
}
