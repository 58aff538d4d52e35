//! Provider adapters for LLM backends

pub mod anthropic;
pub mod echo;
pub mod google;
mod http;
pub mod ollama;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use switchyard_config::{ProviderConfig, ProviderType};
use switchyard_core::{RequestContext, UsageMetadata, UsageRecord, UsageSink};
use tokio_util::sync::CancellationToken;

pub use anthropic::AnthropicProvider;
pub use echo::{EchoProvider, EchoRequest, EchoUsage};
pub use google::GoogleProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use crate::convert::google::GoogleUsage;
use crate::error::LlmError;
use crate::protocol::anthropic::{AnthropicRequest, AnthropicUsage};
use crate::protocol::google::GoogleRequest;
use crate::protocol::ollama::{OllamaRequest, OllamaUsage};
use crate::protocol::openai::{OpenAiImageUsage, OpenAiRequest, OpenAiUsage};
use crate::sanitize::{SanitizePolicy, sanitize_message_flow};
use crate::stream::EventStream;
use crate::types::{ChatResult, FileRef, ImageOptions, ImageResult, Message, PreparedParams, ToolResult};

/// Vendor-shaped request body, one variant per wire protocol
#[derive(Debug, Clone, PartialEq)]
pub enum VendorBody {
    /// OpenAI chat completions body
    OpenAi(OpenAiRequest),
    /// Anthropic messages body
    Anthropic(AnthropicRequest),
    /// Gemini generate-content body
    Google(GoogleRequest),
    /// Ollama chat body
    Ollama(OllamaRequest),
    /// Offline echo body
    Echo(EchoRequest),
}

impl VendorBody {
    /// Wire protocol this body is shaped for
    pub const fn vendor(&self) -> &'static str {
        match self {
            Self::OpenAi(_) => "openai",
            Self::Anthropic(_) => "anthropic",
            Self::Google(_) => "google",
            Self::Ollama(_) => "ollama",
            Self::Echo(_) => "echo",
        }
    }

    /// Body serialized as the vendor would receive it
    pub fn to_json(&self) -> serde_json::Value {
        let value = match self {
            Self::OpenAi(body) => serde_json::to_value(body),
            Self::Anthropic(body) => serde_json::to_value(body),
            Self::Google(body) => serde_json::to_value(body),
            Self::Ollama(body) => serde_json::to_value(body),
            Self::Echo(body) => serde_json::to_value(body),
        };
        value.unwrap_or_default()
    }

    fn mismatch(&self, provider: &str) -> LlmError {
        LlmError::Validation(format!(
            "provider '{provider}' cannot send a request body built for {}",
            self.vendor()
        ))
    }
}

/// Vendor-shaped usage handed to [`Provider::report_usage`]
#[derive(Debug, Clone, PartialEq)]
pub enum VendorUsage {
    /// Chat completion usage
    OpenAi(OpenAiUsage),
    /// Image endpoint usage
    OpenAiImage(OpenAiImageUsage),
    /// Anthropic message usage
    Anthropic(AnthropicUsage),
    /// Gemini usage metadata with the model it was reported for
    Google(GoogleUsage),
    /// Ollama evaluation counts
    Ollama(OllamaUsage),
    /// Word counts from the echo provider
    Echo(EchoUsage),
}

impl VendorUsage {
    /// Normalize into a usage record attributed to `metadata`
    pub fn to_record(&self, metadata: &UsageMetadata) -> UsageRecord {
        match self {
            Self::OpenAi(usage) => crate::convert::openai::usage_record(usage, metadata),
            Self::OpenAiImage(usage) => crate::convert::openai::image_usage_record(usage, metadata),
            Self::Anthropic(usage) => crate::convert::anthropic::usage_record(usage, metadata),
            Self::Google(usage) => crate::convert::google::usage_record(usage, metadata),
            Self::Ollama(usage) => crate::convert::ollama::usage_record(usage, metadata),
            Self::Echo(usage) => usage.record(metadata),
        }
    }
}

impl From<OpenAiUsage> for VendorUsage {
    fn from(usage: OpenAiUsage) -> Self {
        Self::OpenAi(usage)
    }
}

impl From<AnthropicUsage> for VendorUsage {
    fn from(usage: AnthropicUsage) -> Self {
        Self::Anthropic(usage)
    }
}

impl From<GoogleUsage> for VendorUsage {
    fn from(usage: GoogleUsage) -> Self {
        Self::Google(usage)
    }
}

impl From<OllamaUsage> for VendorUsage {
    fn from(usage: OllamaUsage) -> Self {
        Self::Ollama(usage)
    }
}

/// Adapter between canonical requests and one LLM backend
///
/// Blocking calls report failure through `Result`. Streaming calls never fail
/// directly: every failure, cancellation included, arrives as `Error` or
/// `Abort` followed by `End` on the returned stream.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Configured provider name
    fn name(&self) -> &str;

    /// Sink receiving usage records published by this provider
    fn usage_sink(&self) -> &Arc<dyn UsageSink>;

    /// History repair rules this backend needs
    fn sanitize_policy(&self) -> SanitizePolicy {
        SanitizePolicy::LENIENT
    }

    /// Translate canonical params into this backend's request body
    fn adapt_request_body(&self, params: &PreparedParams, context: &RequestContext) -> Result<VendorBody, LlmError>;

    /// Send a blocking request
    async fn request(&self, body: VendorBody, context: &RequestContext) -> Result<ChatResult, LlmError>;

    /// Send a streaming request
    fn stream_request(&self, body: VendorBody, context: RequestContext, cancel: CancellationToken) -> EventStream;

    /// Follow-up turns carrying `results` for the tool calls in `message`
    fn transform_tool_message_blocks(&self, message: &Message, results: &[ToolResult]) -> Vec<Message>;

    /// Repair `messages` so this backend accepts them
    fn consistent_messages(&self, messages: Vec<Message>) -> Vec<Message> {
        sanitize_message_flow(messages, self.sanitize_policy())
    }

    /// Normalize vendor usage and publish it to the usage sink
    fn report_usage(&self, usage: &VendorUsage, metadata: &UsageMetadata) -> UsageRecord {
        let record = usage.to_record(metadata);
        self.usage_sink().publish(record.clone());
        record
    }

    /// Generate images from a prompt
    async fn image_generation(
        &self,
        _prompt: &str,
        _options: &ImageOptions,
        _context: &RequestContext,
    ) -> Result<ImageResult, LlmError> {
        Err(LlmError::Validation(format!(
            "provider '{}' does not support image generation",
            self.name()
        )))
    }

    /// Edit an image from a prompt and attached files
    async fn image_edit(
        &self,
        _prompt: &str,
        _files: &[FileRef],
        _options: &ImageOptions,
        _context: &RequestContext,
    ) -> Result<ImageResult, LlmError> {
        Err(LlmError::Validation(format!(
            "provider '{}' does not support image editing",
            self.name()
        )))
    }
}

/// Build the provider adapter for one configured connection
pub fn create_provider(name: &str, config: &ProviderConfig, usage: Arc<dyn UsageSink>) -> Arc<dyn Provider> {
    let name = name.to_owned();
    match config.provider_type {
        ProviderType::Openai => Arc::new(OpenAiProvider::new(name, config, usage)),
        ProviderType::Anthropic => Arc::new(AnthropicProvider::new(name, config, usage)),
        ProviderType::Google => Arc::new(GoogleProvider::new(name, config, usage)),
        ProviderType::Ollama => Arc::new(OllamaProvider::new(name, config, usage)),
        ProviderType::Echo => Arc::new(EchoProvider::new(name, usage)),
    }
}
