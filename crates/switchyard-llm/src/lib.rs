//! Multi-provider inference core for Switchyard
//!
//! Drives one canonical [`PreparedParams`] against `OpenAI`-compatible,
//! Anthropic, Google Gemini and Ollama backends and returns canonical
//! [`ChatResult`]s or [`StreamEvent`] sequences regardless of which backend
//! served the call. Custom models get a single fallback hop, and history can be
//! trimmed to a token budget before dispatch.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod context_window;
pub mod convert;
pub mod error;
pub mod fallback;
pub mod finish;
pub mod inference;
pub mod protocol;
pub mod provider;
pub mod resolver;
pub mod sanitize;
pub mod stream;
pub mod types;

pub use context_window::{ContextWindow, TiktokenCounter, TokenCounter, WindowBudget, build_context_window};
pub use error::LlmError;
pub use finish::{FinishReason, normalize_finish_reason};
pub use fallback::FallbackPhase;
pub use inference::{ImageRequest, Inference, PromptRequest};
pub use provider::{Provider, VendorBody, VendorUsage, create_provider};
pub use resolver::{CatalogResolver, ModelResolver};
pub use sanitize::{LeadingRole, SanitizePolicy, sanitize_message_flow};
pub use stream::EventStream;
pub use types::{
    ChatResult, Content, ContentPart, Continuation, FileRef, ImageOptions, ImageResult, Message, PreparedParams,
    ReasoningEffort, ResponseFormat, Role, Sampling, StreamEvent, ToolChoice, ToolDefinition, ToolInvocation,
    ToolResult,
};
