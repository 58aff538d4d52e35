//! Canonical, provider-agnostic request and response types
//!
//! Every vendor wire format converts to and from these at the adapter
//! boundary. None of them carry vendor-shaped optional fields.

pub mod message;
pub mod params;
pub mod result;
pub mod stream;
pub mod tool;

pub use message::{Content, ContentPart, Message, Role};
pub use params::{FileRef, ImageOptions, PreparedParams, ReasoningEffort, ResponseFormat, Sampling, split_data_uri};
pub use result::{ChatResult, ImageData, ImageResult};
pub use stream::StreamEvent;
pub use tool::{Continuation, ToolChoice, ToolDefinition, ToolInvocation, ToolResult};
