use std::sync::Arc;

use switchyard_core::UsageRecord;

use super::tool::ToolInvocation;
use crate::error::LlmError;
use crate::finish::FinishReason;

/// Canonical event emitted by a streaming call
///
/// Every stream ends with exactly one [`StreamEvent::End`]. `Error` and
/// `Abort` appear at most once, immediately before it.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Call is about to be dispatched
    Requested {
        /// Provider serving the call
        provider: String,
        /// Upstream model identifier
        model: String,
    },
    /// Raw vendor chunk before interpretation
    Data(serde_json::Value),
    /// Incremental display text
    Content(String),
    /// Incremental reasoning text
    Thinking(String),
    /// Tool calls accumulated for this turn
    ToolInfo(Vec<ToolInvocation>),
    /// The final finish reason will not be a natural stop
    Interrupted(FinishReason),
    /// Call failed
    Error(Arc<LlmError>),
    /// Call was cancelled
    Abort,
    /// Terminal event
    End {
        /// Tool calls requested in this turn
        tools: Vec<ToolInvocation>,
        /// Usage records published during the stream
        usage: Vec<UsageRecord>,
        /// Final finish reason
        finish_reason: FinishReason,
    },
}

impl StreamEvent {
    /// Whether this is the terminal `End` event
    pub const fn is_end(&self) -> bool {
        matches!(self, Self::End { .. })
    }

    /// Short tag for logging and assertions
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Requested { .. } => "requested",
            Self::Data(_) => "data",
            Self::Content(_) => "content",
            Self::Thinking(_) => "thinking",
            Self::ToolInfo(_) => "tool_info",
            Self::Interrupted(_) => "interrupted",
            Self::Error(_) => "error",
            Self::Abort => "abort",
            Self::End { .. } => "end",
        }
    }
}
