//! Canonical finish reasons and the vendor vocabulary mapping

use serde::{Deserialize, Serialize};

/// Why a model stopped generating, in the one vocabulary every vendor maps into
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of generation
    #[default]
    Stop,
    /// Output-token limit reached
    Length,
    /// Blocked by a safety or policy filter
    ContentFilter,
    /// Model requested tool calls
    ToolCalls,
    /// Caller cancelled the request
    Abort,
    /// Vendor or transport failure
    Error,
    /// Vendor value outside the mapping table
    Unknown,
}

impl FinishReason {
    /// Human-readable explanation for a response that ended with this reason
    pub const fn explanation(self) -> &'static str {
        match self {
            Self::Stop => "the model stopped before producing a complete response",
            Self::Length => "the response is empty because the output-token limit was reached; raise max tokens and retry",
            Self::ContentFilter => "the response was blocked by a content policy; rephrase the prompt and retry",
            Self::ToolCalls => "the model requested a tool call but the response was incomplete",
            Self::Abort => "the request was cancelled before completion",
            Self::Error => "the provider failed while generating the response",
            Self::Unknown => "the response was interrupted for an unrecognized reason",
        }
    }

    /// Whether this is a natural stop
    pub const fn is_stop(self) -> bool {
        matches!(self, Self::Stop)
    }
}

/// Map a vendor finish reason into the canonical vocabulary
///
/// Missing or empty values are treated as a natural stop. Anything else is
/// trimmed and looked up, and values outside the table (whitespace-only ones
/// included) map to [`FinishReason::Unknown`].
pub fn normalize_finish_reason(raw: Option<&str>) -> FinishReason {
    let Some(raw) = raw.filter(|value| !value.is_empty()) else {
        return FinishReason::Stop;
    };

    match raw.trim().to_lowercase().as_str() {
        "stop" | "end_turn" | "stop_sequence" | "pause_turn" => FinishReason::Stop,
        "length" | "max_tokens" | "incomplete" => FinishReason::Length,
        "content_filter" | "contentfilter" | "refusal" | "safety" | "recitation" | "language" | "blocklist"
        | "prohibited_content" | "spii" => FinishReason::ContentFilter,
        "tool_calls" | "tool_use" | "function_call" => FinishReason::ToolCalls,
        "abort" => FinishReason::Abort,
        "error" | "malformed_function_call" => FinishReason::Error,
        _ => FinishReason::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_vendor_vocabulary() {
        let table = [
            ("stop", FinishReason::Stop),
            ("end_turn", FinishReason::Stop),
            ("stop_sequence", FinishReason::Stop),
            ("pause_turn", FinishReason::Stop),
            ("length", FinishReason::Length),
            ("max_tokens", FinishReason::Length),
            ("incomplete", FinishReason::Length),
            ("content_filter", FinishReason::ContentFilter),
            ("refusal", FinishReason::ContentFilter),
            ("SAFETY", FinishReason::ContentFilter),
            ("RECITATION", FinishReason::ContentFilter),
            ("PROHIBITED_CONTENT", FinishReason::ContentFilter),
            ("SPII", FinishReason::ContentFilter),
            ("tool_calls", FinishReason::ToolCalls),
            ("tool_use", FinishReason::ToolCalls),
            ("function_call", FinishReason::ToolCalls),
            ("abort", FinishReason::Abort),
            ("error", FinishReason::Error),
            ("MALFORMED_FUNCTION_CALL", FinishReason::Error),
        ];

        for (raw, expected) in table {
            assert_eq!(normalize_finish_reason(Some(raw)), expected, "{raw}");
        }
    }

    #[test]
    fn trims_and_lowercases() {
        assert_eq!(normalize_finish_reason(Some("  End_Turn \n")), FinishReason::Stop);
        assert_eq!(normalize_finish_reason(Some("MAX_TOKENS")), FinishReason::Length);
    }

    #[test]
    fn missing_or_empty_is_stop() {
        assert_eq!(normalize_finish_reason(None), FinishReason::Stop);
        assert_eq!(normalize_finish_reason(Some("")), FinishReason::Stop);
    }

    #[test]
    fn whitespace_only_is_unknown() {
        assert_eq!(normalize_finish_reason(Some("   ")), FinishReason::Unknown);
        assert_eq!(normalize_finish_reason(Some("\n\t")), FinishReason::Unknown);
    }

    #[test]
    fn unmapped_is_unknown() {
        assert_eq!(normalize_finish_reason(Some("foobar")), FinishReason::Unknown);
        assert_eq!(normalize_finish_reason(Some("FINISH_REASON_UNSPECIFIED")), FinishReason::Unknown);
    }

    #[test]
    fn displays_snake_case() {
        assert_eq!(FinishReason::ContentFilter.to_string(), "content_filter");
        assert_eq!(FinishReason::ToolCalls.to_string(), "tool_calls");
    }
}
