//! Conversion between canonical types and vendor wire formats
//!
//! Each submodule builds the vendor request body from [`PreparedParams`],
//! extracts a [`Reply`] from a blocking response, decodes stream chunks and
//! maps vendor usage into a [`UsageRecord`](switchyard_core::UsageRecord).
//!
//! [`PreparedParams`]: crate::types::PreparedParams

pub mod anthropic;
pub mod google;
pub mod ollama;
pub mod openai;

use crate::finish::FinishReason;
use crate::types::{Content, ContentPart, Message, Role, ToolInvocation, ToolResult};

/// Instruction appended to the system prompt for vendors without a native JSON mode
pub const JSON_INSTRUCTION: &str =
    "Respond only with a single valid JSON object. Do not wrap it in markdown or add any text outside the JSON.";

/// Interpreted blocking response
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<U> {
    /// Assistant text
    pub content: String,
    /// Normalized finish reason
    pub finish_reason: FinishReason,
    /// Requested tool calls
    pub tools: Vec<ToolInvocation>,
    /// Vendor usage, when reported
    pub usage: Option<U>,
}

/// Text of every system turn, joined by blank lines
pub(crate) fn system_prompt(messages: &[Message]) -> Option<String> {
    let parts: Vec<String> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(Message::text)
        .filter(|text| !text.trim().is_empty())
        .collect();

    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

/// Pair each invocation of `message` with its result
///
/// Invocations without a result are left out; strict-pairing providers drop
/// the whole turn later.
pub(crate) fn paired_results<'a>(message: &'a Message, results: &'a [ToolResult]) -> Vec<(&'a ToolInvocation, &'a ToolResult)> {
    message
        .invocations()
        .iter()
        .filter_map(|call| {
            results
                .iter()
                .find(|result| result.tool_call_id == call.id)
                .map(|result| (call, result))
        })
        .collect()
}

/// Index of the last user turn, where attached files are placed
pub(crate) fn last_user_index(messages: &[Message]) -> Option<usize> {
    messages.iter().rposition(|m| m.role == Role::User)
}

/// Position of an item as a tool-call index
pub(crate) fn position(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

/// Follow-up turns for vendors that carry results in a user turn: the
/// invocation turn, then one user turn with a result part per answered call
pub(crate) fn user_result_follow_up(message: &Message, results: &[ToolResult]) -> Vec<Message> {
    let parts: Vec<ContentPart> = paired_results(message, results)
        .into_iter()
        .map(|(call, result)| ContentPart::ToolResult {
            tool_call_id: call.id.clone(),
            name: Some(call.name.clone()),
            content: result.content_text(),
            is_error: result.is_error(),
        })
        .collect();

    let mut turns = vec![Message {
        tool_results: None,
        ..message.clone()
    }];
    if !parts.is_empty() {
        turns.push(Message {
            content: Content::Parts(parts),
            ..Message::user("")
        });
    }
    turns
}
