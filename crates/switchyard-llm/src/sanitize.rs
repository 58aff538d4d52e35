//! Message consistency repair run on history before every dispatch
//!
//! History is untrusted, partially persisted state. The pass never fails: it
//! drops or replaces turns until the history is acceptable to the provider.

use std::collections::HashSet;

use crate::types::{Content, ContentPart, Message, Role};

/// Text of the user turn inserted when history does not start with one
pub const FILLER_TEXT: &str = "continue";

/// Role a provider requires for the first non-system turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadingRole {
    /// Any role is accepted
    Any,
    /// History must open with a user turn
    User,
}

/// Provider requirements applied by [`sanitize_message_flow`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizePolicy {
    /// Every tool call must have a matching result somewhere in history
    pub strict_pairing: bool,
    /// Required role of the first non-system turn
    pub leading_role: LeadingRole,
}

impl SanitizePolicy {
    /// No pairing or ordering requirements
    pub const LENIENT: Self = Self {
        strict_pairing: false,
        leading_role: LeadingRole::Any,
    };

    /// Strict call/result pairing, history opens with a user turn
    pub const STRICT: Self = Self {
        strict_pairing: true,
        leading_role: LeadingRole::User,
    };
}

/// Repair `messages` for a provider with the given `policy`
///
/// Drops tool-call turns whose recorded result is an error, collapses
/// consecutive same-role turns, drops unpaired tool calls and results under
/// strict pairing, and inserts a filler user turn when the provider needs one.
/// The pass is repeated until nothing changes, so applying it to its own
/// output is a no-op.
pub fn sanitize_message_flow(messages: Vec<Message>, policy: SanitizePolicy) -> Vec<Message> {
    let mut current = messages;

    // A changing pass removes a turn, trims unmatched results, or inserts the filler
    for _ in 0..=2 * current.len() + 1 {
        let next = sanitize_pass(&current, policy);
        if next == current {
            break;
        }
        current = next;
    }

    current
}

fn sanitize_pass(messages: &[Message], policy: SanitizePolicy) -> Vec<Message> {
    let mut sanitized = collapse_turns(messages);

    if policy.strict_pairing {
        sanitized = drop_unpaired(sanitized);
    }

    if policy.leading_role == LeadingRole::User {
        ensure_leading_user(&mut sanitized);
    }

    sanitized
}

fn collapse_turns(messages: &[Message]) -> Vec<Message> {
    let mut sanitized: Vec<Message> = Vec::with_capacity(messages.len());

    for current in messages {
        if has_errored_result(current) {
            tracing::warn!(
                tools = ?tool_names(current),
                "dropping tool-call turn with an errored result"
            );
            continue;
        }

        let Some(last) = sanitized.last_mut() else {
            sanitized.push(current.clone());
            continue;
        };

        match (last.role, current.role) {
            (Role::User, Role::User) if !carries_results(last) && !carries_results(current) => {
                *last = current.clone();
                continue;
            }
            (Role::Assistant, Role::Assistant) => {
                if last.has_tool_invocations() && !has_successful_result(last) {
                    *last = current.clone();
                    continue;
                }

                if (has_successful_result(current) || has_text(current))
                    && !has_successful_result(last)
                    && !has_text(last)
                {
                    *last = current.clone();
                    continue;
                }

                if last.has_tool_invocations()
                    && current.has_tool_invocations()
                    && tool_names(last) == tool_names(current)
                {
                    if has_successful_result(current) && !has_successful_result(last) {
                        *last = current.clone();
                    }
                    continue;
                }
            }
            _ => {}
        }

        sanitized.push(current.clone());
    }

    sanitized
}

/// Drop tool calls with no result anywhere, and results with no call
fn drop_unpaired(messages: Vec<Message>) -> Vec<Message> {
    let answered: HashSet<String> = messages
        .iter()
        .flat_map(Message::result_ids)
        .map(str::to_owned)
        .collect();

    let paired: Vec<Message> = messages
        .into_iter()
        .filter(|message| {
            let unpaired = message
                .invocations()
                .iter()
                .any(|call| !answered.contains(&call.id));
            if unpaired {
                tracing::warn!(tools = ?tool_names(message), "dropping tool-call turn without matching results");
            }
            !unpaired
        })
        .collect();

    let invoked: HashSet<String> = paired
        .iter()
        .flat_map(|message| message.invocations().iter().map(|call| call.id.clone()))
        .chain(paired.iter().flat_map(|message| {
            message
                .recorded_results()
                .iter()
                .map(|result| result.tool_call_id.clone())
        }))
        .collect();

    paired
        .into_iter()
        .filter_map(|message| drop_orphaned_results(message, &invoked))
        .collect()
}

fn drop_orphaned_results(mut message: Message, invoked: &HashSet<String>) -> Option<Message> {
    if message.role == Role::Tool
        && let Some(id) = &message.tool_call_id
        && !invoked.contains(id)
    {
        tracing::warn!(tool_call_id = %id, "dropping tool result without a matching call");
        return None;
    }

    if let Content::Parts(parts) = &mut message.content {
        let before = parts.len();
        parts.retain(|part| match part {
            ContentPart::ToolResult { tool_call_id, .. } => invoked.contains(tool_call_id),
            ContentPart::Text { .. } | ContentPart::Image { .. } => true,
        });
        if parts.is_empty() && before > 0 {
            tracing::warn!("dropping turn made only of unmatched tool results");
            return None;
        }
    }

    Some(message)
}

fn ensure_leading_user(messages: &mut Vec<Message>) {
    let first = messages
        .iter()
        .position(|message| message.role != Role::System)
        .unwrap_or(messages.len());

    if messages.get(first).is_some_and(|message| message.role == Role::User) || messages.is_empty() {
        return;
    }

    messages.insert(first, Message::user(FILLER_TEXT));
}

/// Replace blank text on non-tool turns with `placeholder`
///
/// Some vendors reject empty text blocks outright.
pub fn fill_blank_content(messages: Vec<Message>, placeholder: &str) -> Vec<Message> {
    messages
        .into_iter()
        .map(|mut message| {
            if message.role != Role::Tool && !message.has_tool_invocations() && message.content.is_blank() {
                message.content = Content::Text(placeholder.to_owned());
            }
            message
        })
        .collect()
}

/// Remove system turns that carry no text
pub fn drop_blank_system(messages: Vec<Message>) -> Vec<Message> {
    messages
        .into_iter()
        .filter(|message| message.role != Role::System || !message.content.is_blank())
        .collect()
}

fn has_text(message: &Message) -> bool {
    !message.content.is_blank()
}

fn has_successful_result(message: &Message) -> bool {
    message.recorded_results().iter().any(crate::types::ToolResult::is_success)
}

fn has_errored_result(message: &Message) -> bool {
    message.recorded_results().iter().any(crate::types::ToolResult::is_error)
}

fn carries_results(message: &Message) -> bool {
    message.tool_call_id.is_some()
        || matches!(&message.content, Content::Parts(parts)
            if parts.iter().any(|part| matches!(part, ContentPart::ToolResult { .. })))
}

fn tool_names(message: &Message) -> Vec<&str> {
    let mut names: Vec<&str> = message.invocations().iter().map(|call| call.name.as_str()).collect();
    names.sort_unstable();
    names
}
