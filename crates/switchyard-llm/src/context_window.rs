//! Token-budgeted context window selection

use std::sync::LazyLock;

use serde::Serialize;
use switchyard_core::ModelLimits;
use tiktoken_rs::{CoreBPE, o200k_base};

use crate::types::{Content, ContentPart, Message, Role};

/// Counts tokens in a piece of text
pub trait TokenCounter: Send + Sync {
    /// Token count of `text`
    fn count(&self, text: &str) -> usize;
}

static O200K: LazyLock<Option<CoreBPE>> = LazyLock::new(|| o200k_base().ok());

/// `o200k_base` tokenizer, falling back to a length estimate when the
/// encoding cannot be loaded
#[derive(Debug, Clone, Copy, Default)]
pub struct TiktokenCounter;

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        O200K
            .as_ref()
            .map_or_else(|| text.len() / 4, |bpe| bpe.encode_with_special_tokens(text).len())
    }
}

/// Token cost of one history turn: text, tool result payloads, and
/// serialized tool arguments
pub fn message_tokens(message: &Message, counter: &dyn TokenCounter) -> usize {
    let mut total = counter.count(&message.text());

    if let Content::Parts(parts) = &message.content {
        for part in parts {
            if let ContentPart::ToolResult { content, .. } = part {
                total += counter.count(content);
            }
        }
    }

    for result in message.recorded_results() {
        total += counter.count(&result.content_text());
    }

    for call in message.invocations() {
        total += counter.count(&call.arguments);
    }

    total
}

/// Requested input and output allowances plus the model's hard limits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowBudget {
    /// Input tokens the caller is willing to spend on history
    pub input_tokens: u32,
    /// Output tokens to reserve for the reply
    pub output_tokens: u32,
    /// Model's hard context window (input + output)
    pub context_limit: Option<u32>,
    /// Model's maximum output tokens
    pub completion_limit: Option<u32>,
}

impl WindowBudget {
    /// Budget with no model limits applied
    pub const fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            context_limit: None,
            completion_limit: None,
        }
    }

    /// Apply a model's limits
    #[must_use]
    pub const fn with_limits(mut self, limits: ModelLimits) -> Self {
        self.context_limit = limits.context_tokens;
        self.completion_limit = limits.completion_tokens;
        self
    }

    /// Effective (input, output) allowances
    ///
    /// Output is reserved first. When input plus output would exceed the
    /// context limit, input shrinks by the overflow.
    pub fn resolve(&self) -> (u32, u32) {
        let output = self
            .completion_limit
            .map_or(self.output_tokens, |limit| self.output_tokens.min(limit));
        let mut input = self
            .context_limit
            .map_or(self.input_tokens, |limit| self.input_tokens.min(limit));

        if let Some(limit) = self.context_limit {
            let overflow = input.saturating_add(output).saturating_sub(limit);
            input = input.saturating_sub(overflow);
        }

        (input, output)
    }
}

/// Messages selected for one call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextWindow {
    /// System message (when non-empty) followed by the newest history that fits
    pub messages: Vec<Message>,
    /// Effective input allowance
    pub input_budget: u32,
    /// Effective output reservation
    pub output_budget: u32,
    /// Tokens used by the selected messages, system message included
    pub used_tokens: usize,
    /// History turns left out
    pub dropped: usize,
    /// The effective input allowance was zero
    pub budget_exhausted: bool,
}

/// Select the newest history that fits the input budget
///
/// Walks history from newest to oldest and stops at the first turn that would
/// not fit, so no turn is partially included and no older turn jumps the
/// queue. System turns inside `history` are skipped; `system_prompt` is always
/// prepended, even when the budget is exhausted.
pub fn build_context_window(
    system_prompt: &str,
    history: &[Message],
    budget: WindowBudget,
    counter: &dyn TokenCounter,
) -> ContextWindow {
    let (input_budget, output_budget) = budget.resolve();

    let budget_exhausted = input_budget == 0;
    if budget_exhausted {
        tracing::warn!(
            input_tokens = budget.input_tokens,
            output_tokens = budget.output_tokens,
            context_limit = budget.context_limit,
            "computed input budget is not positive, sending the system message only"
        );
    }

    let system_tokens = if system_prompt.is_empty() {
        0
    } else {
        counter.count(system_prompt)
    };
    let remaining = usize::try_from(input_budget)
        .unwrap_or(usize::MAX)
        .saturating_sub(system_tokens);

    let candidates: Vec<&Message> = history.iter().filter(|m| m.role != Role::System).collect();

    let mut selected = Vec::new();
    let mut used = 0;
    for message in candidates.iter().rev() {
        let cost = message_tokens(message, counter);
        if used + cost >= remaining {
            break;
        }
        used += cost;
        selected.push((*message).clone());
    }
    selected.reverse();

    let dropped = candidates.len() - selected.len();
    if dropped > 0 {
        tracing::debug!(dropped, kept = selected.len(), "trimmed history to fit the input budget");
    }

    let mut messages = Vec::with_capacity(selected.len() + 1);
    if !system_prompt.is_empty() {
        messages.push(Message::system(system_prompt));
    }
    messages.extend(selected);

    ContextWindow {
        messages,
        input_budget,
        output_budget,
        used_tokens: system_tokens + used,
        dropped,
        budget_exhausted,
    }
}
