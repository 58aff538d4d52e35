//! Conversion between canonical types and Anthropic wire format

use std::collections::BTreeMap;

use switchyard_core::{RequestContext, UsageMetadata, UsageRecord};

use super::{JSON_INSTRUCTION, Reply, last_user_index, position, system_prompt};
use crate::finish::normalize_finish_reason;
use crate::protocol::anthropic::{
    AnthropicCacheControl, AnthropicContent, AnthropicContentBlock, AnthropicImageSource, AnthropicMessage,
    AnthropicOutputConfig, AnthropicRequest, AnthropicResponse, AnthropicStreamDelta, AnthropicStreamEvent,
    AnthropicSystemBlock, AnthropicThinking, AnthropicTool, AnthropicToolChoice, AnthropicUsage,
};
use crate::stream::{Delta, StreamDecoder, StreamOutcome};
use crate::types::{
    Content, ContentPart, Continuation, FileRef, Message, PreparedParams, ReasoningEffort, ResponseFormat, Role,
    ToolChoice, ToolDefinition, ToolInvocation, split_data_uri,
};

/// Output cap used when neither the caller nor the catalog sets one
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Thinking budget used when neither the caller nor the catalog sets one
pub const DEFAULT_THINKING_BUDGET: u32 = 1024;

/// Models that accept `output_config.effort`
const EFFORT_MODELS: &[&str] = &["claude-opus-4-5", "claude-opus-4-6"];

// -- Outbound: canonical -> Anthropic --

/// Build a messages API request
pub fn build_request(params: &PreparedParams, context: &RequestContext) -> AnthropicRequest {
    let max_tokens = params
        .max_tokens
        .or(context.limits.completion_tokens)
        .unwrap_or(DEFAULT_MAX_TOKENS);

    // Temperature and top_p are mutually exclusive, temperature wins
    let (mut temperature, top_p) = match params.sampling.temperature {
        Some(value) if value >= 0.0 => (Some(value), None),
        _ => (None, params.sampling.top_p),
    };
    let mut top_k = params.sampling.top_k;

    let has_tools = params.has_tools();
    let mut tool_choice = params.tool_choice.as_ref().filter(|_| has_tools).map(wire_tool_choice);

    let mut thinking = None;
    if params.use_reasoning && context.capabilities.reasoning {
        let cap = params
            .max_thinking_tokens
            .or(context.limits.max_thinking_tokens)
            .unwrap_or(DEFAULT_THINKING_BUDGET);
        thinking = Some(AnthropicThinking {
            thinking_type: "enabled".to_owned(),
            budget_tokens: thinking_budget(cap, max_tokens),
        });
        temperature = None;
        top_k = None;
        if tool_choice.as_ref().is_some_and(AnthropicToolChoice::is_forced) {
            tool_choice = Some(AnthropicToolChoice::of("auto"));
        }
    }

    let tools = has_tools.then(|| {
        let mut tools: Vec<AnthropicTool> = params.tools.iter().map(AnthropicTool::from).collect();
        if params.cache
            && let Some(last) = tools.last_mut()
        {
            last.cache_control = Some(AnthropicCacheControl::ephemeral());
        }
        tools
    });

    AnthropicRequest {
        model: context.model.clone(),
        max_tokens,
        system: system_blocks(params),
        messages: messages(params),
        temperature,
        top_p,
        top_k,
        stop_sequences: params.sampling.stop.clone(),
        stream: None,
        tools,
        tool_choice,
        thinking,
        output_config: params
            .reasoning_effort
            .filter(|_| supports_effort(&context.model))
            .map(|effort| AnthropicOutputConfig {
                effort: effort_level(effort).to_owned(),
            }),
    }
}

/// Budget for extended thinking, always below `max_tokens`
fn thinking_budget(cap: u32, max_tokens: u32) -> u32 {
    let budget = cap.min(max_tokens);
    if budget < max_tokens {
        return budget;
    }
    u32::try_from(u64::from(max_tokens) * 4 / 5).unwrap_or(budget)
}

fn supports_effort(model: &str) -> bool {
    EFFORT_MODELS.iter().any(|prefix| model.starts_with(prefix))
}

const fn effort_level(effort: ReasoningEffort) -> &'static str {
    match effort {
        ReasoningEffort::Minimal | ReasoningEffort::Low => "low",
        ReasoningEffort::Medium => "medium",
        ReasoningEffort::High => "high",
    }
}

fn system_blocks(params: &PreparedParams) -> Option<Vec<AnthropicSystemBlock>> {
    let mut prompt = system_prompt(&params.messages);
    if params.response_format == ResponseFormat::Json {
        prompt = Some(match prompt {
            Some(prompt) => format!("{prompt}\n\n{JSON_INSTRUCTION}"),
            None => JSON_INSTRUCTION.to_owned(),
        });
    }

    prompt.map(|prompt| {
        let mut block = AnthropicSystemBlock::text(prompt);
        if params.cache {
            block.cache_control = Some(AnthropicCacheControl::ephemeral());
        }
        vec![block]
    })
}

fn messages(params: &PreparedParams) -> Vec<AnthropicMessage> {
    let attach_to = last_user_index(&params.messages).filter(|_| !params.files.is_empty());

    let mut out = Vec::with_capacity(params.messages.len());
    for (index, message) in params.messages.iter().enumerate() {
        let files = if attach_to == Some(index) { params.files.as_slice() } else { &[] };
        push_message(&mut out, message, files);
    }
    out
}

fn push_message(out: &mut Vec<AnthropicMessage>, message: &Message, files: &[FileRef]) {
    match message.role {
        Role::System => {}
        Role::Tool => push_merged(
            out,
            "user",
            vec![AnthropicContentBlock::ToolResult {
                tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                content: Some(message.text()),
                is_error: None,
            }],
        ),
        Role::User => {
            let mut blocks = content_blocks(&message.content);
            blocks.extend(files.iter().map(|file| AnthropicContentBlock::Image {
                source: image_source(&file.url),
            }));
            push_merged(out, "user", blocks);
        }
        Role::Assistant => {
            // Reasoning blocks must precede the tool calls they led to
            let mut blocks = continuation_blocks(message.invocations());
            blocks.extend(content_blocks(&message.content));
            blocks.extend(message.invocations().iter().map(|call| AnthropicContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments_json(),
            }));
            push_merged(out, "assistant", blocks);

            let results = message
                .recorded_results()
                .iter()
                .map(|result| AnthropicContentBlock::ToolResult {
                    tool_use_id: result.tool_call_id.clone(),
                    content: Some(result.content_text()),
                    is_error: result.is_error().then_some(true),
                })
                .collect();
            push_merged(out, "user", results);
        }
    }
}

/// Append blocks, merging into the previous message when the role repeats
fn push_merged(out: &mut Vec<AnthropicMessage>, role: &str, blocks: Vec<AnthropicContentBlock>) {
    if blocks.is_empty() {
        return;
    }

    if let Some(last) = out.last_mut()
        && last.role == role
        && let AnthropicContent::Blocks(existing) = &mut last.content
    {
        existing.extend(blocks);
        return;
    }

    out.push(AnthropicMessage {
        role: role.to_owned(),
        content: AnthropicContent::Blocks(blocks),
    });
}

fn content_blocks(content: &Content) -> Vec<AnthropicContentBlock> {
    match content {
        Content::Text(text) if text.is_empty() => Vec::new(),
        Content::Text(text) => vec![AnthropicContentBlock::Text { text: text.clone() }],
        Content::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } if text.is_empty() => None,
                ContentPart::Text { text } => Some(AnthropicContentBlock::Text { text: text.clone() }),
                ContentPart::Image { url, .. } => Some(AnthropicContentBlock::Image {
                    source: image_source(url),
                }),
                ContentPart::ToolResult {
                    tool_call_id,
                    content,
                    is_error,
                    ..
                } => Some(AnthropicContentBlock::ToolResult {
                    tool_use_id: tool_call_id.clone(),
                    content: Some(content.clone()),
                    is_error: is_error.then_some(true),
                }),
            })
            .collect(),
    }
}

fn image_source(url: &str) -> AnthropicImageSource {
    match split_data_uri(url) {
        Some((media_type, data)) => AnthropicImageSource::Base64 {
            media_type: media_type.to_owned(),
            data: data.to_owned(),
        },
        None => AnthropicImageSource::Url { url: url.to_owned() },
    }
}

/// Replay reasoning blocks stored on the turn's invocations
fn continuation_blocks(calls: &[ToolInvocation]) -> Vec<AnthropicContentBlock> {
    let Some(blocks) = calls.iter().find_map(|call| match &call.continuation {
        Some(Continuation::Thinking { blocks }) => Some(blocks),
        _ => None,
    }) else {
        return Vec::new();
    };

    blocks
        .iter()
        .filter_map(|block| serde_json::from_value::<AnthropicContentBlock>(block.clone()).ok())
        .filter(|block| {
            matches!(
                block,
                AnthropicContentBlock::Thinking { .. } | AnthropicContentBlock::RedactedThinking { .. }
            )
        })
        .collect()
}

impl From<&ToolDefinition> for AnthropicTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool
                .parameters
                .clone()
                .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
            cache_control: None,
        }
    }
}

fn wire_tool_choice(choice: &ToolChoice) -> AnthropicToolChoice {
    match choice {
        ToolChoice::Auto => AnthropicToolChoice::of("auto"),
        ToolChoice::None => AnthropicToolChoice::of("none"),
        ToolChoice::Required => AnthropicToolChoice::of("any"),
        ToolChoice::Function { name } => AnthropicToolChoice {
            choice_type: "tool".to_owned(),
            name: Some(name.clone()),
        },
    }
}

// -- Inbound: Anthropic -> canonical --

/// Interpret a blocking messages API response
pub fn reply(response: AnthropicResponse) -> Reply<AnthropicUsage> {
    let mut content = String::new();
    let mut tools = Vec::new();
    let mut reasoning = Vec::new();

    for block in response.content {
        match block {
            AnthropicContentBlock::Text { text } => content.push_str(&text),
            AnthropicContentBlock::ToolUse { id, name, input } => {
                tools.push(ToolInvocation::new(position(tools.len()), id, name, input.to_string()));
            }
            block @ (AnthropicContentBlock::Thinking { .. } | AnthropicContentBlock::RedactedThinking { .. }) => {
                if let Ok(value) = serde_json::to_value(&block) {
                    reasoning.push(value);
                }
            }
            _ => {}
        }
    }

    attach_reasoning(&mut tools, reasoning);

    Reply {
        content,
        finish_reason: normalize_finish_reason(response.stop_reason.as_deref()),
        tools,
        usage: Some(response.usage),
    }
}

/// Store reasoning blocks on the first invocation so the next turn can replay them
fn attach_reasoning(tools: &mut [ToolInvocation], blocks: Vec<serde_json::Value>) {
    if blocks.is_empty() {
        return;
    }
    if let Some(first) = tools.first_mut() {
        first.continuation = Some(Continuation::Thinking { blocks });
    }
}

// -- Usage --

/// Usage record for a messages API call
pub fn usage_record(usage: &AnthropicUsage, metadata: &UsageMetadata) -> UsageRecord {
    UsageRecord {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        cache_write_tokens: usage.cache_creation_input_tokens,
        cache_read_tokens: usage.cache_read_input_tokens,
        ..metadata.record()
    }
}

// -- Streaming --

#[derive(Debug)]
enum PartialBlock {
    Text,
    ToolUse { id: String, name: String, json: String },
    Thinking { thinking: String, signature: String },
    RedactedThinking { data: String },
    Other,
}

/// Tracks content blocks across Anthropic stream events
#[derive(Debug, Default)]
pub struct AnthropicStreamState {
    blocks: BTreeMap<u32, PartialBlock>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

impl AnthropicStreamState {
    /// Create an empty stream state
    pub fn new() -> Self {
        Self::default()
    }

    fn start_block(&mut self, index: u32, block: &AnthropicContentBlock) -> Vec<Delta> {
        let (partial, deltas) = match block {
            AnthropicContentBlock::Text { text } => (PartialBlock::Text, vec![Delta::Content(text.clone())]),
            AnthropicContentBlock::ToolUse { id, name, .. } => (
                PartialBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    json: String::new(),
                },
                Vec::new(),
            ),
            AnthropicContentBlock::Thinking { thinking, signature } => (
                PartialBlock::Thinking {
                    thinking: thinking.clone(),
                    signature: signature.clone(),
                },
                vec![Delta::Thinking(thinking.clone())],
            ),
            AnthropicContentBlock::RedactedThinking { data } => {
                (PartialBlock::RedactedThinking { data: data.clone() }, Vec::new())
            }
            _ => (PartialBlock::Other, Vec::new()),
        };
        self.blocks.insert(index, partial);
        deltas
    }

    fn apply_delta(&mut self, index: u32, delta: &AnthropicStreamDelta) -> Vec<Delta> {
        let block = self.blocks.get_mut(&index);
        match (delta, block) {
            (AnthropicStreamDelta::TextDelta { text }, _) => vec![Delta::Content(text.clone())],
            (AnthropicStreamDelta::InputJsonDelta { partial_json }, Some(PartialBlock::ToolUse { json, .. })) => {
                json.push_str(partial_json);
                Vec::new()
            }
            (AnthropicStreamDelta::ThinkingDelta { thinking }, block) => {
                if let Some(PartialBlock::Thinking { thinking: text, .. }) = block {
                    text.push_str(thinking);
                }
                vec![Delta::Thinking(thinking.clone())]
            }
            (AnthropicStreamDelta::SignatureDelta { signature }, Some(PartialBlock::Thinking { signature: sig, .. })) => {
                sig.push_str(signature);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn merge_usage(&mut self, update: &AnthropicUsage) {
        let usage = self.usage.get_or_insert_with(AnthropicUsage::default);
        usage.output_tokens = update.output_tokens;
        if update.input_tokens > 0 {
            usage.input_tokens = update.input_tokens;
        }
        if update.cache_creation_input_tokens > 0 {
            usage.cache_creation_input_tokens = update.cache_creation_input_tokens;
        }
        if update.cache_read_input_tokens > 0 {
            usage.cache_read_input_tokens = update.cache_read_input_tokens;
        }
    }
}

impl StreamDecoder for AnthropicStreamState {
    type Chunk = AnthropicStreamEvent;
    type Usage = AnthropicUsage;

    fn convert_chunk(&mut self, event: &AnthropicStreamEvent) -> Vec<Delta> {
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(usage) = &message.usage {
                    self.usage = Some(usage.clone());
                }
                Vec::new()
            }
            AnthropicStreamEvent::ContentBlockStart { index, content_block } => self.start_block(*index, content_block),
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => self.apply_delta(*index, delta),
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = &delta.stop_reason {
                    self.stop_reason = Some(reason.clone());
                }
                if let Some(usage) = usage {
                    self.merge_usage(usage);
                }
                Vec::new()
            }
            AnthropicStreamEvent::Error { error } => vec![Delta::Failed(error.message.clone())],
            AnthropicStreamEvent::ContentBlockStop { .. } | AnthropicStreamEvent::MessageStop | AnthropicStreamEvent::Ping => {
                Vec::new()
            }
        }
    }

    fn finish(self) -> StreamOutcome<AnthropicUsage> {
        let mut tools = Vec::new();
        let mut reasoning = Vec::new();

        for block in self.blocks.into_values() {
            match block {
                PartialBlock::ToolUse { id, name, json } => {
                    let arguments = if json.trim().is_empty() { "{}".to_owned() } else { json };
                    tools.push(ToolInvocation::new(position(tools.len()), id, name, arguments));
                }
                PartialBlock::Thinking { thinking, signature } => reasoning.push(serde_json::json!({
                    "type": "thinking",
                    "thinking": thinking,
                    "signature": signature,
                })),
                PartialBlock::RedactedThinking { data } => reasoning.push(serde_json::json!({
                    "type": "redacted_thinking",
                    "data": data,
                })),
                PartialBlock::Text | PartialBlock::Other => {}
            }
        }

        attach_reasoning(&mut tools, reasoning);

        StreamOutcome {
            tools,
            finish_reason: normalize_finish_reason(self.stop_reason.as_deref()),
            usage: self.usage,
        }
    }
}
