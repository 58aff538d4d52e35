//! Conversion between canonical types and `OpenAI` wire format

use std::collections::BTreeMap;

use serde_json::json;
use switchyard_core::{RequestContext, UsageMetadata, UsageRecord};

use super::{Reply, last_user_index, paired_results, position};
use crate::error::LlmError;
use crate::finish::normalize_finish_reason;
use crate::protocol::openai::{
    OpenAiContent, OpenAiContentPart, OpenAiFunction, OpenAiFunctionCall, OpenAiImage, OpenAiImageRequest,
    OpenAiImageUrl, OpenAiImageUsage, OpenAiMessage, OpenAiRequest, OpenAiResponse, OpenAiResponseFormat,
    OpenAiStreamChunk, OpenAiStreamToolCall, OpenAiTool, OpenAiToolCall, OpenAiUsage,
};
use crate::stream::{Delta, StreamDecoder, StreamOutcome};
use crate::types::{
    Content, ContentPart, FileRef, ImageData, ImageOptions, Message, PreparedParams, ResponseFormat, Role, ToolChoice,
    ToolDefinition, ToolInvocation, ToolResult,
};

// -- Outbound: canonical -> OpenAI --

/// Build a chat completion request
///
/// Attached files join the last user turn as image parts. The reasoning effort
/// is only sent to models flagged as reasoning-capable.
pub fn build_request(params: &PreparedParams, context: &RequestContext) -> OpenAiRequest {
    let attach_to = last_user_index(&params.messages).filter(|_| !params.files.is_empty());

    let mut messages = Vec::with_capacity(params.messages.len());
    for (index, message) in params.messages.iter().enumerate() {
        let files = if attach_to == Some(index) { params.files.as_slice() } else { &[] };
        push_message(&mut messages, message, files);
    }

    let has_tools = params.has_tools();

    OpenAiRequest {
        model: context.model.clone(),
        messages,
        temperature: params.sampling.temperature,
        top_p: params.sampling.top_p,
        max_completion_tokens: params.max_tokens,
        stop: params.sampling.stop.clone(),
        stream: None,
        stream_options: None,
        tools: has_tools.then(|| params.tools.iter().map(OpenAiTool::from).collect()),
        tool_choice: params.tool_choice.as_ref().filter(|_| has_tools).map(tool_choice_value),
        response_format: (params.response_format == ResponseFormat::Json).then(|| OpenAiResponseFormat {
            format_type: "json_object".to_owned(),
        }),
        reasoning_effort: params
            .reasoning_effort
            .filter(|_| context.capabilities.reasoning)
            .map(|effort| effort.to_string()),
    }
}

/// Append the wire messages for one canonical turn
///
/// Tool results, whether carried as parts or recorded on the invocation turn,
/// become `tool` role messages after it.
fn push_message(out: &mut Vec<OpenAiMessage>, message: &Message, files: &[FileRef]) {
    if message.role == Role::Tool {
        out.push(tool_reply(message.tool_call_id.clone().unwrap_or_default(), message.text()));
        return;
    }

    let mut parts = Vec::new();
    let mut replies = Vec::new();

    match &message.content {
        Content::Text(text) if text.is_empty() => {}
        Content::Text(text) => parts.push(OpenAiContentPart::Text { text: text.clone() }),
        Content::Parts(content) => {
            for part in content {
                match part {
                    ContentPart::Text { text } => parts.push(OpenAiContentPart::Text { text: text.clone() }),
                    ContentPart::Image { url, detail } => parts.push(OpenAiContentPart::ImageUrl {
                        image_url: OpenAiImageUrl {
                            url: url.clone(),
                            detail: detail.clone(),
                        },
                    }),
                    ContentPart::ToolResult {
                        tool_call_id, content, ..
                    } => replies.push(tool_reply(tool_call_id.clone(), content.clone())),
                }
            }
        }
    }

    parts.extend(files.iter().map(|file| OpenAiContentPart::ImageUrl {
        image_url: OpenAiImageUrl {
            url: file.url.clone(),
            detail: None,
        },
    }));

    replies.extend(
        message
            .recorded_results()
            .iter()
            .map(|result| tool_reply(result.tool_call_id.clone(), result.content_text())),
    );

    let tool_calls: Option<Vec<OpenAiToolCall>> = message
        .has_tool_invocations()
        .then(|| message.invocations().iter().map(OpenAiToolCall::from).collect());

    if !parts.is_empty() || tool_calls.is_some() || replies.is_empty() {
        let content = match parts.as_slice() {
            [] if tool_calls.is_some() => None,
            [] => Some(OpenAiContent::Text(String::new())),
            [OpenAiContentPart::Text { text }] => Some(OpenAiContent::Text(text.clone())),
            _ => Some(OpenAiContent::Parts(parts)),
        };

        out.push(OpenAiMessage {
            role: message.role.to_string(),
            content,
            name: message.name.clone(),
            tool_calls,
            tool_call_id: None,
        });
    }

    out.extend(replies);
}

fn tool_reply(tool_call_id: String, text: String) -> OpenAiMessage {
    OpenAiMessage {
        role: "tool".to_owned(),
        content: Some(OpenAiContent::Text(text)),
        name: None,
        tool_calls: None,
        tool_call_id: Some(tool_call_id),
    }
}

impl From<&ToolDefinition> for OpenAiTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            tool_type: "function".to_owned(),
            function: OpenAiFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        }
    }
}

impl From<&ToolInvocation> for OpenAiToolCall {
    fn from(call: &ToolInvocation) -> Self {
        Self {
            id: call.id.clone(),
            tool_type: "function".to_owned(),
            function: OpenAiFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

fn tool_choice_value(choice: &ToolChoice) -> serde_json::Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Function { name } => json!({
            "type": "function",
            "function": { "name": name },
        }),
    }
}

/// Build an image generation request
pub fn image_request(prompt: &str, options: &ImageOptions, context: &RequestContext) -> OpenAiImageRequest {
    OpenAiImageRequest {
        model: context.model.clone(),
        prompt: prompt.to_owned(),
        n: options.n.unwrap_or(1),
        size: options.size.clone(),
        quality: options.quality.clone(),
        style: options.style.clone(),
    }
}

// -- Inbound: OpenAI -> canonical --

/// Interpret a blocking chat completion response
pub fn reply(response: OpenAiResponse) -> Result<Reply<OpenAiUsage>, LlmError> {
    let usage = response.usage;
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(LlmError::Transport("response contained no choices".to_owned()));
    };

    let tools = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(index, call)| ToolInvocation::new(position(index), call.id, call.function.name, call.function.arguments))
        .collect();

    Ok(Reply {
        content: choice.message.content.or(choice.message.refusal).unwrap_or_default(),
        finish_reason: normalize_finish_reason(choice.finish_reason.as_deref()),
        tools,
        usage,
    })
}

/// Canonical images from an images API response
pub fn images(data: Vec<OpenAiImage>) -> Vec<ImageData> {
    data.into_iter()
        .map(|image| ImageData {
            url: image.url,
            b64_json: image.b64_json,
            revised_prompt: image.revised_prompt,
        })
        .collect()
}

/// Follow-up turns for a tool round trip: the invocation turn, then one
/// `tool` role turn per answered call
pub fn tool_follow_up(message: &Message, results: &[ToolResult]) -> Vec<Message> {
    let mut turns = vec![Message {
        tool_results: None,
        ..message.clone()
    }];
    turns.extend(
        paired_results(message, results)
            .into_iter()
            .map(|(call, result)| Message::tool(&call.id, &call.name, result.content_text())),
    );
    turns
}

// -- Usage --

/// Usage record for a chat completion
///
/// Cached prompt tokens are billed separately, so they are subtracted from
/// the input count.
pub fn usage_record(usage: &OpenAiUsage, metadata: &UsageMetadata) -> UsageRecord {
    let cached = usage.prompt_tokens_details.as_ref().map_or(0, |details| details.cached_tokens);
    UsageRecord {
        input_tokens: usage.prompt_tokens.saturating_sub(cached),
        output_tokens: usage.completion_tokens,
        cache_read_tokens: cached,
        cost: usage.cost.unwrap_or(0.0),
        ..metadata.record()
    }
}

/// Usage record for an images call
pub fn image_usage_record(usage: &OpenAiImageUsage, metadata: &UsageMetadata) -> UsageRecord {
    UsageRecord {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        ..metadata.record()
    }
}

// -- Streaming --

/// Accumulates tool call fragments across `OpenAI` stream chunks
#[derive(Debug, Default)]
pub struct OpenAiStreamState {
    tools: BTreeMap<u32, ToolInvocation>,
    finish_reason: Option<String>,
    usage: Option<OpenAiUsage>,
}

impl OpenAiStreamState {
    /// Create an empty stream state
    pub fn new() -> Self {
        Self::default()
    }

    fn accumulate(&mut self, call: &OpenAiStreamToolCall) {
        let entry = self
            .tools
            .entry(call.index)
            .or_insert_with(|| ToolInvocation::new(call.index, "", "", ""));

        if let Some(id) = &call.id {
            entry.id.clone_from(id);
        }
        if let Some(function) = &call.function {
            if let Some(name) = &function.name {
                entry.name.push_str(name);
            }
            if let Some(arguments) = &function.arguments {
                entry.arguments.push_str(arguments);
            }
        }
    }
}

impl StreamDecoder for OpenAiStreamState {
    type Chunk = OpenAiStreamChunk;
    type Usage = OpenAiUsage;

    fn convert_chunk(&mut self, chunk: &OpenAiStreamChunk) -> Vec<Delta> {
        if let Some(error) = &chunk.error {
            return vec![Delta::Failed(error.message.clone())];
        }
        if let Some(usage) = &chunk.usage {
            self.usage = Some(usage.clone());
        }

        let mut deltas = Vec::new();
        for choice in &chunk.choices {
            if let Some(text) = &choice.delta.reasoning_content {
                deltas.push(Delta::Thinking(text.clone()));
            }
            if let Some(text) = &choice.delta.content {
                deltas.push(Delta::Content(text.clone()));
            }
            for call in choice.delta.tool_calls.iter().flatten() {
                self.accumulate(call);
            }
            if let Some(reason) = &choice.finish_reason {
                self.finish_reason = Some(reason.clone());
            }
        }
        deltas
    }

    fn finish(self) -> StreamOutcome<OpenAiUsage> {
        StreamOutcome {
            tools: self.tools.into_values().collect(),
            finish_reason: normalize_finish_reason(self.finish_reason.as_deref()),
            usage: self.usage,
        }
    }
}
