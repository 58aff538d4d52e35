//! Conversion between canonical types and Ollama wire format

use switchyard_core::{RequestContext, UsageMetadata, UsageRecord};

use super::{JSON_INSTRUCTION, Reply, last_user_index, position, system_prompt};
use crate::finish::{FinishReason, normalize_finish_reason};
use crate::protocol::ollama::{
    OllamaFunctionCall, OllamaMessage, OllamaOptions, OllamaRequest, OllamaResponse, OllamaToolCall, OllamaUsage,
};
use crate::protocol::openai::OpenAiTool;
use crate::stream::{Delta, StreamDecoder, StreamOutcome};
use crate::types::{Content, ContentPart, FileRef, Message, PreparedParams, ResponseFormat, Role, ToolInvocation, split_data_uri};

// -- Outbound: canonical -> Ollama --

/// Build a `/api/chat` request
///
/// Ollama only accepts inline base64 images; remote image URLs are skipped.
pub fn build_request(params: &PreparedParams, context: &RequestContext) -> OllamaRequest {
    let json_mode = params.response_format == ResponseFormat::Json;
    let mut messages = Vec::with_capacity(params.messages.len() + 1);

    let mut system = system_prompt(&params.messages);
    if json_mode {
        system = Some(match system {
            Some(prompt) => format!("{prompt}\n\n{JSON_INSTRUCTION}"),
            None => JSON_INSTRUCTION.to_owned(),
        });
    }
    if let Some(system) = system {
        messages.push(OllamaMessage::text("system", system));
    }

    let attach_to = last_user_index(&params.messages).filter(|_| !params.files.is_empty());
    for (index, message) in params.messages.iter().enumerate() {
        let files = if attach_to == Some(index) { params.files.as_slice() } else { &[] };
        push_message(&mut messages, message, files);
    }

    let options = OllamaOptions {
        num_predict: params.max_tokens,
        temperature: params.sampling.temperature,
        top_p: params.sampling.top_p,
        top_k: params.sampling.top_k,
        stop: params.sampling.stop.clone(),
    };

    OllamaRequest {
        model: context.model.clone(),
        messages,
        stream: false,
        format: json_mode.then(|| "json".to_owned()),
        options: (!options.is_empty()).then_some(options),
        tools: params.has_tools().then(|| params.tools.iter().map(OpenAiTool::from).collect()),
    }
}

fn push_message(out: &mut Vec<OllamaMessage>, message: &Message, files: &[FileRef]) {
    match message.role {
        Role::System => {}
        Role::Tool => out.push(OllamaMessage {
            tool_name: message.name.clone(),
            ..OllamaMessage::text("tool", message.text())
        }),
        Role::User | Role::Assistant => {
            let mut text = String::new();
            let mut images = Vec::new();
            let mut replies = Vec::new();

            match &message.content {
                Content::Text(value) => text.push_str(value),
                Content::Parts(parts) => {
                    for part in parts {
                        match part {
                            ContentPart::Text { text: value } => text.push_str(value),
                            ContentPart::Image { url, .. } => images.extend(inline_image(url)),
                            ContentPart::ToolResult { name, content, .. } => replies.push(OllamaMessage {
                                tool_name: name.clone(),
                                ..OllamaMessage::text("tool", content.clone())
                            }),
                        }
                    }
                }
            }
            images.extend(files.iter().filter_map(|file| inline_image(&file.url)));

            replies.extend(message.recorded_results().iter().map(|result| OllamaMessage {
                tool_name: Some(result.name.clone()),
                ..OllamaMessage::text("tool", result.content_text())
            }));

            let tool_calls: Vec<OllamaToolCall> = message
                .invocations()
                .iter()
                .map(|call| OllamaToolCall {
                    function: OllamaFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments_json(),
                    },
                })
                .collect();

            if !text.is_empty() || !images.is_empty() || !tool_calls.is_empty() || replies.is_empty() {
                out.push(OllamaMessage {
                    images: (!images.is_empty()).then_some(images),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    ..OllamaMessage::text(&message.role.to_string(), text)
                });
            }
            out.extend(replies);
        }
    }
}

fn inline_image(url: &str) -> Option<String> {
    split_data_uri(url).map(|(_, data)| data.to_owned())
}

// -- Inbound: Ollama -> canonical --

fn invocations(message: Option<&OllamaMessage>, offset: usize) -> Vec<ToolInvocation> {
    message
        .and_then(|message| message.tool_calls.as_ref())
        .into_iter()
        .flatten()
        .enumerate()
        .map(|(index, call)| {
            let index = position(offset + index);
            ToolInvocation::new(
                index,
                format!("tool-{index}"),
                &call.function.name,
                call.function.arguments.to_string(),
            )
        })
        .collect()
}

/// Interpret a blocking chat reply
pub fn reply(response: OllamaResponse) -> Reply<OllamaUsage> {
    let tools = invocations(response.message.as_ref(), 0);
    let finish_reason = if tools.is_empty() {
        normalize_finish_reason(response.done_reason.as_deref())
    } else {
        FinishReason::ToolCalls
    };

    Reply {
        usage: response.usage(),
        content: response.message.map(|message| message.content).unwrap_or_default(),
        finish_reason,
        tools,
    }
}

// -- Usage --

/// Usage record for a chat call
pub fn usage_record(usage: &OllamaUsage, metadata: &UsageMetadata) -> UsageRecord {
    UsageRecord {
        input_tokens: usage.prompt_eval_count,
        output_tokens: usage.eval_count,
        ..metadata.record()
    }
}

// -- Streaming --

/// Collects tool calls and usage across NDJSON chat lines
#[derive(Debug, Default)]
pub struct OllamaStreamState {
    tools: Vec<ToolInvocation>,
    done_reason: Option<String>,
    usage: Option<OllamaUsage>,
}

impl OllamaStreamState {
    /// Create an empty stream state
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamDecoder for OllamaStreamState {
    type Chunk = OllamaResponse;
    type Usage = OllamaUsage;

    fn convert_chunk(&mut self, chunk: &OllamaResponse) -> Vec<Delta> {
        if let Some(error) = &chunk.error {
            return vec![Delta::Failed(error.clone())];
        }

        let mut deltas = Vec::new();
        if let Some(message) = &chunk.message {
            if let Some(thinking) = &message.thinking {
                deltas.push(Delta::Thinking(thinking.clone()));
            }
            deltas.push(Delta::Content(message.content.clone()));
        }
        let calls = invocations(chunk.message.as_ref(), self.tools.len());
        self.tools.extend(calls);

        if chunk.done {
            self.done_reason.clone_from(&chunk.done_reason);
            self.usage = chunk.usage();
        }
        deltas
    }

    fn finish(self) -> StreamOutcome<OllamaUsage> {
        StreamOutcome {
            finish_reason: normalize_finish_reason(self.done_reason.as_deref()),
            tools: self.tools,
            usage: self.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::{Sampling, ToolResult};

    fn context() -> RequestContext {
        RequestContext::new("ollama", "llama3.2")
    }

    #[test]
    fn builds_request_with_options_and_json_format() {
        let params = PreparedParams {
            max_tokens: Some(64),
            sampling: Sampling {
                temperature: Some(0.1),
                top_k: Some(5),
                ..Sampling::default()
            },
            response_format: ResponseFormat::Json,
            ..PreparedParams::new("llama", vec![Message::system("Extract."), Message::user("a=1")])
        };

        let body = serde_json::to_value(build_request(&params, &context())).unwrap();

        assert_eq!(
            body,
            json!({
                "model": "llama3.2",
                "messages": [
                    {"role": "system", "content": format!("Extract.\n\n{JSON_INSTRUCTION}")},
                    {"role": "user", "content": "a=1"}
                ],
                "stream": false,
                "format": "json",
                "options": {"num_predict": 64, "temperature": 0.1, "top_k": 5}
            })
        );
    }

    #[test]
    fn tool_arguments_are_objects() {
        let call = ToolInvocation::new(0, "tool-0", "add", r#"{"a":1,"b":2}"#);
        let mut invocation = Message::tool_use("", vec![call]);
        invocation.tool_results = Some(vec![ToolResult::new("tool-0", "add", json!(3))]);

        let body = build_request(&PreparedParams::new("llama", vec![Message::user("sum"), invocation]), &context());
        let value = serde_json::to_value(&body.messages).unwrap();

        assert_eq!(
            value,
            json!([
                {"role": "user", "content": "sum"},
                {"role": "assistant", "content": "", "tool_calls": [{"function": {"name": "add", "arguments": {"a": 1, "b": 2}}}]},
                {"role": "tool", "content": "3", "tool_name": "add"}
            ])
        );
    }

    #[test]
    fn reply_reads_usage_and_tools() {
        let response: OllamaResponse = serde_json::from_value(json!({
            "model": "llama3.2",
            "message": {"role": "assistant", "content": "", "tool_calls": [
                {"function": {"name": "add", "arguments": {"a": 1}}}
            ]},
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 26,
            "eval_count": 9
        }))
        .unwrap();

        let reply = reply(response);

        assert_eq!(reply.finish_reason, FinishReason::ToolCalls);
        assert_eq!(reply.tools[0].id, "tool-0");
        assert_eq!(
            reply.usage,
            Some(OllamaUsage {
                prompt_eval_count: 26,
                eval_count: 9
            })
        );
    }

    #[test]
    fn stream_state_reads_final_line() {
        let mut state = OllamaStreamState::new();
        let lines = [
            json!({"message": {"role": "assistant", "content": "Hi"}, "done": false}),
            json!({"message": {"role": "assistant", "content": "!"}, "done": false}),
            json!({"message": {"role": "assistant", "content": ""}, "done": true, "done_reason": "length",
                   "prompt_eval_count": 3, "eval_count": 2}),
        ];

        let mut text = String::new();
        for line in lines {
            let chunk: OllamaResponse = serde_json::from_value(line).unwrap();
            for delta in state.convert_chunk(&chunk) {
                if let Delta::Content(part) = delta {
                    text.push_str(&part);
                }
            }
        }
        let outcome = state.finish();

        assert_eq!(text, "Hi!");
        assert_eq!(outcome.finish_reason, FinishReason::Length);
        assert_eq!(outcome.usage.unwrap().eval_count, 2);
    }
}
