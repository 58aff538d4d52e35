//! Conversion between canonical types and Google Gemini wire format

use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;
use switchyard_core::{PricingTier, RequestContext, UsageMetadata, UsageRecord};

use super::{Reply, last_user_index, position, system_prompt};
use crate::finish::{FinishReason, normalize_finish_reason};
use crate::protocol::google::{
    GoogleContent, GoogleFileData, GoogleFunctionCall, GoogleFunctionCallingConfig, GoogleFunctionDeclaration,
    GoogleFunctionResponse, GoogleGenerationConfig, GoogleInlineData, GooglePart, GoogleRequest, GoogleResponse,
    GoogleStreamChunk, GoogleThinkingConfig, GoogleTool, GoogleToolConfig, GoogleUsageMetadata,
};
use crate::stream::{Delta, StreamDecoder, StreamOutcome};
use crate::types::{
    Content, ContentPart, Continuation, FileRef, Message, PreparedParams, ResponseFormat, Role, ToolChoice,
    ToolDefinition, ToolInvocation, split_data_uri,
};

/// Prompt-size pricing thresholds, keyed by a model name fragment
const TIER_THRESHOLDS: &[(&str, u64)] = &[("gemini-1.5-pro", 128_000), ("gemini-2.5-pro", 200_000)];

const MAX_FUNCTION_NAME_LEN: usize = 64;

static INVALID_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_.-]").expect("valid function name pattern"));

/// Usage of one Gemini call, with the model it was billed against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleUsage {
    /// Upstream model identifier
    pub model: String,
    /// Usage metadata as reported
    pub metadata: GoogleUsageMetadata,
}

// -- Outbound: canonical -> Gemini --

/// Build a `generateContent` request
pub fn build_request(params: &PreparedParams, context: &RequestContext) -> GoogleRequest {
    let attach_to = last_user_index(&params.messages).filter(|_| !params.files.is_empty());

    let mut contents = Vec::with_capacity(params.messages.len());
    for (index, message) in params.messages.iter().enumerate() {
        let files = if attach_to == Some(index) { params.files.as_slice() } else { &[] };
        push_message(&mut contents, message, files);
    }

    let thinking_config = (params.use_reasoning && context.capabilities.reasoning).then(|| GoogleThinkingConfig {
        include_thoughts: true,
        thinking_budget: params.max_thinking_tokens.or(context.limits.max_thinking_tokens),
    });

    let generation_config = GoogleGenerationConfig {
        temperature: params.sampling.temperature,
        top_p: params.sampling.top_p,
        top_k: params.sampling.top_k,
        max_output_tokens: params.max_tokens,
        stop_sequences: params.sampling.stop.clone(),
        response_mime_type: (params.response_format == ResponseFormat::Json).then(|| "application/json".to_owned()),
        thinking_config,
    };

    let has_tools = params.has_tools();

    GoogleRequest {
        contents,
        system_instruction: system_prompt(&params.messages).map(|prompt| GoogleContent {
            role: None,
            parts: vec![GooglePart::text(prompt)],
        }),
        generation_config: (generation_config != GoogleGenerationConfig::default()).then_some(generation_config),
        tools: has_tools.then(|| {
            vec![GoogleTool {
                function_declarations: params.tools.iter().map(GoogleFunctionDeclaration::from).collect(),
            }]
        }),
        tool_config: params.tool_choice.as_ref().filter(|_| has_tools).map(tool_config),
    }
}

fn push_message(out: &mut Vec<GoogleContent>, message: &Message, files: &[FileRef]) {
    let role = match message.role {
        Role::System => return,
        Role::Assistant => "model",
        Role::User | Role::Tool => "user",
    };

    let mut parts = Vec::new();

    if message.role == Role::Tool {
        parts.push(function_response(
            message.name.as_deref().unwrap_or_default(),
            &message.text(),
        ));
    } else {
        push_content(&mut parts, &message.content);
    }

    parts.extend(files.iter().map(|file| media_part(&file.url, file.mime_type.as_deref())));

    parts.extend(message.invocations().iter().map(|call| GooglePart {
        function_call: Some(GoogleFunctionCall {
            name: sanitize_function_name(&call.name),
            args: call.arguments_json(),
        }),
        thought_signature: match &call.continuation {
            Some(Continuation::Signature { signature }) => Some(signature.clone()),
            _ => None,
        },
        ..GooglePart::default()
    }));

    push_merged(out, role, parts);

    let results: Vec<GooglePart> = message
        .recorded_results()
        .iter()
        .map(|result| function_response(&result.name, &result.content_text()))
        .collect();
    push_merged(out, "user", results);
}

fn push_content(parts: &mut Vec<GooglePart>, content: &Content) {
    match content {
        Content::Text(text) if text.is_empty() => {}
        Content::Text(text) => parts.push(GooglePart::text(text.clone())),
        Content::Parts(content) => {
            for part in content {
                match part {
                    ContentPart::Text { text } if text.is_empty() => {}
                    ContentPart::Text { text } => parts.push(GooglePart::text(text.clone())),
                    ContentPart::Image { url, .. } => parts.push(media_part(url, None)),
                    ContentPart::ToolResult { name, content, .. } => {
                        parts.push(function_response(name.as_deref().unwrap_or_default(), content));
                    }
                }
            }
        }
    }
}

/// Append parts, merging into the previous content when the role repeats
fn push_merged(out: &mut Vec<GoogleContent>, role: &str, parts: Vec<GooglePart>) {
    if parts.is_empty() {
        return;
    }

    if let Some(last) = out.last_mut()
        && last.role.as_deref() == Some(role)
    {
        last.parts.extend(parts);
        return;
    }

    out.push(GoogleContent {
        role: Some(role.to_owned()),
        parts,
    });
}

fn function_response(name: &str, content: &str) -> GooglePart {
    let name = sanitize_function_name(name);
    GooglePart {
        function_response: Some(GoogleFunctionResponse {
            response: json!({ "name": name, "content": content }),
            name,
        }),
        ..GooglePart::default()
    }
}

fn media_part(url: &str, mime_type: Option<&str>) -> GooglePart {
    match split_data_uri(url) {
        Some((mime, data)) => GooglePart {
            inline_data: Some(GoogleInlineData {
                mime_type: mime_type.unwrap_or(mime).to_owned(),
                data: data.to_owned(),
            }),
            ..GooglePart::default()
        },
        None => GooglePart {
            file_data: Some(GoogleFileData {
                mime_type: mime_type.map(str::to_owned),
                file_uri: url.to_owned(),
            }),
            ..GooglePart::default()
        },
    }
}

/// Make a tool name acceptable to Gemini
///
/// Keeps `[a-zA-Z0-9_.-]`, starts with a letter or underscore and is at most
/// 64 characters long.
pub fn sanitize_function_name(name: &str) -> String {
    let cleaned = INVALID_NAME_CHARS.replace_all(name, "");
    if cleaned.is_empty() {
        return "_unnamed_function".to_owned();
    }

    let mut sanitized = if cleaned.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        cleaned.into_owned()
    } else {
        format!("_{cleaned}")
    };
    sanitized.truncate(MAX_FUNCTION_NAME_LEN);
    sanitized
}

impl From<&ToolDefinition> for GoogleFunctionDeclaration {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            name: sanitize_function_name(&tool.name),
            description: tool.description.clone(),
            parameters: Some(object_schema(tool.parameters.as_ref())),
        }
    }
}

/// Gemini rejects object schemas without properties
fn object_schema(parameters: Option<&serde_json::Value>) -> serde_json::Value {
    let mut schema = parameters
        .filter(|schema| schema.is_object())
        .cloned()
        .unwrap_or_else(|| json!({"type": "object"}));

    let has_properties = schema
        .get("properties")
        .and_then(serde_json::Value::as_object)
        .is_some_and(|properties| !properties.is_empty());

    if !has_properties {
        schema["properties"] = json!({"dummy": {"type": "string"}});
    }
    schema
}

fn tool_config(choice: &ToolChoice) -> GoogleToolConfig {
    let (mode, allowed) = match choice {
        ToolChoice::Auto => ("AUTO", None),
        ToolChoice::Required => ("ANY", None),
        ToolChoice::None => ("NONE", None),
        ToolChoice::Function { name } => ("ANY", Some(vec![sanitize_function_name(name)])),
    };

    GoogleToolConfig {
        function_calling_config: GoogleFunctionCallingConfig {
            mode: mode.to_owned(),
            allowed_function_names: allowed,
        },
    }
}

// -- Inbound: Gemini -> canonical --

/// Canonical invocation for a function call part
fn invocation(index: u32, part: &GooglePart) -> Option<ToolInvocation> {
    let call = part.function_call.as_ref()?;
    let mut invocation = ToolInvocation::new(index, format!("tool-{index}"), &call.name, call.args.to_string());
    invocation.continuation = part
        .thought_signature
        .clone()
        .map(|signature| Continuation::Signature { signature });
    Some(invocation)
}

/// Interpret a blocking `generateContent` response
pub fn reply(response: GoogleResponse, model: &str) -> Reply<GoogleUsage> {
    let mut content = String::new();
    let mut tools = Vec::new();
    let mut raw_reason = None;

    if let Some(candidate) = response.candidates.into_iter().next() {
        raw_reason = candidate.finish_reason;
        for part in candidate.content.map(|content| content.parts).unwrap_or_default() {
            if let Some(call) = invocation(position(tools.len()), &part) {
                tools.push(call);
            } else if let Some(text) = part.text.as_deref().filter(|_| !part.is_thought()) {
                content.push_str(text);
            }
        }
    }

    // Gemini reports STOP for function calls
    let finish_reason = if tools.is_empty() {
        normalize_finish_reason(raw_reason.as_deref())
    } else {
        FinishReason::ToolCalls
    };

    Reply {
        content,
        finish_reason,
        tools,
        usage: response.usage_metadata.map(|metadata| GoogleUsage {
            model: model.to_owned(),
            metadata,
        }),
    }
}

// -- Usage --

/// Usage record for a Gemini call
///
/// Text and audio prompt tokens are reported separately, and long prompts on
/// tiered models are billed at the higher tier.
pub fn usage_record(usage: &GoogleUsage, metadata: &UsageMetadata) -> UsageRecord {
    let reported = &usage.metadata;
    let input_tokens = reported.modality_tokens("TEXT").unwrap_or(reported.prompt_token_count);

    let tier = TIER_THRESHOLDS
        .iter()
        .find(|(fragment, _)| usage.model.contains(fragment))
        .map(|&(_, threshold)| {
            if input_tokens < threshold {
                PricingTier::Tier1
            } else {
                PricingTier::Tier2
            }
        });

    UsageRecord {
        input_tokens,
        output_tokens: reported.candidates_token_count,
        cache_read_tokens: reported.cached_content_token_count,
        reasoning_tokens: reported.thoughts_token_count,
        audio_input_tokens: reported.modality_tokens("AUDIO").unwrap_or(0),
        tier,
        ..metadata.record()
    }
}

// -- Streaming --

/// Collects function calls and usage across Gemini stream chunks
#[derive(Debug)]
pub struct GoogleStreamState {
    model: String,
    tools: Vec<ToolInvocation>,
    finish_reason: Option<String>,
    usage: Option<GoogleUsageMetadata>,
}

impl GoogleStreamState {
    /// Create an empty stream state for `model`
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            tools: Vec::new(),
            finish_reason: None,
            usage: None,
        }
    }
}

impl StreamDecoder for GoogleStreamState {
    type Chunk = GoogleStreamChunk;
    type Usage = GoogleUsage;

    fn convert_chunk(&mut self, chunk: &GoogleStreamChunk) -> Vec<Delta> {
        if let Some(error) = &chunk.error {
            return vec![Delta::Failed(error.message.clone())];
        }
        if let Some(usage) = &chunk.usage_metadata {
            self.usage = Some(usage.clone());
        }

        let mut deltas = Vec::new();
        let Some(candidate) = chunk.candidates.first() else {
            return deltas;
        };

        for part in candidate.content.iter().flat_map(|content| &content.parts) {
            if let Some(call) = invocation(position(self.tools.len()), part) {
                self.tools.push(call);
            } else if let Some(text) = &part.text {
                deltas.push(if part.is_thought() {
                    Delta::Thinking(text.clone())
                } else {
                    Delta::Content(text.clone())
                });
            }
        }

        if let Some(reason) = &candidate.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
        deltas
    }

    fn finish(self) -> StreamOutcome<GoogleUsage> {
        let model = self.model;
        StreamOutcome {
            finish_reason: normalize_finish_reason(self.finish_reason.as_deref()),
            tools: self.tools,
            usage: self.usage.map(|metadata| GoogleUsage { model, metadata }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::user_result_follow_up;
    use crate::types::ToolResult;

    fn context() -> RequestContext {
        RequestContext::new("google", "gemini-2.5-flash")
    }

    #[test]
    fn maps_roles_and_system_instruction() {
        let params = PreparedParams {
            max_tokens: Some(100),
            ..PreparedParams::new(
                "gemini",
                vec![
                    Message::system("Be kind."),
                    Message::user("Hi"),
                    Message::assistant("Hello"),
                    Message::user("Bye"),
                ],
            )
        };

        let body = serde_json::to_value(build_request(&params, &context())).unwrap();

        assert_eq!(
            body,
            json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "Hi"}]},
                    {"role": "model", "parts": [{"text": "Hello"}]},
                    {"role": "user", "parts": [{"text": "Bye"}]}
                ],
                "systemInstruction": {"parts": [{"text": "Be kind."}]},
                "generationConfig": {"maxOutputTokens": 100}
            })
        );
    }

    #[test]
    fn json_mode_sets_response_mime_type() {
        let params = PreparedParams {
            response_format: ResponseFormat::Json,
            ..PreparedParams::new("gemini", vec![Message::user("hi")])
        };
        let body = build_request(&params, &context());
        assert_eq!(
            body.generation_config.unwrap().response_mime_type.as_deref(),
            Some("application/json")
        );
    }

    #[test]
    fn sanitizes_function_names() {
        assert_eq!(sanitize_function_name("get weather!"), "getweather");
        assert_eq!(sanitize_function_name("1st-tool"), "_1st-tool");
        assert_eq!(sanitize_function_name("???"), "_unnamed_function");
        assert_eq!(sanitize_function_name(&"a".repeat(80)).len(), 64);
    }

    #[test]
    fn tools_get_placeholder_schema_and_choice_config() {
        let params = PreparedParams {
            tools: vec![ToolDefinition {
                name: "ping".to_owned(),
                description: None,
                parameters: None,
            }],
            tool_choice: Some(ToolChoice::Function { name: "ping".to_owned() }),
            ..PreparedParams::new("gemini", vec![Message::user("hi")])
        };

        let body = serde_json::to_value(build_request(&params, &context())).unwrap();

        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["parameters"],
            json!({"type": "object", "properties": {"dummy": {"type": "string"}}})
        );
        assert_eq!(
            body["toolConfig"],
            json!({"functionCallingConfig": {"mode": "ANY", "allowedFunctionNames": ["ping"]}})
        );
    }

    #[test]
    fn tool_round_trip_uses_function_parts() {
        let mut call = ToolInvocation::new(0, "tool-0", "lookup", r#"{"id":7}"#);
        call.continuation = Some(Continuation::Signature {
            signature: "sig".to_owned(),
        });
        let turns = user_result_follow_up(
            &Message::tool_use("", vec![call]),
            &[ToolResult::new("tool-0", "lookup", "ok")],
        );

        let body = serde_json::to_value(build_request(&PreparedParams::new("gemini", turns), &context())).unwrap();

        assert_eq!(
            body["contents"],
            json!([
                {
                    "role": "model",
                    "parts": [{"functionCall": {"name": "lookup", "args": {"id": 7}}, "thoughtSignature": "sig"}]
                },
                {
                    "role": "user",
                    "parts": [{"functionResponse": {"name": "lookup", "response": {"name": "lookup", "content": "ok"}}}]
                }
            ])
        );
    }

    #[test]
    fn reply_assigns_positional_tool_ids() {
        let response: GoogleResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "Calling."},
                    {"functionCall": {"name": "a", "args": {"x": 1}}},
                    {"functionCall": {"name": "b", "args": {}}, "thoughtSignature": "s"}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 3}
        }))
        .unwrap();

        let reply = reply(response, "gemini-2.5-flash");

        assert_eq!(reply.content, "Calling.");
        assert_eq!(reply.finish_reason, FinishReason::ToolCalls);
        assert_eq!(reply.tools[0].id, "tool-0");
        assert_eq!(reply.tools[0].arguments, r#"{"x":1}"#);
        assert_eq!(reply.tools[1].id, "tool-1");
        assert_eq!(
            reply.tools[1].continuation,
            Some(Continuation::Signature { signature: "s".to_owned() })
        );
    }

    #[test]
    fn usage_splits_modalities_and_tiers() {
        let metadata: GoogleUsageMetadata = serde_json::from_value(json!({
            "promptTokenCount": 250_000,
            "candidatesTokenCount": 40,
            "cachedContentTokenCount": 1000,
            "thoughtsTokenCount": 12,
            "promptTokensDetails": [
                {"modality": "TEXT", "tokenCount": 240_000},
                {"modality": "AUDIO", "tokenCount": 10_000}
            ]
        }))
        .unwrap();
        let usage = GoogleUsage {
            model: "gemini-2.5-pro".to_owned(),
            metadata,
        };

        let record = usage_record(&usage, &UsageMetadata::default());

        assert_eq!(record.input_tokens, 240_000);
        assert_eq!(record.audio_input_tokens, 10_000);
        assert_eq!(record.output_tokens, 40);
        assert_eq!(record.cache_read_tokens, 1000);
        assert_eq!(record.reasoning_tokens, 12);
        assert_eq!(record.tier, Some(PricingTier::Tier2));

        let small = GoogleUsage {
            model: "gemini-1.5-pro-002".to_owned(),
            metadata: GoogleUsageMetadata {
                prompt_token_count: 500,
                ..GoogleUsageMetadata::default()
            },
        };
        let record = usage_record(&small, &UsageMetadata::default());
        assert_eq!(record.input_tokens, 500);
        assert_eq!(record.tier, Some(PricingTier::Tier1));

        let untiered = GoogleUsage {
            model: "gemini-2.5-flash".to_owned(),
            metadata: GoogleUsageMetadata::default(),
        };
        assert_eq!(usage_record(&untiered, &UsageMetadata::default()).tier, None);
    }

    #[test]
    fn stream_state_separates_thoughts() {
        let mut state = GoogleStreamState::new("gemini-2.5-flash");
        let chunks = [
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "hmm", "thought": true}]}}]}),
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Hello"}]}}]}),
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": " there"}]}, "finishReason": "MAX_TOKENS"}],
                   "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2}}),
        ];

        let mut deltas = Vec::new();
        for chunk in chunks {
            let chunk: GoogleStreamChunk = serde_json::from_value(chunk).unwrap();
            deltas.extend(state.convert_chunk(&chunk));
        }
        let outcome = state.finish();

        assert_eq!(
            deltas,
            vec![
                Delta::Thinking("hmm".to_owned()),
                Delta::Content("Hello".to_owned()),
                Delta::Content(" there".to_owned()),
            ]
        );
        assert_eq!(outcome.finish_reason, FinishReason::Length);
        assert_eq!(outcome.usage.unwrap().metadata.prompt_token_count, 4);
    }
}
