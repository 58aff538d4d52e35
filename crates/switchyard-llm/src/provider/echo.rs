//! Offline provider that answers with the caller's last message
//!
//! Makes no network calls. Useful for dry runs and for exercising the
//! streaming and fallback machinery without a vendor.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use switchyard_core::{RequestContext, UsageMetadata, UsageRecord, UsageSink};
use tokio_util::sync::CancellationToken;

use super::{Provider, VendorBody, VendorUsage};
use crate::convert::openai::tool_follow_up;
use crate::error::LlmError;
use crate::finish::FinishReason;
use crate::stream::{EventStream, spawn_stream};
use crate::types::{ChatResult, Message, PreparedParams, Role, ToolResult};

/// Request body for the echo provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EchoRequest {
    /// Upstream model name, reported back in `Requested`
    pub model: String,
    /// Text of the last user turn
    pub text: String,
    /// Words across the whole history, billed as input
    pub prompt_words: u64,
}

/// Word counts billed by the echo provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EchoUsage {
    /// Words in the prompt
    pub input_words: u64,
    /// Words echoed back
    pub output_words: u64,
}

impl EchoUsage {
    /// Usage record counting one token per word
    pub fn record(&self, metadata: &UsageMetadata) -> UsageRecord {
        UsageRecord {
            input_tokens: self.input_words,
            output_tokens: self.output_words,
            ..metadata.record()
        }
    }
}

fn word_count(text: &str) -> u64 {
    u64::try_from(text.split_whitespace().count()).unwrap_or(u64::MAX)
}

/// Echo provider
#[derive(Clone)]
pub struct EchoProvider {
    name: String,
    usage: Arc<dyn UsageSink>,
}

impl EchoProvider {
    /// Create an echo provider publishing to `usage`
    pub fn new(name: String, usage: Arc<dyn UsageSink>) -> Self {
        Self { name, usage }
    }

    fn unpack(&self, body: VendorBody) -> Result<EchoRequest, LlmError> {
        match body {
            VendorBody::Echo(request) => Ok(request),
            other => Err(other.mismatch(&self.name)),
        }
    }

    fn usage_for(request: &EchoRequest) -> VendorUsage {
        VendorUsage::Echo(EchoUsage {
            input_words: request.prompt_words,
            output_words: word_count(&request.text),
        })
    }
}

#[async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn usage_sink(&self) -> &Arc<dyn UsageSink> {
        &self.usage
    }

    fn adapt_request_body(&self, params: &PreparedParams, context: &RequestContext) -> Result<VendorBody, LlmError> {
        let text = params
            .messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(Message::text)
            .unwrap_or_default();

        Ok(VendorBody::Echo(EchoRequest {
            model: context.model.clone(),
            text,
            prompt_words: params.messages.iter().map(|message| word_count(&message.text())).sum(),
        }))
    }

    async fn request(&self, body: VendorBody, context: &RequestContext) -> Result<ChatResult, LlmError> {
        let request = self.unpack(body)?;
        let record = self.report_usage(&Self::usage_for(&request), &UsageMetadata::from(context));
        let native_message = serde_json::json!({"role": "assistant", "content": request.text});

        Ok(ChatResult::new(
            request.text,
            FinishReason::Stop,
            Vec::new(),
            native_message,
            Some(record),
        ))
    }

    /// One `Data` + `Content` pair per word, then `End`
    fn stream_request(&self, body: VendorBody, context: RequestContext, cancel: CancellationToken) -> EventStream {
        let provider = self.clone();

        spawn_stream(move |mut emitter| async move {
            let request = match provider.unpack(body) {
                Ok(request) => request,
                Err(e) => {
                    emitter.fail(e);
                    return;
                }
            };
            if cancel.is_cancelled() {
                emitter.abort();
                return;
            }

            emitter.requested(&provider.name, &request.model);

            let words: Vec<&str> = request.text.split_whitespace().collect();
            for (i, word) in words.iter().enumerate() {
                if cancel.is_cancelled() || emitter.is_closed() {
                    emitter.abort();
                    return;
                }
                let piece = if i + 1 == words.len() {
                    (*word).to_owned()
                } else {
                    format!("{word} ")
                };
                emitter.data(serde_json::json!({"delta": piece}));
                emitter.content(piece);
                tokio::task::yield_now().await;
            }

            let record = provider.report_usage(&EchoProvider::usage_for(&request), &UsageMetadata::from(&context));
            emitter.record_usage(record);
            emitter.finish(Vec::new(), FinishReason::Stop);
        })
    }

    fn transform_tool_message_blocks(&self, message: &Message, results: &[ToolResult]) -> Vec<Message> {
        tool_follow_up(message, results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::tests::CapturingSink;
    use crate::stream::tests::{assert_well_formed, collect, end_reason, kinds};
    use crate::types::StreamEvent;

    fn echo(sink: Arc<CapturingSink>) -> EchoProvider {
        EchoProvider::new("echo".to_owned(), sink)
    }

    fn params(text: &str) -> PreparedParams {
        PreparedParams::new("echo", vec![Message::system("ignored rules"), Message::user(text)])
    }

    #[tokio::test]
    async fn request_echoes_last_user_message() {
        let sink = Arc::new(CapturingSink::default());
        let provider = echo(sink.clone());
        let context = RequestContext::new("echo", "echo-1");
        let body = provider.adapt_request_body(&params("hello there"), &context).unwrap();

        let result = provider.request(body, &context).await.unwrap();

        assert_eq!(result.content, "hello there");
        assert_eq!(result.finish_reason, FinishReason::Stop);
        let record = &sink.records()[0];
        assert_eq!(record.input_tokens, 4);
        assert_eq!(record.output_tokens, 2);
    }

    #[tokio::test]
    async fn stream_emits_one_piece_per_word() {
        let provider = echo(Arc::new(CapturingSink::default()));
        let context = RequestContext::new("echo", "echo-1");
        let body = provider.adapt_request_body(&params("one two three"), &context).unwrap();

        let events = collect(provider.stream_request(body, context, CancellationToken::new())).await;

        assert_well_formed(&events);
        assert_eq!(
            kinds(&events),
            vec!["requested", "data", "content", "data", "content", "data", "content", "end"]
        );
        let pieces: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Content(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(pieces, vec!["one ", "two ", "three"]);
        assert_eq!(end_reason(&events), FinishReason::Stop);
    }

    #[tokio::test]
    async fn pre_cancelled_stream_only_aborts() {
        let provider = echo(Arc::new(CapturingSink::default()));
        let context = RequestContext::new("echo", "echo-1");
        let body = provider.adapt_request_body(&params("one two"), &context).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let events = collect(provider.stream_request(body, context, cancel)).await;

        assert_eq!(kinds(&events), vec!["abort", "end"]);
        assert_eq!(end_reason(&events), FinishReason::Abort);
    }

    #[tokio::test]
    async fn events_wait_for_the_consumer() {
        let provider = echo(Arc::new(CapturingSink::default()));
        let context = RequestContext::new("echo", "echo-1");
        let body = provider.adapt_request_body(&params("late listener"), &context).unwrap();

        let stream = provider.stream_request(body, context, CancellationToken::new());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let events = collect(stream).await;

        assert_eq!(events[0].kind(), "requested");
        assert_well_formed(&events);
    }
}
