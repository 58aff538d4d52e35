//! Anthropic Messages API provider implementation

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use switchyard_config::ProviderConfig;
use switchyard_core::{RequestContext, UsageMetadata, UsageSink};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::http::{self, Framing};
use super::{Provider, VendorBody, VendorUsage};
use crate::convert::anthropic::{AnthropicStreamState, build_request, reply};
use crate::convert::user_result_follow_up;
use crate::error::LlmError;
use crate::protocol::anthropic::{AnthropicRequest, AnthropicResponse};
use crate::sanitize::{SanitizePolicy, drop_blank_system, fill_blank_content, sanitize_message_flow};
use crate::stream::{EventStream, spawn_stream};
use crate::types::{ChatResult, Message, PreparedParams, ToolResult};

/// Default Anthropic API base URL
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Text sent in place of turns the API would reject as empty
const BLANK_PLACEHOLDER: &str = "...";

/// Anthropic Messages API provider
#[derive(Clone)]
pub struct AnthropicProvider {
    name: String,
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
    usage: Arc<dyn UsageSink>,
}

impl AnthropicProvider {
    /// Create from provider configuration
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded default base URL is invalid (should never happen).
    pub fn new(name: String, config: &ProviderConfig, usage: Arc<dyn UsageSink>) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| Url::parse(DEFAULT_BASE_URL).expect("valid default URL"));

        Self {
            name,
            client: Client::new(),
            base_url,
            api_key: config.api_key.clone(),
            usage,
        }
    }

    /// Build the messages URL
    fn messages_url(&self) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/messages")
    }

    fn post(&self, request: &AnthropicRequest, context: &RequestContext) -> RequestBuilder {
        let mut builder = self
            .client
            .post(self.messages_url())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request);

        if let Some(key) = http::api_key(self.api_key.as_ref(), context) {
            builder = builder.header("x-api-key", key.expose_secret());
        }

        builder
    }

    fn unpack(&self, body: VendorBody) -> Result<AnthropicRequest, LlmError> {
        match body {
            VendorBody::Anthropic(request) => Ok(request),
            other => Err(other.mismatch(&self.name)),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn usage_sink(&self) -> &Arc<dyn UsageSink> {
        &self.usage
    }

    fn sanitize_policy(&self) -> SanitizePolicy {
        SanitizePolicy::STRICT
    }

    fn adapt_request_body(&self, params: &PreparedParams, context: &RequestContext) -> Result<VendorBody, LlmError> {
        Ok(VendorBody::Anthropic(build_request(params, context)))
    }

    async fn request(&self, body: VendorBody, context: &RequestContext) -> Result<ChatResult, LlmError> {
        let mut request = self.unpack(body)?;
        request.stream = None;

        let response = http::send(&self.name, self.post(&request, context)).await?;
        let (response, raw): (AnthropicResponse, serde_json::Value) = http::read_json(response).await?;

        let native_message = serde_json::json!({
            "role": "assistant",
            "content": raw.get("content").cloned().unwrap_or_default(),
        });

        let reply = reply(response);
        let usage = reply
            .usage
            .map(|usage| self.report_usage(&VendorUsage::Anthropic(usage), &UsageMetadata::from(context)));

        Ok(ChatResult::new(
            reply.content,
            reply.finish_reason,
            reply.tools,
            native_message,
            usage,
        ))
    }

    fn stream_request(&self, body: VendorBody, context: RequestContext, cancel: CancellationToken) -> EventStream {
        let provider = self.clone();

        spawn_stream(move |mut emitter| async move {
            let mut request = match provider.unpack(body) {
                Ok(request) => request,
                Err(e) => {
                    emitter.fail(e);
                    return;
                }
            };
            request.stream = Some(true);

            let builder = provider.post(&request, &context);
            http::stream_call(
                &provider,
                emitter,
                &context,
                &cancel,
                builder,
                Framing::Sse,
                AnthropicStreamState::new(),
            )
            .await;
        })
    }

    fn transform_tool_message_blocks(&self, message: &Message, results: &[ToolResult]) -> Vec<Message> {
        user_result_follow_up(message, results)
    }

    /// Strict pairing, then blank system turns removed and empty text replaced
    fn consistent_messages(&self, messages: Vec<Message>) -> Vec<Message> {
        let messages = sanitize_message_flow(drop_blank_system(messages), self.sanitize_policy());
        fill_blank_content(messages, BLANK_PLACEHOLDER)
    }
}
