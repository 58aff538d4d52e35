//! Google Gemini provider implementation

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
use crate::convert::google::{GoogleStreamState, build_request, reply};
use crate::convert::user_result_follow_up;
use crate::error::LlmError;
use crate::protocol::google::{GoogleRequest, GoogleResponse};
use crate::sanitize::{SanitizePolicy, drop_blank_system, fill_blank_content, sanitize_message_flow};
use crate::stream::{EventStream, spawn_stream};
use crate::types::{ChatResult, Message, PreparedParams, ToolResult};

/// Default Gemini API base URL
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Text sent in place of turns the API would reject as empty
const BLANK_PLACEHOLDER: &str = "...";

/// Google Gemini provider
#[derive(Clone)]
pub struct GoogleProvider {
    name: String,
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
    usage: Arc<dyn UsageSink>,
}

impl GoogleProvider {
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

    /// Build the URL for a model method, e.g. `generateContent`
    fn model_url(&self, model: &str, method: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/models/{model}:{method}")
    }

    fn post(&self, url: String, request: &GoogleRequest, context: &RequestContext) -> RequestBuilder {
        let mut builder = self.client.post(url).json(request);
        if let Some(key) = http::api_key(self.api_key.as_ref(), context) {
            builder = builder.header("x-goog-api-key", key.expose_secret());
        }
        builder
    }

    fn unpack(&self, body: VendorBody) -> Result<GoogleRequest, LlmError> {
        match body {
            VendorBody::Google(request) => Ok(request),
            other => Err(other.mismatch(&self.name)),
        }
    }
}

#[async_trait]
impl Provider for GoogleProvider {
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
        Ok(VendorBody::Google(build_request(params, context)))
    }

    async fn request(&self, body: VendorBody, context: &RequestContext) -> Result<ChatResult, LlmError> {
        let request = self.unpack(body)?;

        let url = self.model_url(&context.model, "generateContent");
        let response = http::send(&self.name, self.post(url, &request, context)).await?;
        let (response, raw): (GoogleResponse, serde_json::Value) = http::read_json(response).await?;

        if let Some(error) = &response.error {
            return Err(LlmError::Transport(error.message.clone()));
        }

        let native_message = raw
            .pointer("/candidates/0/content")
            .cloned()
            .unwrap_or_default();

        let reply = reply(response, &context.model);
        let usage = reply
            .usage
            .map(|usage| self.report_usage(&VendorUsage::Google(usage), &UsageMetadata::from(context)));

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
            let request = match provider.unpack(body) {
                Ok(request) => request,
                Err(e) => {
                    emitter.fail(e);
                    return;
                }
            };

            let url = format!(
                "{}?alt=sse",
                provider.model_url(&context.model, "streamGenerateContent")
            );
            let builder = provider.post(url, &request, &context);
            http::stream_call(
                &provider,
                emitter,
                &context,
                &cancel,
                builder,
                Framing::Sse,
                GoogleStreamState::new(context.model.clone()),
            )
            .await;
        })
    }

    fn transform_tool_message_blocks(&self, message: &Message, results: &[ToolResult]) -> Vec<Message> {
        user_result_follow_up(message, results)
    }

    fn consistent_messages(&self, messages: Vec<Message>) -> Vec<Message> {
        let messages = sanitize_message_flow(drop_blank_system(messages), self.sanitize_policy());
        fill_blank_content(messages, BLANK_PLACEHOLDER)
    }
}
