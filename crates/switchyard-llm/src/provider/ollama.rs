//! Ollama provider implementation

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
use crate::convert::ollama::{OllamaStreamState, build_request, reply};
use crate::convert::openai::tool_follow_up;
use crate::error::LlmError;
use crate::protocol::ollama::{OllamaRequest, OllamaResponse};
use crate::stream::{EventStream, spawn_stream};
use crate::types::{ChatResult, Message, PreparedParams, ToolResult};

/// Default local Ollama server
const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Ollama chat provider
#[derive(Clone)]
pub struct OllamaProvider {
    name: String,
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
    usage: Arc<dyn UsageSink>,
}

impl OllamaProvider {
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

    fn chat_url(&self) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/api/chat")
    }

    /// Hosted Ollama endpoints take a bearer key, local ones need none
    fn post(&self, request: &OllamaRequest, context: &RequestContext) -> RequestBuilder {
        let builder = self.client.post(self.chat_url()).json(request);
        match http::api_key(self.api_key.as_ref(), context) {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    fn unpack(&self, body: VendorBody) -> Result<OllamaRequest, LlmError> {
        match body {
            VendorBody::Ollama(request) => Ok(request),
            other => Err(other.mismatch(&self.name)),
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn usage_sink(&self) -> &Arc<dyn UsageSink> {
        &self.usage
    }

    fn adapt_request_body(&self, params: &PreparedParams, context: &RequestContext) -> Result<VendorBody, LlmError> {
        Ok(VendorBody::Ollama(build_request(params, context)))
    }

    async fn request(&self, body: VendorBody, context: &RequestContext) -> Result<ChatResult, LlmError> {
        let mut request = self.unpack(body)?;
        request.stream = false;

        let response = http::send(&self.name, self.post(&request, context)).await?;
        let (response, raw): (OllamaResponse, serde_json::Value) = http::read_json(response).await?;

        if let Some(error) = &response.error {
            return Err(LlmError::Transport(error.clone()));
        }

        let native_message = raw.get("message").cloned().unwrap_or_default();

        let reply = reply(response);
        let usage = reply
            .usage
            .map(|usage| self.report_usage(&VendorUsage::Ollama(usage), &UsageMetadata::from(context)));

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
            request.stream = true;

            let builder = provider.post(&request, &context);
            http::stream_call(
                &provider,
                emitter,
                &context,
                &cancel,
                builder,
                Framing::Ndjson,
                OllamaStreamState::new(),
            )
            .await;
        })
    }

    /// Results go back as `tool` role turns, like the `OpenAI` shape
    fn transform_tool_message_blocks(&self, message: &Message, results: &[ToolResult]) -> Vec<Message> {
        tool_follow_up(message, results)
    }
}
