//! OpenAI-compatible provider implementation

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use switchyard_config::ProviderConfig;
use switchyard_core::{RequestContext, UsageMetadata, UsageSink};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::http::{self, Framing};
use super::{Provider, VendorBody, VendorUsage};
use crate::convert::openai::{OpenAiStreamState, build_request, image_request, images, reply, tool_follow_up};
use crate::error::LlmError;
use crate::protocol::openai::{OpenAiImageResponse, OpenAiRequest, OpenAiResponse, OpenAiStreamOptions};
use crate::sanitize::{LeadingRole, SanitizePolicy};
use crate::stream::{EventStream, spawn_stream};
use crate::types::{ChatResult, FileRef, ImageOptions, ImageResult, Message, PreparedParams, ToolResult};

/// Default `OpenAI` API base URL
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// MIME type assumed for edit sources that do not declare one
const DEFAULT_IMAGE_MIME: &str = "image/png";

/// OpenAI-compatible provider
#[derive(Clone)]
pub struct OpenAiProvider {
    name: String,
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
    usage: Arc<dyn UsageSink>,
}

impl OpenAiProvider {
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

    /// Build an endpoint URL under the base URL
    fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/{path}")
    }

    fn authorized(&self, builder: RequestBuilder, context: &RequestContext) -> RequestBuilder {
        match http::api_key(self.api_key.as_ref(), context) {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    fn unpack(&self, body: VendorBody) -> Result<OpenAiRequest, LlmError> {
        match body {
            VendorBody::OpenAi(request) => Ok(request),
            other => Err(other.mismatch(&self.name)),
        }
    }

    async fn image_reply(&self, builder: RequestBuilder, context: &RequestContext) -> Result<ImageResult, LlmError> {
        let response = http::send(&self.name, self.authorized(builder, context)).await?;
        let (response, _): (OpenAiImageResponse, _) = http::read_json(response).await?;

        let usage = response
            .usage
            .map(|usage| self.report_usage(&VendorUsage::OpenAiImage(usage), &UsageMetadata::from(context)));

        Ok(ImageResult {
            images: images(response.data),
            usage,
        })
    }

    /// Raw bytes and MIME type of an edit source, decoded inline or downloaded
    async fn file_bytes(&self, file: &FileRef) -> Result<(Vec<u8>, String), LlmError> {
        if let Some((mime, data)) = file.data_uri() {
            let bytes = STANDARD
                .decode(data)
                .map_err(|e| LlmError::Validation(format!("invalid base64 image data: {e}")))?;
            let mime = file.mime_type.clone().unwrap_or_else(|| mime.to_owned());
            return Ok((bytes, mime));
        }

        let response = http::send(&self.name, self.client.get(&file.url)).await?;
        let mime = file
            .mime_type
            .clone()
            .or_else(|| {
                response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_owned());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| LlmError::Transport(format!("failed to download image: {e}")))?;

        Ok((bytes.to_vec(), mime))
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn usage_sink(&self) -> &Arc<dyn UsageSink> {
        &self.usage
    }

    fn sanitize_policy(&self) -> SanitizePolicy {
        SanitizePolicy {
            strict_pairing: true,
            leading_role: LeadingRole::Any,
        }
    }

    fn adapt_request_body(&self, params: &PreparedParams, context: &RequestContext) -> Result<VendorBody, LlmError> {
        Ok(VendorBody::OpenAi(build_request(params, context)))
    }

    async fn request(&self, body: VendorBody, context: &RequestContext) -> Result<ChatResult, LlmError> {
        let mut request = self.unpack(body)?;
        request.stream = None;
        request.stream_options = None;

        let builder = self.authorized(self.client.post(self.endpoint("chat/completions")).json(&request), context);
        let response = http::send(&self.name, builder).await?;
        let (response, raw): (OpenAiResponse, serde_json::Value) = http::read_json(response).await?;

        let native_message = raw
            .pointer("/choices/0/message")
            .cloned()
            .unwrap_or_default();

        let reply = reply(response)?;
        let usage = reply
            .usage
            .map(|usage| self.report_usage(&VendorUsage::OpenAi(usage), &UsageMetadata::from(context)));

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
            request.stream_options = Some(OpenAiStreamOptions { include_usage: true });

            let builder = provider.authorized(
                provider.client.post(provider.endpoint("chat/completions")).json(&request),
                &context,
            );
            http::stream_call(
                &provider,
                emitter,
                &context,
                &cancel,
                builder,
                Framing::Sse,
                OpenAiStreamState::new(),
            )
            .await;
        })
    }

    fn transform_tool_message_blocks(&self, message: &Message, results: &[ToolResult]) -> Vec<Message> {
        tool_follow_up(message, results)
    }

    async fn image_generation(
        &self,
        prompt: &str,
        options: &ImageOptions,
        context: &RequestContext,
    ) -> Result<ImageResult, LlmError> {
        let request = image_request(prompt, options, context);
        let builder = self.client.post(self.endpoint("images/generations")).json(&request);
        self.image_reply(builder, context).await
    }

    /// Only the first attached file is sent as the edit source
    async fn image_edit(
        &self,
        prompt: &str,
        files: &[FileRef],
        options: &ImageOptions,
        context: &RequestContext,
    ) -> Result<ImageResult, LlmError> {
        let Some(file) = files.first() else {
            return Err(LlmError::Validation("image edit requires an attached image".to_owned()));
        };

        let (bytes, mime) = self.file_bytes(file).await?;
        let file_name = file.name.clone().unwrap_or_else(|| "image".to_owned());
        let image = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(&mime)
            .map_err(|e| LlmError::Validation(format!("invalid image MIME type '{mime}': {e}")))?;

        let request = image_request(prompt, options, context);
        let mut form = Form::new()
            .text("model", request.model)
            .text("prompt", request.prompt)
            .text("n", request.n.to_string())
            .part("image", image);
        if let Some(size) = request.size {
            form = form.text("size", size);
        }
        if let Some(quality) = request.quality {
            form = form.text("quality", quality);
        }

        let builder = self.client.post(self.endpoint("images/edits")).multipart(form);
        self.image_reply(builder, context).await
    }
}
