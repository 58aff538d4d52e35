//! Inference orchestrator
//!
//! [`Inference`] is the entry point collaborators call. It resolves the model,
//! picks the provider adapter serving it, shapes the history for that vendor
//! and wraps custom models with the single-hop fallback.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use indexmap::IndexMap;
use secrecy::SecretString;
use switchyard_config::Config;
use switchyard_core::{Identity, RequestContext, UsageSink};
use tokio_util::sync::CancellationToken;

use crate::context_window::{ContextWindow, TiktokenCounter, TokenCounter, WindowBudget, build_context_window, message_tokens};
use crate::error::LlmError;
use crate::fallback::{settle_blocking, stream_with_fallback};
use crate::finish::FinishReason;
use crate::provider::{Provider, create_provider};
use crate::resolver::{CatalogResolver, ModelResolver};
use crate::stream::{EventStream, cancellable, failed_stream};
use crate::types::{ChatResult, FileRef, ImageOptions, ImageResult, Message, PreparedParams};

/// One prompt, blocking or streaming
#[derive(Debug, Clone, Default)]
pub struct PromptRequest {
    /// Model entry, history and generation controls
    pub params: PreparedParams,
    /// Appended to the history as the final user turn
    pub query: Option<String>,
    /// Who the call is made on behalf of
    pub identity: Identity,
    /// Caller's own vendor key
    pub api_key: Option<SecretString>,
    /// Cancels the call, and its fallback
    pub cancel: CancellationToken,
}

impl PromptRequest {
    /// Prompt `model` with `query` and no prior history
    pub fn new(model: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            params: PreparedParams::new(model, Vec::new()),
            query: Some(query.into()),
            ..Self::default()
        }
    }
}

/// One image generation or edit
#[derive(Debug, Clone, Default)]
pub struct ImageRequest {
    /// Catalog model entry
    pub model: String,
    /// Text prompt
    pub prompt: String,
    /// Source images, edits only
    pub files: Vec<FileRef>,
    /// Size, count and quality hints
    pub options: ImageOptions,
    /// Who the call is made on behalf of
    pub identity: Identity,
    /// Caller's own vendor key
    pub api_key: Option<SecretString>,
    /// Cancels the call
    pub cancel: CancellationToken,
}

/// Multi-provider inference entry point
///
/// Cheap to clone; clones share providers and the resolver.
#[derive(Clone)]
pub struct Inference {
    providers: Arc<IndexMap<String, Arc<dyn Provider>>>,
    timeouts: Arc<IndexMap<String, Duration>>,
    resolver: Arc<dyn ModelResolver>,
    counter: Arc<dyn TokenCounter>,
}

impl Inference {
    /// Build providers and the model catalog from configuration
    pub fn from_config(config: &Config, usage: Arc<dyn UsageSink>) -> Result<Self, LlmError> {
        let mut providers = IndexMap::new();
        let mut timeouts = IndexMap::new();

        for (name, provider_config) in &config.providers {
            providers.insert(name.clone(), create_provider(name, provider_config, Arc::clone(&usage)));
            if let Some(timeout) = provider_config.timeout()? {
                timeouts.insert(name.clone(), timeout);
            }
            tracing::debug!(provider = %name, kind = ?provider_config.provider_type, "configured provider");
        }

        Ok(Self {
            providers: Arc::new(providers),
            timeouts: Arc::new(timeouts),
            resolver: Arc::new(CatalogResolver::from_config(config)),
            counter: Arc::new(TiktokenCounter),
        })
    }

    /// Assemble from already-built parts
    pub fn new(providers: IndexMap<String, Arc<dyn Provider>>, resolver: Arc<dyn ModelResolver>) -> Self {
        Self {
            providers: Arc::new(providers),
            timeouts: Arc::new(IndexMap::new()),
            resolver,
            counter: Arc::new(TiktokenCounter),
        }
    }

    /// Count tokens with `counter` instead of the `o200k_base` tokenizer
    #[must_use]
    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    /// Run one blocking prompt
    ///
    /// Custom models that fail hop once to their configured fallback. When the
    /// fallback fails too the primary error is returned.
    pub async fn prompt(&self, request: PromptRequest) -> Result<ChatResult, LlmError> {
        let PromptRequest {
            params,
            query,
            identity,
            api_key,
            cancel,
        } = request;

        let params = with_query(params, query)?;
        let context = self.resolver.resolve(&params.model, &identity, api_key)?;
        let fallback = self.fallback_for(&context);
        let model = context.model_entry.clone();

        let result = self.complete(context, params.clone(), &cancel).await;

        settle_blocking(&model, result, fallback, |fallback_model| async move {
            let context = self.resolver.resolve(&fallback_model, &identity, None)?;
            self.complete(context, params.for_fallback(&fallback_model), &cancel)
                .await
        })
        .await
    }

    /// Run one streaming prompt
    ///
    /// Never fails directly: validation and resolution errors arrive as
    /// `Error` + `End` on the returned stream.
    pub fn prompt_stream(&self, request: PromptRequest) -> EventStream {
        let PromptRequest {
            params,
            query,
            identity,
            api_key,
            cancel,
        } = request;

        let params = match with_query(params, query) {
            Ok(params) => params,
            Err(e) => return failed_stream(e),
        };
        let context = match self.resolver.resolve(&params.model, &identity, api_key) {
            Ok(context) => context,
            Err(e) => return failed_stream(e),
        };
        let fallback = self.fallback_for(&context);

        let primary = self
            .start_stream(context, params.clone(), &cancel)
            .unwrap_or_else(failed_stream);

        let Some(fallback_model) = fallback else {
            return primary;
        };

        let inference = self.clone();
        stream_with_fallback(primary, move || {
            let context = inference.resolver.resolve(&fallback_model, &identity, None)?;
            inference.start_stream(context, params.for_fallback(&fallback_model), &cancel)
        })
    }

    /// Generate images with an image-capable model
    pub async fn image_gen(&self, request: &ImageRequest) -> Result<ImageResult, LlmError> {
        let (provider, context) = self.image_target(request)?;
        let deadline = self.deadline(&context.provider, &request.cancel);
        let _guard = deadline.clone().drop_guard();

        timed(
            &request.cancel,
            cancellable(
                &deadline,
                provider.image_generation(&request.prompt, &request.options, &context),
            )
            .await,
        )?
    }

    /// Edit images with an image-capable model
    pub async fn image_edit(&self, request: &ImageRequest) -> Result<ImageResult, LlmError> {
        if request.files.is_empty() {
            return Err(LlmError::Validation("image edit needs at least one file".to_owned()));
        }

        let (provider, context) = self.image_target(request)?;
        let deadline = self.deadline(&context.provider, &request.cancel);
        let _guard = deadline.clone().drop_guard();

        timed(
            &request.cancel,
            cancellable(
                &deadline,
                provider.image_edit(&request.prompt, &request.files, &request.options, &context),
            )
            .await,
        )?
    }

    /// Select the history that fits `model`'s window
    ///
    /// The model's context and completion limits cap the requested
    /// allowances.
    pub fn build_context_window(
        &self,
        model: &str,
        system_prompt: &str,
        history: &[Message],
        input_tokens: u32,
        output_tokens: u32,
    ) -> Result<ContextWindow, LlmError> {
        let context = self.resolver.resolve(model, &Identity::default(), None)?;
        let budget = WindowBudget::new(input_tokens, output_tokens).with_limits(context.limits);
        Ok(build_context_window(system_prompt, history, budget, self.counter.as_ref()))
    }

    fn fallback_for(&self, context: &RequestContext) -> Option<String> {
        if context.custom {
            self.resolver.fallback_for(&context.model_entry)
        } else {
            None
        }
    }

    fn provider(&self, context: &RequestContext) -> Result<Arc<dyn Provider>, LlmError> {
        self.providers
            .get(&context.provider)
            .cloned()
            .ok_or_else(|| LlmError::Validation(format!("provider '{}' is not configured", context.provider)))
    }

    /// Provider plus history shaped for it
    fn dispatchable(
        &self,
        context: &RequestContext,
        mut params: PreparedParams,
    ) -> Result<(Arc<dyn Provider>, PreparedParams), LlmError> {
        let provider = self.provider(context)?;
        params.messages = provider.consistent_messages(params.messages);
        if params.messages.is_empty() {
            return Err(LlmError::Validation("no messages left to send".to_owned()));
        }
        Ok((provider, params))
    }

    async fn complete(
        &self,
        context: RequestContext,
        params: PreparedParams,
        cancel: &CancellationToken,
    ) -> Result<ChatResult, LlmError> {
        let (provider, params) = self.dispatchable(&context, params)?;
        self.check_context_limit(&params, &context)?;
        let body = provider.adapt_request_body(&params, &context)?;

        tracing::debug!(provider = %context.provider, model = %context.model, "dispatching prompt");

        let deadline = self.deadline(&context.provider, cancel);
        let _guard = deadline.clone().drop_guard();
        let result = timed(cancel, cancellable(&deadline, provider.request(body, &context)).await)??;

        if result.is_empty() && result.finish_reason != FinishReason::Stop {
            tracing::warn!(
                provider = %context.provider,
                model = %context.model,
                finish_reason = %result.finish_reason,
                "model returned no content"
            );
            return Err(LlmError::Incomplete(result.finish_reason));
        }

        Ok(result)
    }

    fn start_stream(
        &self,
        context: RequestContext,
        params: PreparedParams,
        cancel: &CancellationToken,
    ) -> Result<EventStream, LlmError> {
        let (provider, params) = self.dispatchable(&context, params)?;
        let body = provider.adapt_request_body(&params, &context)?;

        tracing::debug!(provider = %context.provider, model = %context.model, "dispatching streaming prompt");

        let deadline = self.deadline(&context.provider, cancel);
        let stream = provider.stream_request(body, context, deadline.clone());
        Ok(release_on_end(stream, deadline))
    }

    /// Reject prompts that cannot fit the model's context window
    fn check_context_limit(&self, params: &PreparedParams, context: &RequestContext) -> Result<(), LlmError> {
        let Some(limit) = context.limits.context_tokens else {
            return Ok(());
        };

        let prompt_tokens: usize = params
            .messages
            .iter()
            .map(|message| message_tokens(message, self.counter.as_ref()))
            .sum();
        let reply_tokens = params.max_tokens.unwrap_or(0);
        let requested = prompt_tokens.saturating_add(usize::try_from(reply_tokens).unwrap_or(usize::MAX));

        if requested > usize::try_from(limit).unwrap_or(usize::MAX) {
            return Err(LlmError::Validation(format!(
                "prompt needs about {prompt_tokens} tokens plus {reply_tokens} for the reply, \
                 but '{}' has a {limit} token context window",
                context.model_entry
            )));
        }

        Ok(())
    }

    fn image_target(&self, request: &ImageRequest) -> Result<(Arc<dyn Provider>, RequestContext), LlmError> {
        let context = self
            .resolver
            .resolve(&request.model, &request.identity, request.api_key.clone())?;
        if !context.capabilities.image_generation {
            return Err(LlmError::Validation(format!(
                "model '{}' does not support image generation",
                context.model_entry
            )));
        }
        Ok((self.provider(&context)?, context))
    }

    /// Child of `cancel` that also fires when the provider's timeout elapses
    fn deadline(&self, provider: &str, cancel: &CancellationToken) -> CancellationToken {
        let child = cancel.child_token();

        if let Some(&timeout) = self.timeouts.get(provider) {
            let token = child.clone();
            let provider = provider.to_owned();
            tokio::spawn(async move {
                tokio::select! {
                    () = token.cancelled() => {}
                    () = tokio::time::sleep(timeout) => {
                        tracing::warn!(provider = %provider, timeout = ?timeout, "upstream call timed out");
                        token.cancel();
                    }
                }
            });
        }

        child
    }
}

fn with_query(mut params: PreparedParams, query: Option<String>) -> Result<PreparedParams, LlmError> {
    if let Some(query) = query {
        params.messages.push(Message::user(query));
    }
    if params.messages.is_empty() {
        return Err(LlmError::Validation("message history is empty".to_owned()));
    }
    Ok(params)
}

/// Cancel `deadline` once `stream` delivers `End` or is dropped
///
/// Stops the timeout timer of a finished stream. `deadline` is a child token,
/// so the caller's token is unaffected.
fn release_on_end(stream: EventStream, deadline: CancellationToken) -> EventStream {
    let guard = deadline.clone().drop_guard();
    Box::pin(stream.inspect(move |event| {
        let _held = &guard;
        if event.is_end() {
            deadline.cancel();
        }
    }))
}

/// Report a deadline that fired without the caller cancelling as a timeout
fn timed<T>(cancel: &CancellationToken, outcome: Result<T, LlmError>) -> Result<T, LlmError> {
    match outcome {
        Err(LlmError::Cancelled) if !cancel.is_cancelled() => {
            Err(LlmError::Transport("request timed out".to_owned()))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use indoc::formatdoc;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::context_window::tests::WordCounter;
    use crate::fallback::stream_error;
    use crate::provider::tests::CapturingSink;
    use crate::stream::tests::{assert_well_formed, collect, end_reason, kinds};
    use crate::types::StreamEvent;

    fn inference(toml: &str) -> (Inference, Arc<CapturingSink>) {
        let config = Config::parse(toml).unwrap();
        let sink = Arc::new(CapturingSink::default());
        let inference = Inference::from_config(&config, sink.clone())
            .unwrap()
            .with_token_counter(Arc::new(WordCounter));
        (inference, sink)
    }

    fn echo_only() -> Inference {
        inference(&formatdoc! {r#"
            [providers.echo]
            type = "echo"

            [models.parrot]
            provider = "echo"
            context_tokens = 10

            [models.painter]
            provider = "echo"
            image_generation = true
        "#})
        .0
    }

    /// Custom Ollama model on `primary` falling back to a model on `fallback`
    fn with_fallback(primary: &str, fallback_provider: &str) -> (Inference, Arc<CapturingSink>) {
        inference(&formatdoc! {r#"
            [providers.local]
            type = "ollama"
            base_url = "{primary}"

            {fallback_provider}

            [models.tenant-llama]
            provider = "local"
            name = "llama3.2"
            custom = true
            fallback = "backup"

            [models.backup]
            provider = "backup"
        "#})
    }

    async fn failing_server(status: u16, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn prompt_appends_query_and_echoes_it() {
        let result = echo_only()
            .prompt(PromptRequest::new("parrot", "hello switchyard"))
            .await
            .unwrap();

        assert_eq!(result.content, "hello switchyard");
        assert_eq!(result.finish_reason, FinishReason::Stop);
        assert!(result.usage.is_some());
    }

    #[tokio::test]
    async fn empty_history_is_rejected() {
        let request = PromptRequest {
            params: PreparedParams::new("parrot", Vec::new()),
            ..PromptRequest::default()
        };

        let err = echo_only().prompt(request).await.unwrap_err();
        assert!(matches!(err, LlmError::Validation(msg) if msg.contains("empty")));
    }

    #[tokio::test]
    async fn unknown_model_is_rejected() {
        let err = echo_only()
            .prompt(PromptRequest::new("mystery", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Validation(msg) if msg.contains("unknown model")));
    }

    #[tokio::test]
    async fn oversized_prompt_is_rejected_before_dispatch() {
        let mut request = PromptRequest::new("parrot", "one two three four five six");
        request.params.max_tokens = Some(5);

        let err = echo_only().prompt(request).await.unwrap_err();
        assert!(matches!(err, LlmError::Validation(msg) if msg.contains("10 token context window")));
    }

    #[tokio::test]
    async fn streaming_validation_errors_become_events() {
        let request = PromptRequest {
            params: PreparedParams::new("parrot", Vec::new()),
            ..PromptRequest::default()
        };

        let events = collect(echo_only().prompt_stream(request)).await;

        assert_eq!(kinds(&events), vec!["error", "end"]);
        assert_eq!(end_reason(&events), FinishReason::Error);
    }

    #[tokio::test]
    async fn prompt_stream_echoes_words() {
        let events = collect(echo_only().prompt_stream(PromptRequest::new("parrot", "hi there"))).await;

        assert_well_formed(&events);
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Content(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "hi there");
    }

    #[tokio::test]
    async fn blocking_prompt_falls_back_once() {
        let primary = failing_server(503, "overloaded").await;
        let (inference, sink) = with_fallback(&primary.uri(), "[providers.backup]\ntype = \"echo\"");

        let mut request = PromptRequest::new("tenant-llama", "are you there");
        request.params.reasoning_effort = Some(crate::types::ReasoningEffort::High);

        let result = inference.prompt(request).await.unwrap();

        assert_eq!(result.content, "are you there");
        assert_eq!(sink.records()[0].source_id, "llm:backup");
    }

    #[tokio::test]
    async fn failed_fallback_surfaces_primary_error() {
        let primary = failing_server(503, "primary overloaded").await;
        let backup = failing_server(500, "backup broken").await;
        let (inference, _) = with_fallback(
            &primary.uri(),
            &format!("[providers.backup]\ntype = \"ollama\"\nbase_url = \"{}\"", backup.uri()),
        );

        let err = inference
            .prompt(PromptRequest::new("tenant-llama", "hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Transport(msg) if msg.contains("primary overloaded")));
        assert_eq!(backup.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn curated_models_never_fall_back() {
        let primary = failing_server(503, "overloaded").await;
        let (inference, _) = inference(&formatdoc! {r#"
            [providers.local]
            type = "ollama"
            base_url = "{}"

            [providers.backup]
            type = "echo"

            [models.llama]
            provider = "local"
            fallback = "backup"

            [models.backup]
            provider = "backup"
        "#, primary.uri()});

        let err = inference.prompt(PromptRequest::new("llama", "hi")).await.unwrap_err();
        assert!(matches!(err, LlmError::Transport(_)));
    }

    #[tokio::test]
    async fn empty_length_reply_is_incomplete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3.2",
                "message": {"role": "assistant", "content": ""},
                "done": true,
                "done_reason": "length"
            })))
            .mount(&server)
            .await;
        let (inference, _) = inference(&formatdoc! {r#"
            [providers.local]
            type = "ollama"
            base_url = "{}"

            [models.llama]
            provider = "local"
        "#, server.uri()});

        let err = inference.prompt(PromptRequest::new("llama", "hi")).await.unwrap_err();
        assert!(matches!(err, LlmError::Incomplete(FinishReason::Length)));
    }

    #[tokio::test]
    async fn streaming_prompt_switches_to_fallback() {
        let primary = failing_server(503, "overloaded").await;
        let (inference, _) = with_fallback(&primary.uri(), "[providers.backup]\ntype = \"echo\"");

        let events = collect(inference.prompt_stream(PromptRequest::new("tenant-llama", "still here"))).await;

        assert_well_formed(&events);
        assert!(stream_error(&events).is_none());
        assert_eq!(end_reason(&events), FinishReason::Stop);
        let requested: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Requested { provider, .. } => Some(provider.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(requested, vec!["local", "backup"]);
    }

    #[tokio::test]
    async fn cancelled_stream_skips_fallback() {
        let primary = failing_server(503, "overloaded").await;
        let (inference, _) = with_fallback(&primary.uri(), "[providers.backup]\ntype = \"echo\"");
        let request = PromptRequest::new("tenant-llama", "hi");
        request.cancel.cancel();

        let events = collect(inference.prompt_stream(request)).await;

        assert_eq!(kinds(&events), vec!["abort", "end"]);
        assert!(primary.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn timeout_is_reported_as_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;
        let (inference, _) = inference(&formatdoc! {r#"
            [providers.local]
            type = "ollama"
            base_url = "{}"
            timeout = "50ms"

            [models.llama]
            provider = "local"
        "#, server.uri()});

        let err = inference.prompt(PromptRequest::new("llama", "hi")).await.unwrap_err();
        assert!(matches!(err, LlmError::Transport(msg) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn image_generation_requires_capability() {
        let request = ImageRequest {
            model: "parrot".to_owned(),
            prompt: "a lighthouse".to_owned(),
            ..ImageRequest::default()
        };

        let err = echo_only().image_gen(&request).await.unwrap_err();
        assert!(matches!(err, LlmError::Validation(msg) if msg.contains("does not support image generation")));
    }

    #[tokio::test]
    async fn image_edit_requires_files() {
        let request = ImageRequest {
            model: "painter".to_owned(),
            prompt: "add a moon".to_owned(),
            ..ImageRequest::default()
        };

        let err = echo_only().image_edit(&request).await.unwrap_err();
        assert!(matches!(err, LlmError::Validation(msg) if msg.contains("at least one file")));
    }

    #[test]
    fn context_window_applies_model_limits() {
        let history = vec![
            Message::user("one two three"),
            Message::assistant("four five"),
            Message::user("six"),
        ];

        let window = echo_only()
            .build_context_window("parrot", "be kind", &history, 100, 4)
            .unwrap();

        assert_eq!(window.input_budget, 6);
        assert_eq!(window.output_budget, 4);
        assert_eq!(window.messages.len(), 3);
        assert_eq!(window.messages[1].text(), "four five");
        assert_eq!(window.dropped, 1);
    }

    fn finished_stream() -> EventStream {
        crate::stream::spawn_stream(|mut emitter| async move {
            emitter.requested("echo", "echo");
            emitter.content("done".to_owned());
            emitter.finish(Vec::new(), FinishReason::Stop);
        })
    }

    #[tokio::test]
    async fn finished_stream_releases_its_deadline() {
        let caller = CancellationToken::new();
        let deadline = caller.child_token();

        let mut stream = release_on_end(finished_stream(), deadline.clone());
        while let Some(event) = stream.next().await {
            if event.is_end() {
                break;
            }
        }

        assert!(deadline.is_cancelled());
        assert!(!caller.is_cancelled());
        drop(stream);
    }

    #[tokio::test]
    async fn dropped_stream_releases_its_deadline() {
        let caller = CancellationToken::new();
        let deadline = caller.child_token();

        let mut stream = release_on_end(finished_stream(), deadline.clone());
        stream.next().await.unwrap();
        assert!(!deadline.is_cancelled());

        drop(stream);

        assert!(deadline.is_cancelled());
        assert!(!caller.is_cancelled());
    }
}
