//! Mock vendor server for integration tests
//!
//! Implements enough of the OpenAI-compatible API to drive the gateway end to
//! end: blocking and streaming chat completions, tool calls, and image
//! generation.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Mock vendor that returns predictable responses
pub struct MockVendor {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockVendorState>,
}

struct MockVendorState {
    completion_count: AtomicU32,
    imagegen_count: AtomicU32,
    /// Number of requests to fail before succeeding (0 = never fail)
    fail_count: AtomicU32,
    /// Reply text, streamed one word per chunk
    response_content: String,
    /// Pause before each streamed chunk
    chunk_delay: Option<Duration>,
    /// Bodies of every chat request, oldest first
    requests: Mutex<Vec<Value>>,
}

impl MockVendor {
    /// Start the mock server, returning immediately
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_inner(0, "Hello from mock vendor", None).await
    }

    /// Start a mock server that fails the first `n` chat requests with 500
    pub async fn start_failing(n: u32) -> anyhow::Result<Self> {
        Self::start_inner(n, "Hello from mock vendor", None).await
    }

    /// Start a mock server with a custom reply
    pub async fn start_with_response(content: &str) -> anyhow::Result<Self> {
        Self::start_inner(0, content, None).await
    }

    /// Start a mock server that pauses `delay` before every streamed chunk
    pub async fn start_slow(content: &str, delay: Duration) -> anyhow::Result<Self> {
        Self::start_inner(0, content, Some(delay)).await
    }

    async fn start_inner(fail_count: u32, content: &str, chunk_delay: Option<Duration>) -> anyhow::Result<Self> {
        let state = Arc::new(MockVendorState {
            completion_count: AtomicU32::new(0),
            imagegen_count: AtomicU32::new(0),
            fail_count: AtomicU32::new(fail_count),
            response_content: content.to_owned(),
            chunk_delay,
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(handle_chat_completions))
            .route("/v1/images/generations", routing::post(handle_imagegen))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL for configuring the mock as a provider
    ///
    /// Includes `/v1` since the `OpenAI` provider appends paths like `/chat/completions`
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Number of chat requests received, failed ones included
    pub fn completion_count(&self) -> u32 {
        self.state.completion_count.load(Ordering::Relaxed)
    }

    /// Number of image generation requests received
    pub fn imagegen_count(&self) -> u32 {
        self.state.imagegen_count.load(Ordering::Relaxed)
    }

    /// Body of the most recent chat request
    pub fn last_request(&self) -> Option<Value> {
        self.state.requests.lock().unwrap().last().cloned()
    }
}

impl Drop for MockVendor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn usage() -> Value {
    json!({"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15})
}

async fn handle_chat_completions(State(state): State<Arc<MockVendorState>>, Json(req): Json<Value>) -> Response {
    state.completion_count.fetch_add(1, Ordering::Relaxed);
    state.requests.lock().unwrap().push(req.clone());

    // If fail_count > 0, decrement and return 500
    let remaining = state.fail_count.load(Ordering::Relaxed);
    if remaining > 0 {
        state.fail_count.fetch_sub(1, Ordering::Relaxed);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": {
                    "message": "mock vendor intentional failure",
                    "type": "server_error"
                }
            })),
        )
            .into_response();
    }

    let model = req["model"].as_str().unwrap_or("mock-model").to_owned();
    let has_tools = req.get("tools").is_some_and(|tools| !tools.is_null());

    if req["stream"].as_bool().unwrap_or(false) {
        return streaming_response(&state, &model, has_tools);
    }

    let (message, finish_reason) = if has_tools {
        (
            json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_test_123",
                    "type": "function",
                    "function": {"name": "get_weather", "arguments": "{\"location\":\"San Francisco\"}"}
                }]
            }),
            "tool_calls",
        )
    } else {
        (json!({"role": "assistant", "content": state.response_content}), "stop")
    };

    Json(json!({
        "id": "chatcmpl-test-123",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": model,
        "choices": [{"index": 0, "message": message, "finish_reason": finish_reason}],
        "usage": usage()
    }))
    .into_response()
}

fn chunk(model: &str, choices: Value, usage: Option<Value>) -> String {
    let mut chunk = json!({
        "id": "chatcmpl-test-stream",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000,
        "model": model,
        "choices": choices,
    });
    if let Some(usage) = usage {
        chunk["usage"] = usage;
    }
    format!("data: {chunk}\n\n")
}

/// Build an SSE body: role, one chunk per word (or a tool call), finish, usage
fn streaming_response(state: &MockVendorState, model: &str, has_tools: bool) -> Response {
    let mut chunks = vec![chunk(
        model,
        json!([{"index": 0, "delta": {"role": "assistant", "content": ""}}]),
        None,
    )];

    if has_tools {
        chunks.push(chunk(
            model,
            json!([{"index": 0, "delta": {"tool_calls": [{
                "index": 0,
                "id": "call_test_stream",
                "type": "function",
                "function": {"name": "get_weather"}
            }]}}]),
            None,
        ));
        chunks.push(chunk(
            model,
            json!([{"index": 0, "delta": {"tool_calls": [{
                "index": 0,
                "function": {"arguments": "{\"location\":\"San Francisco\"}"}
            }]}}]),
            None,
        ));
        chunks.push(chunk(
            model,
            json!([{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]),
            None,
        ));
    } else {
        for word in state.response_content.split_whitespace() {
            chunks.push(chunk(
                model,
                json!([{"index": 0, "delta": {"content": format!("{word} ")}}]),
                None,
            ));
        }
        chunks.push(chunk(
            model,
            json!([{"index": 0, "delta": {}, "finish_reason": "stop"}]),
            None,
        ));
    }

    chunks.push(chunk(model, json!([]), Some(usage())));
    chunks.push("data: [DONE]\n\n".to_owned());

    let body = match state.chunk_delay {
        Some(delay) => Body::from_stream(futures_util::stream::iter(chunks).then(move |chunk| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, Infallible>(chunk)
        })),
        None => Body::from(chunks.concat()),
    };

    (StatusCode::OK, [(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn handle_imagegen(State(state): State<Arc<MockVendorState>>, Json(_req): Json<Value>) -> impl IntoResponse {
    state.imagegen_count.fetch_add(1, Ordering::Relaxed);

    Json(json!({
        "created": 1_700_000_000,
        "data": [{
            "url": "https://example.com/mock-image.png",
            "revised_prompt": "A mock image for testing"
        }]
    }))
}
