//! Request plumbing shared by the HTTP adapters

use std::fmt::Display;
use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt, stream};
use reqwest::{RequestBuilder, Response};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use switchyard_core::{RequestContext, UsageMetadata};
use tokio_util::sync::CancellationToken;

use super::{Provider, VendorUsage};
use crate::error::LlmError;
use crate::stream::{EventEmitter, StreamDecoder, StreamOutcome, cancellable, drive};

/// Raw vendor payloads, one JSON document per item
pub(crate) type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// How a vendor frames its streaming response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    /// Server-sent events, one JSON document per `data` field
    Sse,
    /// Newline-delimited JSON
    Ndjson,
}

/// Key for this call: the caller's own key wins over the configured one
pub(crate) fn api_key<'a>(configured: Option<&'a SecretString>, context: &'a RequestContext) -> Option<&'a SecretString> {
    context.credentials.api_key.as_ref().or(configured)
}

/// Send a request, mapping transport failures and non-success statuses
pub(crate) async fn send(provider: &str, builder: RequestBuilder) -> Result<Response, LlmError> {
    let response = builder.send().await.map_err(|e| {
        tracing::error!(provider = %provider, error = %e, "upstream request failed");
        LlmError::Transport(e.to_string())
    })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            provider = %provider,
            status = %status,
            "upstream returned error"
        );
        return Err(LlmError::Transport(format!("provider returned {status}: {body}")));
    }

    Ok(response)
}

/// Parse a JSON reply, keeping the raw document alongside the typed one
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<(T, serde_json::Value), LlmError> {
    let raw: serde_json::Value = response
        .json()
        .await
        .map_err(|e| LlmError::Transport(format!("failed to parse response: {e}")))?;

    let parsed = serde_json::from_value(raw.clone())
        .map_err(|e| LlmError::Transport(format!("failed to parse response: {e}")))?;

    Ok((parsed, raw))
}

/// Split a streaming response into payloads according to `framing`
pub(crate) fn chunks(response: Response, framing: Framing) -> ChunkStream {
    match framing {
        Framing::Sse => Box::pin(response.bytes_stream().eventsource().map(|event| {
            event
                .map(|event| event.data)
                .map_err(|e| LlmError::Transport(format!("stream interrupted: {e}")))
        })),
        Framing::Ndjson => ndjson_lines(response.bytes_stream()),
    }
}

/// Split a byte stream on newlines, flushing any unterminated tail at the end
pub(crate) fn ndjson_lines<S, B, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let lines = stream::unfold(
        (Box::pin(bytes), Vec::<u8>::new(), false),
        |(mut bytes, mut buffer, mut exhausted)| async move {
            loop {
                if let Some(end) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=end).collect();
                    let line = String::from_utf8_lossy(&line).into_owned();
                    return Some((Ok(line), (bytes, buffer, exhausted)));
                }

                if exhausted {
                    if buffer.is_empty() {
                        return None;
                    }
                    let tail = String::from_utf8_lossy(&std::mem::take(&mut buffer)).into_owned();
                    return Some((Ok(tail), (bytes, buffer, exhausted)));
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(chunk.as_ref()),
                    Some(Err(e)) => {
                        buffer.clear();
                        let error = LlmError::Transport(format!("stream interrupted: {e}"));
                        return Some((Err(error), (bytes, buffer, true)));
                    }
                    None => exhausted = true,
                }
            }
        },
    );

    Box::pin(lines)
}

/// One streaming HTTP call, from dispatch to `End`
///
/// Checks for cancellation before anything is sent, so a call cancelled up
/// front produces `Abort` + `End` without touching the network.
pub(crate) async fn stream_call<P, D>(
    provider: &P,
    mut emitter: EventEmitter,
    context: &RequestContext,
    cancel: &CancellationToken,
    request: RequestBuilder,
    framing: Framing,
    decoder: D,
) where
    P: Provider + ?Sized,
    D: StreamDecoder,
    D::Usage: Into<VendorUsage> + Send,
{
    if cancel.is_cancelled() {
        tracing::debug!(provider = %provider.name(), "stream cancelled before dispatch");
        emitter.abort();
        return;
    }

    emitter.requested(provider.name(), &context.model);

    match pump(provider.name(), &mut emitter, cancel, request, framing, decoder).await {
        Ok(outcome) => {
            if let Some(usage) = outcome.usage {
                let record = provider.report_usage(&usage.into(), &UsageMetadata::from(context));
                emitter.record_usage(record);
            }
            emitter.finish(outcome.tools, outcome.finish_reason);
        }
        Err(error) => emitter.fail(error),
    }
}

async fn pump<D: StreamDecoder>(
    provider: &str,
    emitter: &mut EventEmitter,
    cancel: &CancellationToken,
    request: RequestBuilder,
    framing: Framing,
    decoder: D,
) -> Result<StreamOutcome<D::Usage>, LlmError> {
    let response = cancellable(cancel, send(provider, request)).await??;
    drive(emitter, chunks(response, framing), decoder, cancel).await
}
