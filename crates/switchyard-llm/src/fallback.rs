//! Single-hop fallback for custom models
//!
//! A failed call against a tenant-configured model is retried once against its
//! configured fallback. The retry never falls back again.

use std::future::Future;
use std::sync::Arc;

use futures_util::StreamExt;

use crate::error::LlmError;
use crate::stream::{EventStream, spawn_stream};
use crate::types::StreamEvent;

/// Phase of a streaming call that may hop to its fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum FallbackPhase {
    /// Forwarding the primary stream
    Primary,
    /// Primary failed, starting the fallback stream
    SwitchingToFallback,
    /// Forwarding the fallback stream
    Fallback,
    /// Fallback could not start, the primary error was reported
    Failed,
}

/// Settle a blocking call, retrying once against `fallback` on failure
///
/// `retry` receives the fallback model name. When the retry fails too the
/// primary error is returned, not the fallback's.
pub async fn settle_blocking<T, F, Fut>(
    model: &str,
    result: Result<T, LlmError>,
    fallback: Option<String>,
    retry: F,
) -> Result<T, LlmError>
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let error = match result {
        Ok(value) => return Ok(value),
        Err(error) => error,
    };

    let Some(fallback) = fallback.filter(|_| error.is_fallback_eligible()) else {
        return Err(error);
    };

    tracing::info!(model = %model, fallback = %fallback, error = %error, "attempting fallback");

    match retry(fallback.clone()).await {
        Ok(value) => Ok(value),
        Err(fallback_error) => {
            let exhausted = LlmError::FallbackExhausted {
                primary: Box::new(error),
                fallback: Box::new(fallback_error),
            };
            tracing::warn!(model = %model, fallback = %fallback, error = %exhausted, "fallback failed");
            Err(exhausted.into_primary())
        }
    }
}

/// Proxy `primary`, switching to the stream from `start_fallback` on `Error`
///
/// Every primary event other than `Error` is forwarded untouched, `Abort`
/// included. On the first primary `Error` the primary is abandoned and the
/// fallback stream is forwarded in its place, its own terminal events
/// included. When the fallback cannot be started the primary error is
/// reported. The fallback is attempted at most once.
///
/// When the consumer drops the proxy the current source is dropped with it,
/// so the producer behind it sees a closed stream and no fallback is started.
pub fn stream_with_fallback<F>(primary: EventStream, start_fallback: F) -> EventStream
where
    F: FnOnce() -> Result<EventStream, LlmError> + Send + 'static,
{
    spawn_stream(move |mut emitter| async move {
        let mut phase = FallbackPhase::Primary;
        let mut source = primary;
        let mut start_fallback = Some(start_fallback);

        loop {
            let event = tokio::select! {
                biased;
                () = emitter.closed() => {
                    tracing::debug!(phase = %phase, "consumer dropped the stream, releasing source");
                    return;
                }
                event = source.next() => event,
            };
            let Some(event) = event else {
                return;
            };

            match event {
                StreamEvent::Error(error) if phase == FallbackPhase::Primary => {
                    if emitter.is_closed() {
                        return;
                    }

                    phase = FallbackPhase::SwitchingToFallback;
                    tracing::info!(error = %error, phase = %phase, "primary stream failed, attempting fallback");

                    match start_fallback.take().map(|start| start()) {
                        Some(Ok(fallback)) => {
                            phase = FallbackPhase::Fallback;
                            source = fallback;
                        }
                        Some(Err(e)) => {
                            phase = FallbackPhase::Failed;
                            tracing::warn!(error = %e, phase = %phase, "fallback stream could not start");
                            emitter.fail_shared(error);
                            return;
                        }
                        None => {
                            emitter.fail_shared(error);
                            return;
                        }
                    }
                }
                other => {
                    let is_end = other.is_end();
                    emitter.forward(other);
                    if is_end {
                        return;
                    }
                }
            }
        }
    })
}

/// Error carried by a stream's `Error` event, when it has one
pub fn stream_error(events: &[StreamEvent]) -> Option<Arc<LlmError>> {
    events.iter().find_map(|event| match event {
        StreamEvent::Error(error) => Some(Arc::clone(error)),
        _ => None,
    })
}
