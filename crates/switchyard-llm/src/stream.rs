//! Streaming event state machine
//!
//! Every streaming call owns one [`EventEmitter`] feeding one consumed
//! [`EventStream`]. The emitter moves `Idle -> Streaming -> Terminal` and drops
//! anything sent after the terminal transition, so a second `End` (or content
//! after an `Error`) cannot reach the consumer.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use switchyard_core::UsageRecord;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::finish::FinishReason;
use crate::types::{StreamEvent, ToolInvocation};

/// Consumed side of a streaming call
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Streaming,
    Terminal,
}

/// Producer side of a streaming call
#[derive(Debug)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<StreamEvent>,
    phase: Phase,
    tool_info_sent: bool,
    usage: Vec<UsageRecord>,
}

impl EventEmitter {
    /// Create an emitter and the stream it feeds
    pub fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Self {
            tx,
            phase: Phase::Idle,
            tool_info_sent: false,
            usage: Vec::new(),
        };
        (emitter, Box::pin(UnboundedReceiverStream::new(rx)))
    }

    fn send(&mut self, event: StreamEvent) {
        if self.phase == Phase::Terminal {
            tracing::debug!(event = event.kind(), "dropping event emitted after stream end");
            return;
        }
        self.phase = Phase::Streaming;
        // A consumer that stopped listening is not an error for the producer
        let _ = self.tx.send(event);
    }

    fn terminate(&mut self, terminal: Option<StreamEvent>, tools: Vec<ToolInvocation>, finish_reason: FinishReason) {
        if self.phase == Phase::Terminal {
            return;
        }
        if let Some(event) = terminal {
            self.send(event);
        }
        let usage = std::mem::take(&mut self.usage);
        self.send(StreamEvent::End {
            tools,
            usage,
            finish_reason,
        });
        self.phase = Phase::Terminal;
    }

    /// Whether `End` has been emitted
    pub fn is_terminated(&self) -> bool {
        self.phase == Phase::Terminal
    }

    /// Whether the consumer dropped its stream
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the consumer drops its stream
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    /// Call is about to be dispatched
    pub fn requested(&mut self, provider: &str, model: &str) {
        self.send(StreamEvent::Requested {
            provider: provider.to_owned(),
            model: model.to_owned(),
        });
    }

    /// Raw vendor chunk
    pub fn data(&mut self, chunk: serde_json::Value) {
        self.send(StreamEvent::Data(chunk));
    }

    /// Display text delta, empty deltas are skipped
    pub fn content(&mut self, text: String) {
        if !text.is_empty() {
            self.send(StreamEvent::Content(text));
        }
    }

    /// Reasoning text delta, empty deltas are skipped
    pub fn thinking(&mut self, text: String) {
        if !text.is_empty() {
            self.send(StreamEvent::Thinking(text));
        }
    }

    /// Accumulated tool calls, emitted at most once
    pub fn tool_info(&mut self, tools: Vec<ToolInvocation>) {
        if self.tool_info_sent {
            return;
        }
        self.tool_info_sent = true;
        self.send(StreamEvent::ToolInfo(tools));
    }

    /// Attach a published usage record to the eventual `End`
    pub fn record_usage(&mut self, record: UsageRecord) {
        self.usage.push(record);
    }

    /// Finish normally
    ///
    /// Emits `ToolInfo` when tools were requested and `Interrupted` when the
    /// finish reason is not a natural stop, then `End`. A turn that assembled
    /// tool calls always finishes with `Stop`.
    pub fn finish(&mut self, tools: Vec<ToolInvocation>, finish_reason: FinishReason) {
        let finish_reason = if tools.is_empty() {
            finish_reason
        } else {
            self.tool_info(tools.clone());
            FinishReason::Stop
        };

        if !finish_reason.is_stop() {
            self.send(StreamEvent::Interrupted(finish_reason));
        }

        self.terminate(None, tools, finish_reason);
    }

    /// Finish with a failure
    ///
    /// Cancellation is reported as `Abort`, everything else as `Error`.
    pub fn fail(&mut self, error: LlmError) {
        if error.is_cancellation() {
            self.abort();
            return;
        }
        self.fail_shared(Arc::new(error));
    }

    /// Finish with an already-shared failure
    pub fn fail_shared(&mut self, error: Arc<LlmError>) {
        self.terminate(Some(StreamEvent::Error(error)), Vec::new(), FinishReason::Error);
    }

    /// Finish with cancellation
    pub fn abort(&mut self) {
        self.terminate(Some(StreamEvent::Abort), Vec::new(), FinishReason::Abort);
    }

    /// Pass an event from another stream through verbatim
    ///
    /// A forwarded `End` moves this emitter to its terminal phase.
    pub fn forward(&mut self, event: StreamEvent) {
        let is_end = event.is_end();
        self.send(event);
        if is_end {
            self.phase = Phase::Terminal;
        }
    }
}

impl Drop for EventEmitter {
    fn drop(&mut self) {
        if self.phase != Phase::Terminal {
            self.fail(LlmError::Transport("stream ended without a terminal event".to_owned()));
        }
    }
}

/// Run `producer` on a background task and return the stream it feeds
///
/// The producer starts only after yielding once, so nothing is emitted before
/// the caller has received the stream. A producer that returns without
/// emitting `End` is closed with `Error` + `End`.
pub fn spawn_stream<F, Fut>(producer: F) -> EventStream
where
    F: FnOnce(EventEmitter) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (emitter, stream) = EventEmitter::channel();
    tokio::spawn(async move {
        tokio::task::yield_now().await;
        producer(emitter).await;
    });
    stream
}

/// Stream that emits `Error` + `End` for a failure raised before dispatch
pub fn failed_stream(error: LlmError) -> EventStream {
    spawn_stream(move |mut emitter| async move { emitter.fail(error) })
}

/// Await `future` unless `cancel` fires first
///
/// Dropping the losing future closes any vendor connection it held.
pub async fn cancellable<F: Future>(cancel: &CancellationToken, future: F) -> Result<F::Output, LlmError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(LlmError::Cancelled),
        output = future => Ok(output),
    }
}

/// Interpreted piece of one vendor chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    /// Display text
    Content(String),
    /// Reasoning text
    Thinking(String),
    /// Vendor reported an in-band failure
    Failed(String),
}

/// Final state of a decoded vendor stream
#[derive(Debug)]
pub struct StreamOutcome<U> {
    /// Tool calls assembled across chunks
    pub tools: Vec<ToolInvocation>,
    /// Normalized vendor finish reason
    pub finish_reason: FinishReason,
    /// Vendor usage, when reported
    pub usage: Option<U>,
}

/// Stateful converter from vendor stream chunks to canonical deltas
pub trait StreamDecoder: Send {
    /// Vendor chunk type
    type Chunk: DeserializeOwned;
    /// Vendor usage type
    type Usage;

    /// Convert one chunk, updating accumulated state
    fn convert_chunk(&mut self, chunk: &Self::Chunk) -> Vec<Delta>;

    /// Consume the decoder once the vendor stream ends
    fn finish(self) -> StreamOutcome<Self::Usage>;
}

/// Drive raw vendor payloads through `decoder` into `emitter`
///
/// `chunks` yields one JSON document per item (an SSE `data` field or an
/// NDJSON line). Blank items and the `[DONE]` sentinel are ignored, and
/// unparseable items are skipped.
pub async fn drive<D, S>(
    emitter: &mut EventEmitter,
    mut chunks: S,
    mut decoder: D,
    cancel: &CancellationToken,
) -> Result<StreamOutcome<D::Usage>, LlmError>
where
    D: StreamDecoder,
    S: Stream<Item = Result<String, LlmError>> + Unpin,
{
    while let Some(chunk) = cancellable(cancel, chunks.next()).await? {
        if emitter.is_closed() {
            return Err(LlmError::Cancelled);
        }

        let raw = chunk?;
        let raw = raw.trim();
        if raw.is_empty() || raw == "[DONE]" {
            continue;
        }

        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable stream chunk");
                continue;
            }
        };
        emitter.data(value.clone());

        let parsed: D::Chunk = match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unrecognized stream chunk");
                continue;
            }
        };

        for delta in decoder.convert_chunk(&parsed) {
            match delta {
                Delta::Content(text) => emitter.content(text),
                Delta::Thinking(text) => emitter.thinking(text),
                Delta::Failed(message) => return Err(LlmError::Transport(message)),
            }
        }
    }

    Ok(decoder.finish())
}
