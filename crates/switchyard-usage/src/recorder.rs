use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use switchyard_core::{UsageRecord, UsageSink};
use tokio::sync::{mpsc, oneshot};

/// Running totals for one usage source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageTotals {
    /// Records aggregated
    pub records: u64,
    /// Sum of input tokens
    pub input_tokens: u64,
    /// Sum of output tokens
    pub output_tokens: u64,
    /// Sum of cache-write tokens
    pub cache_write_tokens: u64,
    /// Sum of cache-read tokens
    pub cache_read_tokens: u64,
    /// Sum of reported cost in USD
    pub cost: f64,
}

impl UsageTotals {
    fn add(&mut self, record: &UsageRecord) {
        self.records += 1;
        self.input_tokens += record.input_tokens;
        self.output_tokens += record.output_tokens;
        self.cache_write_tokens += record.cache_write_tokens;
        self.cache_read_tokens += record.cache_read_tokens;
        self.cost += record.cost;
    }
}

type Ledger = Arc<Mutex<HashMap<String, UsageTotals>>>;

enum Command {
    Record(Box<UsageRecord>),
    Flush(oneshot::Sender<()>),
}

/// Async usage recorder that dispatches records to a background task
///
/// Records are sent via an unbounded channel and processed
/// asynchronously so publishing never blocks an inference call
#[derive(Clone)]
pub struct UsageRecorder {
    tx: mpsc::UnboundedSender<Command>,
    ledger: Ledger,
}

impl UsageRecorder {
    /// Create a new recorder and spawn its background processing task
    ///
    /// Must be called from within a Tokio runtime. The background task runs
    /// until every clone of the recorder is dropped.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let ledger = Ledger::default();

        tokio::spawn(process_records(rx, Arc::clone(&ledger)));

        Self { tx, ledger }
    }

    /// Snapshot of the totals aggregated so far, keyed by source id
    pub fn totals(&self) -> HashMap<String, UsageTotals> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Wait until every record published before this call has been aggregated
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush(ack)).is_err() {
            tracing::warn!("usage recorder already stopped, nothing to flush");
            return;
        }
        // The processor drops `ack` only if it stops, which also means it is drained
        let _ = done.await;
    }
}

impl Default for UsageRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageSink for UsageRecorder {
    /// Enqueue a record for background processing
    ///
    /// If the channel is closed the record is dropped with a warning
    fn publish(&self, record: UsageRecord) {
        if let Err(e) = self.tx.send(Command::Record(Box::new(record))) {
            tracing::warn!(
                error = %e,
                "failed to enqueue usage record, channel closed"
            );
        }
    }
}

impl std::fmt::Debug for UsageRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageRecorder").finish_non_exhaustive()
    }
}

async fn process_records(mut rx: mpsc::UnboundedReceiver<Command>, ledger: Ledger) {
    while let Some(command) = rx.recv().await {
        let record = match command {
            Command::Record(record) => record,
            Command::Flush(ack) => {
                let _ = ack.send(());
                continue;
            }
        };

        tracing::info!(
            source = %record.source_id,
            key_source = %record.key_source,
            agent_id = record.agent_id.as_deref().unwrap_or_default(),
            team_id = record.team_id.as_deref().unwrap_or_default(),
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            cache_read_tokens = record.cache_read_tokens,
            cache_write_tokens = record.cache_write_tokens,
            cost = record.cost,
            "usage recorded"
        );

        ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(record.source_id.clone())
            .or_default()
            .add(&record);
    }

    tracing::debug!("usage recorder shutting down");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn record(source: &str, input: u64, output: u64) -> UsageRecord {
        UsageRecord {
            source_id: source.to_owned(),
            input_tokens: input,
            output_tokens: output,
            ..UsageRecord::default()
        }
    }

    async fn wait_for_records(recorder: &UsageRecorder, source: &str, expected: u64) -> UsageTotals {
        for _ in 0..100 {
            if let Some(totals) = recorder.totals().get(source)
                && totals.records == expected
            {
                return totals.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("usage records for {source} were not processed");
    }

    #[tokio::test]
    async fn aggregates_records_per_source() {
        let recorder = UsageRecorder::new();

        recorder.publish(record("llm:gpt-4o", 100, 20));
        recorder.publish(record("llm:gpt-4o", 50, 5));
        recorder.publish(record("llm:claude", 10, 1));

        let gpt = wait_for_records(&recorder, "llm:gpt-4o", 2).await;
        assert_eq!(gpt.input_tokens, 150);
        assert_eq!(gpt.output_tokens, 25);

        let claude = wait_for_records(&recorder, "llm:claude", 1).await;
        assert_eq!(claude.input_tokens, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn flush_waits_for_published_records() {
        let recorder = UsageRecorder::new();

        for _ in 0..100 {
            recorder.publish(record("llm:gpt-4o", 1, 2));
        }
        recorder.flush().await;

        let totals = recorder.totals().remove("llm:gpt-4o").unwrap();
        assert_eq!(totals.records, 100);
        assert_eq!(totals.output_tokens, 200);
    }

    #[tokio::test]
    async fn clones_share_one_ledger() {
        let recorder = UsageRecorder::new();
        let clone = recorder.clone();

        clone.publish(record("llm:echo", 3, 4));

        let totals = wait_for_records(&recorder, "llm:echo", 1).await;
        assert_eq!(totals.output_tokens, 4);
    }
}
