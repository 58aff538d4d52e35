//! Gateway wiring shared by the integration tests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use switchyard_config::Config;
use switchyard_llm::{EventStream, FinishReason, Inference, StreamEvent};
use switchyard_usage::{UsageRecorder, UsageTotals};

/// Inference entry point plus the recorder its usage lands in
pub struct Gateway {
    pub inference: Inference,
    pub usage: UsageRecorder,
}

impl Gateway {
    /// Build the gateway exactly as the binary does
    pub fn start(config: &Config) -> Self {
        let usage = UsageRecorder::new();
        let inference = Inference::from_config(config, Arc::new(usage.clone())).expect("valid gateway configuration");
        Self { inference, usage }
    }

    /// Wait until the recorder has aggregated `records` records
    pub async fn usage_after(&self, records: u64) -> HashMap<String, UsageTotals> {
        for _ in 0..100 {
            let totals = self.usage.totals();
            if totals.values().map(|t| t.records).sum::<u64>() >= records {
                return totals;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.usage.totals()
    }
}

/// Collect a stream to completion
pub async fn collect(stream: EventStream) -> Vec<StreamEvent> {
    stream.collect().await
}

/// Tags of the collected events
pub fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::kind).collect()
}

/// Concatenated `Content` text
pub fn content(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Content(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// Finish reason carried by the final `End`
pub fn end_reason(events: &[StreamEvent]) -> FinishReason {
    match events.last() {
        Some(StreamEvent::End { finish_reason, .. }) => *finish_reason,
        other => panic!("stream did not end with End: {other:?}"),
    }
}

/// One `End`, last; at most one `Error`/`Abort`, right before it, matching
pub fn assert_well_formed(events: &[StreamEvent]) {
    let ends = events.iter().filter(|event| event.is_end()).count();
    assert_eq!(ends, 1, "expected exactly one End in {:?}", kinds(events));

    let terminal: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, event)| matches!(event, StreamEvent::Error(_) | StreamEvent::Abort))
        .map(|(i, _)| i)
        .collect();
    assert!(terminal.len() <= 1, "more than one Error/Abort in {:?}", kinds(events));

    if let Some(&i) = terminal.first() {
        assert_eq!(i, events.len() - 2, "Error/Abort must directly precede End");
        let expected = match events[i] {
            StreamEvent::Error(_) => FinishReason::Error,
            _ => FinishReason::Abort,
        };
        assert_eq!(end_reason(events), expected);
    }
}
