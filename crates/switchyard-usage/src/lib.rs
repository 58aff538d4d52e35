//! Usage recording for Switchyard
//!
//! [`UsageRecorder`] implements [`switchyard_core::UsageSink`] by pushing records
//! into an unbounded channel drained by a background task.

mod recorder;

pub use recorder::{UsageRecorder, UsageTotals};
