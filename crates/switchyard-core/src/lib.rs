//! Types shared by every Switchyard crate
//!
//! Holds the per-call [`RequestContext`] handed to provider adapters and the
//! [`UsageRecord`]/[`UsageSink`] pair used for fire-and-forget usage accounting.

#![allow(clippy::must_use_candidate)]

mod context;
mod usage;

pub use context::{Credentials, Identity, KeySource, ModelCapabilities, ModelLimits, RequestContext};
pub use usage::{NoopUsageSink, PricingTier, UsageMetadata, UsageRecord, UsageSink};
