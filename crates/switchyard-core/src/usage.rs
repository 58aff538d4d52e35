use serde::{Deserialize, Serialize};

use crate::context::{KeySource, RequestContext};

/// Normalized token and cost accounting for one vendor reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Usage source, `llm:{model}`
    pub source_id: String,
    /// Billable input tokens (cached tokens excluded where the vendor reports them)
    pub input_tokens: u64,
    /// Output tokens
    pub output_tokens: u64,
    /// Tokens written to the prompt cache
    pub cache_write_tokens: u64,
    /// Tokens served from the prompt cache
    pub cache_read_tokens: u64,
    /// Reasoning/thinking tokens reported separately by the vendor
    #[serde(default)]
    pub reasoning_tokens: u64,
    /// Audio input tokens reported separately by the vendor
    #[serde(default)]
    pub audio_input_tokens: u64,
    /// Pricing tier selected by prompt size, for tiered models
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<PricingTier>,
    /// Additional cost in USD reported by the vendor
    #[serde(default)]
    pub cost: f64,
    /// Owner of the key that paid for the call
    pub key_source: KeySource,
    /// Agent identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Team identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

/// Prompt-size pricing tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PricingTier {
    /// Prompt below the model's tier threshold
    Tier1,
    /// Prompt at or above the model's tier threshold
    Tier2,
}

/// Attribution attached to every usage record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageMetadata {
    /// Catalog model entry name
    pub model_entry: String,
    /// Owner of the key
    pub key_source: KeySource,
    /// Agent identifier
    pub agent_id: Option<String>,
    /// Team identifier
    pub team_id: Option<String>,
}

impl UsageMetadata {
    /// Source identifier for records published under this metadata
    pub fn source_id(&self) -> String {
        format!("llm:{}", self.model_entry)
    }

    /// Start a record pre-filled with attribution fields
    pub fn record(&self) -> UsageRecord {
        UsageRecord {
            source_id: self.source_id(),
            key_source: self.key_source,
            agent_id: self.agent_id.clone(),
            team_id: self.team_id.clone(),
            ..UsageRecord::default()
        }
    }
}

impl From<&RequestContext> for UsageMetadata {
    fn from(context: &RequestContext) -> Self {
        Self {
            model_entry: context.model_entry.clone(),
            key_source: context.key_source,
            agent_id: context.identity.agent_id.clone(),
            team_id: context.identity.team_id.clone(),
        }
    }
}

/// Process-wide publish target for usage records
///
/// Publishing is fire-and-forget: no acknowledgement, no backpressure, and
/// implementations must not block the caller.
pub trait UsageSink: Send + Sync {
    /// Publish one record
    fn publish(&self, record: UsageRecord);
}

/// Sink that discards every record
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

impl UsageSink for NoopUsageSink {
    fn publish(&self, _record: UsageRecord) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_from_context_carries_identity() {
        let mut ctx = RequestContext::new("anthropic", "claude-sonnet-4-5");
        ctx.model_entry = "claude-sonnet".to_owned();
        ctx.identity.agent_id = Some("agent-1".to_owned());
        ctx.identity.team_id = Some("team-1".to_owned());
        ctx.key_source = KeySource::Tenant;

        let metadata = UsageMetadata::from(&ctx);
        let record = metadata.record();

        assert_eq!(record.source_id, "llm:claude-sonnet");
        assert_eq!(record.agent_id.as_deref(), Some("agent-1"));
        assert_eq!(record.team_id.as_deref(), Some("team-1"));
        assert_eq!(record.key_source, KeySource::Tenant);
        assert_eq!(record.input_tokens, 0);
    }

    #[test]
    fn record_serializes_tier_in_snake_case() {
        let record = UsageRecord {
            tier: Some(PricingTier::Tier2),
            ..UsageRecord::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["tier"], "tier2");
        assert_eq!(json["key_source"], "platform");
    }
}
