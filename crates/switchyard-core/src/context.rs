use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Resolved runtime context for a single inference call
///
/// Built once per call by the model resolver and passed by reference to the
/// provider adapter. Adapters never mutate it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Configured provider name serving this call
    pub provider: String,
    /// Catalog entry name the caller asked for (e.g. `claude-sonnet`)
    pub model_entry: String,
    /// Upstream model identifier sent to the vendor
    pub model: String,
    /// Credentials resolved for this tenant and call
    pub credentials: Credentials,
    /// Agent/team the call is made on behalf of
    pub identity: Identity,
    /// Whether the key belongs to the tenant or the platform
    pub key_source: KeySource,
    /// Capability flags of the resolved model
    pub capabilities: ModelCapabilities,
    /// Token limits of the resolved model
    pub limits: ModelLimits,
    /// Tenant-configured model rather than a curated one
    pub custom: bool,
}

impl RequestContext {
    /// Create a context with no credentials, identity, or limits
    ///
    /// Useful for embedded use and tests where the provider's configured key
    /// is sufficient
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            provider: provider.into(),
            model_entry: model.clone(),
            model,
            credentials: Credentials::default(),
            identity: Identity::default(),
            key_source: KeySource::Platform,
            capabilities: ModelCapabilities::default(),
            limits: ModelLimits::default(),
            custom: false,
        }
    }

    /// Whether the call is billed against a tenant-owned key
    pub const fn is_user_key(&self) -> bool {
        matches!(self.key_source, KeySource::Tenant)
    }
}

/// Credentials resolved for one call
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// API key that overrides the provider's configured key
    pub api_key: Option<SecretString>,
}

/// Who the call is made on behalf of
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Agent identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Team identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

/// Ownership of the API key used for a call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KeySource {
    /// Platform-owned key
    #[default]
    Platform,
    /// Tenant-owned key
    Tenant,
}

/// Capability flags advertised by a model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelCapabilities {
    /// Supports extended reasoning/thinking
    pub reasoning: bool,
    /// Supports image generation and editing
    pub image_generation: bool,
}

/// Token limits of a model, when known
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelLimits {
    /// Hard context window (input + output)
    pub context_tokens: Option<u32>,
    /// Maximum output tokens
    pub completion_tokens: Option<u32>,
    /// Upper bound on the thinking budget
    pub max_thinking_tokens: Option<u32>,
}
