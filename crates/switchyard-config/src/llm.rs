use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Connection settings for a single provider
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Provider wire protocol
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    /// Platform API key, used when the call carries no tenant key
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Base URL override
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Deadline applied to every call (e.g. "60s", "2m")
    #[serde(default)]
    pub timeout: Option<String>,
}

impl ProviderConfig {
    /// Parse the configured timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the duration string is malformed
    pub fn timeout(&self) -> anyhow::Result<Option<Duration>> {
        self.timeout
            .as_deref()
            .map(|raw| duration_str::parse(raw).map_err(|e| anyhow::anyhow!("invalid duration '{raw}': {e}")))
            .transpose()
    }
}

/// Supported provider protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// OpenAI-compatible chat completions API
    Openai,
    /// Anthropic Messages API
    Anthropic,
    /// Google Generative Language API
    Google,
    /// Ollama local server
    Ollama,
    /// Offline echo provider
    Echo,
}

/// Catalog entry describing one model
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Name of the provider serving this model
    pub provider: String,
    /// Upstream model identifier, defaults to the entry name
    #[serde(default)]
    pub name: Option<String>,
    /// Hard context window in tokens
    #[serde(default)]
    pub context_tokens: Option<u32>,
    /// Maximum output tokens
    #[serde(default)]
    pub completion_tokens: Option<u32>,
    /// Upper bound on the thinking budget
    #[serde(default)]
    pub max_thinking_tokens: Option<u32>,
    /// Model supports extended reasoning
    #[serde(default)]
    pub reasoning: bool,
    /// Model supports image generation and editing
    #[serde(default)]
    pub image_generation: bool,
    /// Tenant-configured model, eligible for the fallback hop
    #[serde(default)]
    pub custom: bool,
    /// Catalog entry to retry against when this model fails
    #[serde(default)]
    pub fallback: Option<String>,
}

impl ModelConfig {
    /// Upstream identifier for the entry stored under `key`
    pub fn upstream_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(key)
    }
}
