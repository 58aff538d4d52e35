//! Programmatic configuration builder for integration tests

use secrecy::SecretString;
use switchyard_config::{Config, ModelConfig, ProviderConfig, ProviderType};

/// Builder for constructing test configurations
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a builder with no providers or models
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Add an OpenAI-compatible provider pointed at a mock vendor
    pub fn with_openai_provider(self, name: &str, base_url: &str) -> Self {
        self.with_provider(name, ProviderType::Openai, Some(base_url))
    }

    /// Add an Ollama provider pointed at a mock vendor
    pub fn with_ollama_provider(self, name: &str, base_url: &str) -> Self {
        self.with_provider(name, ProviderType::Ollama, Some(base_url))
    }

    /// Add the offline echo provider
    pub fn with_echo_provider(self, name: &str) -> Self {
        self.with_provider(name, ProviderType::Echo, None)
    }

    fn with_provider(mut self, name: &str, provider_type: ProviderType, base_url: Option<&str>) -> Self {
        self.config.providers.insert(
            name.to_owned(),
            ProviderConfig {
                provider_type,
                api_key: Some(SecretString::from("test-key")),
                base_url: base_url.map(|url| url.parse().expect("valid URL")),
                timeout: None,
            },
        );
        self
    }

    /// Set a call timeout on an already-added provider
    pub fn with_timeout(mut self, provider: &str, timeout: &str) -> Self {
        if let Some(config) = self.config.providers.get_mut(provider) {
            config.timeout = Some(timeout.to_owned());
        }
        self
    }

    /// Add a curated catalog entry served by `provider`
    pub fn with_model(self, name: &str, provider: &str) -> Self {
        self.with_model_config(
            name,
            ModelConfig {
                provider: provider.to_owned(),
                ..ModelConfig::default()
            },
        )
    }

    /// Add a tenant-configured entry that falls back to `fallback`
    pub fn with_custom_model(self, name: &str, provider: &str, fallback: &str) -> Self {
        self.with_model_config(
            name,
            ModelConfig {
                provider: provider.to_owned(),
                custom: true,
                reasoning: true,
                fallback: Some(fallback.to_owned()),
                ..ModelConfig::default()
            },
        )
    }

    /// Add a catalog entry with full control over its settings
    pub fn with_model_config(mut self, name: &str, model: ModelConfig) -> Self {
        self.config.models.insert(name.to_owned(), model);
        self
    }

    /// Validate and build the final config
    pub fn build(self) -> Config {
        self.config.validate().expect("valid test configuration");
        self.config
    }
}
