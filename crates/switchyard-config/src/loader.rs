use std::path::Path;

use crate::Config;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, variable expansion fails,
    /// TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::parse(&raw)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if variable expansion, parsing, or validation fails
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error if a model references an unknown provider, a fallback
    /// is invalid, or a limit or timeout is malformed
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_providers()?;
        self.validate_models()?;
        self.validate_fallbacks()?;
        Ok(())
    }

    fn validate_providers(&self) -> anyhow::Result<()> {
        for (name, provider) in &self.providers {
            provider
                .timeout()
                .map_err(|e| anyhow::anyhow!("provider '{name}' has an invalid timeout: {e}"))?;
        }
        Ok(())
    }

    fn validate_models(&self) -> anyhow::Result<()> {
        for (name, model) in &self.models {
            if !self.providers.contains_key(&model.provider) {
                anyhow::bail!("model '{name}' references unknown provider '{}'", model.provider);
            }

            let limits = [
                ("context_tokens", model.context_tokens),
                ("completion_tokens", model.completion_tokens),
                ("max_thinking_tokens", model.max_thinking_tokens),
            ];
            for (field, value) in limits {
                if value == Some(0) {
                    anyhow::bail!("model '{name}': {field} must be greater than 0");
                }
            }
        }
        Ok(())
    }

    /// Fallbacks must name another catalog entry, and never chain
    fn validate_fallbacks(&self) -> anyhow::Result<()> {
        for (name, model) in &self.models {
            let Some(fallback) = &model.fallback else {
                continue;
            };

            if fallback == name {
                anyhow::bail!("model '{name}' cannot fall back to itself");
            }

            let Some(target) = self.models.get(fallback) else {
                anyhow::bail!("model '{name}' falls back to unknown model '{fallback}'");
            };

            if target.fallback.is_some() {
                anyhow::bail!("model '{name}' falls back to '{fallback}', which has its own fallback");
            }
        }
        Ok(())
    }
}
