//! Model resolution
//!
//! Turns the model name a caller asks for into the [`RequestContext`] for one
//! call, using the configured model catalog.

use indexmap::IndexMap;
use secrecy::SecretString;
use switchyard_config::Config;
use switchyard_core::{Credentials, Identity, KeySource, ModelCapabilities, ModelLimits, RequestContext};

use crate::error::LlmError;

/// Resolves model names into per-call contexts
pub trait ModelResolver: Send + Sync {
    /// Resolve `model` for a call made on behalf of `identity`
    ///
    /// A caller-supplied `api_key` overrides the provider's configured key and
    /// marks the call as billed to the tenant.
    fn resolve(&self, model: &str, identity: &Identity, api_key: Option<SecretString>) -> Result<RequestContext, LlmError>;

    /// Fallback catalog entry configured for `model`
    fn fallback_for(&self, model: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    provider: String,
    upstream: String,
    capabilities: ModelCapabilities,
    limits: ModelLimits,
    custom: bool,
    fallback: Option<String>,
}

/// Resolver backed by the `[models]` catalog
///
/// Supports two formats:
/// - `entry` -- a catalog entry name
/// - `provider/model` -- an uncatalogued model on a configured provider, with
///   no limits or capabilities
#[derive(Debug, Clone, Default)]
pub struct CatalogResolver {
    entries: IndexMap<String, CatalogEntry>,
    providers: Vec<String>,
}

impl CatalogResolver {
    /// Build the catalog from configuration
    pub fn from_config(config: &Config) -> Self {
        let entries = config
            .models
            .iter()
            .map(|(name, model)| {
                let entry = CatalogEntry {
                    provider: model.provider.clone(),
                    upstream: model.upstream_name(name).to_owned(),
                    capabilities: ModelCapabilities {
                        reasoning: model.reasoning,
                        image_generation: model.image_generation,
                    },
                    limits: ModelLimits {
                        context_tokens: model.context_tokens,
                        completion_tokens: model.completion_tokens,
                        max_thinking_tokens: model.max_thinking_tokens,
                    },
                    custom: model.custom,
                    fallback: model.fallback.clone(),
                };
                (name.clone(), entry)
            })
            .collect();

        Self {
            entries,
            providers: config.providers.keys().cloned().collect(),
        }
    }

    fn entry(&self, model: &str) -> Result<(String, CatalogEntry), LlmError> {
        if let Some(entry) = self.entries.get(model) {
            return Ok((model.to_owned(), entry.clone()));
        }

        if let Some((provider, upstream)) = model.split_once('/') {
            if !self.providers.iter().any(|name| name == provider) {
                return Err(LlmError::Validation(format!("unknown provider '{provider}'")));
            }
            let entry = CatalogEntry {
                provider: provider.to_owned(),
                upstream: upstream.to_owned(),
                capabilities: ModelCapabilities::default(),
                limits: ModelLimits::default(),
                custom: false,
                fallback: None,
            };
            return Ok((model.to_owned(), entry));
        }

        Err(LlmError::Validation(format!("unknown model '{model}'")))
    }
}

impl ModelResolver for CatalogResolver {
    fn resolve(&self, model: &str, identity: &Identity, api_key: Option<SecretString>) -> Result<RequestContext, LlmError> {
        let (model_entry, entry) = self.entry(model)?;

        let key_source = if api_key.is_some() {
            KeySource::Tenant
        } else {
            KeySource::Platform
        };

        Ok(RequestContext {
            provider: entry.provider,
            model_entry,
            model: entry.upstream,
            credentials: Credentials { api_key },
            identity: identity.clone(),
            key_source,
            capabilities: entry.capabilities,
            limits: entry.limits,
            custom: entry.custom,
        })
    }

    fn fallback_for(&self, model: &str) -> Option<String> {
        self.entries.get(model).and_then(|entry| entry.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn resolver() -> CatalogResolver {
        let config = Config::parse(indoc! {r#"
            [providers.anthropic]
            type = "anthropic"

            [providers.openai]
            type = "openai"

            [models.my-claude]
            provider = "anthropic"
            name = "claude-sonnet-4-5"
            context_tokens = 200000
            reasoning = true
            custom = true
            fallback = "gpt-4o"

            [models.gpt-4o]
            provider = "openai"
        "#})
        .unwrap();
        CatalogResolver::from_config(&config)
    }

    #[test]
    fn resolves_catalog_entry() {
        let identity = Identity {
            agent_id: Some("agent-7".to_owned()),
            team_id: None,
        };

        let context = resolver().resolve("my-claude", &identity, None).unwrap();

        assert_eq!(context.provider, "anthropic");
        assert_eq!(context.model_entry, "my-claude");
        assert_eq!(context.model, "claude-sonnet-4-5");
        assert!(context.custom);
        assert!(context.capabilities.reasoning);
        assert_eq!(context.limits.context_tokens, Some(200_000));
        assert_eq!(context.identity, identity);
        assert_eq!(context.key_source, KeySource::Platform);
    }

    #[test]
    fn caller_key_marks_tenant_billing() {
        let context = resolver()
            .resolve("gpt-4o", &Identity::default(), Some(SecretString::from("sk-tenant")))
            .unwrap();
        assert_eq!(context.key_source, KeySource::Tenant);
        assert!(context.credentials.api_key.is_some());
    }

    #[test]
    fn resolves_explicit_provider_prefix() {
        let context = resolver()
            .resolve("openai/gpt-4.1-mini", &Identity::default(), None)
            .unwrap();
        assert_eq!(context.provider, "openai");
        assert_eq!(context.model, "gpt-4.1-mini");
        assert!(!context.custom);
    }

    #[test]
    fn rejects_unknown_names() {
        let resolver = resolver();
        assert!(matches!(
            resolver.resolve("mystery", &Identity::default(), None),
            Err(LlmError::Validation(msg)) if msg.contains("unknown model")
        ));
        assert!(matches!(
            resolver.resolve("nope/model", &Identity::default(), None),
            Err(LlmError::Validation(msg)) if msg.contains("unknown provider")
        ));
    }

    #[test]
    fn reports_configured_fallback() {
        let resolver = resolver();
        assert_eq!(resolver.fallback_for("my-claude").as_deref(), Some("gpt-4o"));
        assert_eq!(resolver.fallback_for("gpt-4o"), None);
    }
}
