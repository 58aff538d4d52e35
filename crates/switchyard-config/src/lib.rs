#![allow(clippy::must_use_candidate)]

mod env;
mod llm;
mod loader;
mod logging;

use indexmap::IndexMap;
use serde::Deserialize;

pub use env::ExpandError;
pub use llm::*;
pub use logging::*;

/// Top-level Switchyard configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Provider connections keyed by name
    #[serde(default)]
    pub providers: IndexMap<String, ProviderConfig>,
    /// Model catalog keyed by entry name
    #[serde(default)]
    pub models: IndexMap<String, ModelConfig>,
}
