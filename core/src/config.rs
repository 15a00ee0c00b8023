use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CHAIN_LENGTH: usize = 8;

/// Dispatch tuning knobs.
///
/// ```toml
/// maxChainLength = 4
/// allowCloning = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DispatchConfig {
    /// Cache nodes a call site may install before it goes megamorphic.
    #[serde(default = "default_max_chain_length")]
    pub max_chain_length: usize,
    /// Let the invoker honor per-method "always clone" requests.
    #[serde(default = "default_allow_cloning")]
    pub allow_cloning: bool,
}

fn default_max_chain_length() -> usize {
    DEFAULT_MAX_CHAIN_LENGTH
}

fn default_allow_cloning() -> bool {
    true
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_chain_length: DEFAULT_MAX_CHAIN_LENGTH,
            allow_cloning: true,
        }
    }
}

impl DispatchConfig {
    pub fn with_max_chain_length(mut self, max_chain_length: usize) -> Self {
        self.max_chain_length = max_chain_length;
        self
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).context("invalid dispatch config")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source =
            fs::read_to_string(path).with_context(|| format!("failed to read dispatch config {}", path.display()))?;
        Self::from_toml_str(&source).with_context(|| format!("in {}", path.display()))
    }
}
