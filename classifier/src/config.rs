//! Configuration for classification runs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use docsort_embeddings::provider::{DEFAULT_BASE_URL, DEFAULT_CHUNK_SIZE, DEFAULT_MODEL};

use crate::error::{ClassifierError, Result};

/// Configuration for a classification run.
///
/// Every field has a default, so a TOML file only needs the values it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Directory holding one embedding record per document.
    pub cache_dir: PathBuf,

    /// Number of neighbors consulted per prediction.
    pub k: usize,

    /// Maximum number of documents embedded at the same time.
    pub concurrency: usize,

    /// Whether to write training and predicted labels back into the
    /// cached records.
    pub annotate_labels: bool,

    /// Embedding provider configuration.
    pub provider: ProviderConfig,
}

impl ClassifierConfig {
    /// Create a new configuration with default values.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    /// Set the number of neighbors.
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    /// Set the concurrency bound.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Enable or disable label annotation.
    pub fn with_annotate_labels(mut self, annotate: bool) -> Self {
        self.annotate_labels = annotate;
        self
    }

    /// Set the provider configuration.
    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.provider = provider;
        self
    }

    /// Parse a configuration from TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ClassifierError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ClassifierError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Check that the values can drive a run.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(ClassifierError::Config("k must be at least 1".to_string()));
        }
        if self.concurrency == 0 {
            return Err(ClassifierError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.provider.chunk_size == 0 {
            return Err(ClassifierError::Config(
                "provider.chunk_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("embeddings"),
            k: 3,
            concurrency: 4,
            annotate_labels: true,
            provider: ProviderConfig::default(),
        }
    }
}

/// Configuration for the embedding provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API base URL.
    pub base_url: String,

    /// Model to use for embeddings.
    pub model: String,

    /// Maximum characters per embedding request.
    pub chunk_size: usize,

    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}
