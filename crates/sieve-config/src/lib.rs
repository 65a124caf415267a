//! Configuration for the sieve code index.
//!
//! Settings are layered: built-in defaults, then `sieve.toml` in the working
//! directory (optional), then an explicit file (optional), then environment
//! variables of the form `SIEVE__<SECTION>__<KEY>`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "sieve";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SIEVE";

/// Validation failures for a loaded configuration.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("indexing.batch_size must be greater than zero")]
    ZeroBatchSize,

    #[error("indexing.chunk_overlap ({overlap}) must be less than half of indexing.chunk_size ({size})")]
    OverlapTooLarge { overlap: usize, size: usize },

    #[error("embeddings.dimensions must be greater than zero")]
    ZeroDimensions,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SieveConfig {
    pub indexing: IndexingConfig,
    pub search: SearchConfig,
    pub qdrant: QdrantConfig,
    pub embeddings: EmbeddingsConfig,
    pub chat: ChatConfig,
}

/// Indexing pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Files with a priority tier at or below this value go into the priority phase
    pub priority_threshold: u8,

    /// Files per bulk-phase batch
    pub batch_size: usize,

    /// Upper bound on in-flight tasks during the priority phase
    pub priority_concurrency: usize,

    /// Files larger than this are skipped
    pub max_file_size: u64,

    /// Pause between the priority and bulk phases
    pub bulk_delay_ms: u64,

    /// Content at or below this length is emitted as a single chunk
    pub single_chunk_limit: usize,

    pub chunk_size: usize,
    pub chunk_overlap: usize,

    /// Directory holding change-cache logs, relative to the working directory
    pub state_dir: PathBuf,

    /// Depth of the working-directory scan during the priority phase
    pub cwd_scan_depth: usize,

    /// Honour .gitignore files while walking
    pub respect_gitignore: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            priority_threshold: 5,
            batch_size: 20,
            priority_concurrency: 32,
            max_file_size: 1024 * 1024,
            bulk_delay_ms: 1000,
            single_chunk_limit: 4000,
            chunk_size: 3000,
            chunk_overlap: 500,
            state_dir: PathBuf::from(".sieve"),
            cwd_scan_depth: 2,
            respect_gitignore: false,
        }
    }
}

/// Query-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Default number of results when the caller does not specify one
    pub max_results: usize,

    /// Cap on lexical fallback results
    pub lexical_limit: usize,

    /// Retries for each multi-query expansion call
    pub expansion_retries: u32,

    /// Base delay for the linear backoff between expansion retries
    pub expansion_backoff_ms: u64,

    /// Minimum similarity for plain vector queries
    pub similarity_threshold: Option<f32>,

    /// Ask the chat backend to enrich queries before searching
    pub enhance_queries: bool,

    /// Ask the chat backend for a summary of the results
    pub summarize: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 20,
            lexical_limit: 20,
            expansion_retries: 2,
            expansion_backoff_ms: 500,
            similarity_threshold: None,
            enhance_queries: true,
            summarize: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,

    /// Wait after deleting a collection before recreating it
    pub propagation_delay_ms: u64,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            propagation_delay_ms: 500,
        }
    }
}

/// OpenAI-compatible embeddings endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub api_key: Option<String>,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1/embeddings".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
            api_key: None,
        }
    }
}

/// OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            api_key: None,
            max_tokens: 512,
        }
    }
}

impl SieveConfig {
    /// Load configuration from the default sources plus an optional explicit file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut loaded: SieveConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        loaded.resolve_secrets();
        loaded.validate()?;
        Ok(loaded)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.indexing.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.indexing.chunk_overlap * 2 >= self.indexing.chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                overlap: self.indexing.chunk_overlap,
                size: self.indexing.chunk_size,
            });
        }
        if self.embeddings.dimensions == 0 {
            return Err(ConfigError::ZeroDimensions);
        }
        Ok(())
    }

    /// Expand `${VAR}` references in API keys and `~` in the state dir.
    fn resolve_secrets(&mut self) {
        self.qdrant.api_key = resolve_api_key(&self.qdrant.api_key);
        self.embeddings.api_key = resolve_api_key(&self.embeddings.api_key);
        self.chat.api_key = resolve_api_key(&self.chat.api_key);

        let state_dir = self.indexing.state_dir.to_string_lossy().to_string();
        let expanded = shellexpand::tilde(&state_dir);
        self.indexing.state_dir = PathBuf::from(expanded.as_ref());
    }
}

/// Resolve an optional API key, expanding `${ENV_VAR}` references.
///
/// Unset variables and empty strings resolve to `None`.
pub fn resolve_api_key(api_key: &Option<String>) -> Option<String> {
    let key = api_key.as_deref()?.trim();
    if key.is_empty() {
        return None;
    }
    match shellexpand::env(key) {
        Ok(expanded) if !expanded.is_empty() => Some(expanded.into_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = SieveConfig::default();
        assert_eq!(config.indexing.batch_size, 20);
        assert_eq!(config.indexing.priority_threshold, 5);
        assert_eq!(config.indexing.max_file_size, 1024 * 1024);
        assert_eq!(config.indexing.chunk_size, 3000);
        assert_eq!(config.indexing.chunk_overlap, 500);
        assert_eq!(config.search.lexical_limit, 20);
        assert_eq!(config.search.expansion_retries, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = SieveConfig::default();
        config.indexing.batch_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroBatchSize));
    }

    #[test]
    fn test_validate_rejects_large_overlap() {
        let mut config = SieveConfig::default();
        config.indexing.chunk_overlap = 3000;
        assert_eq!(
            config.validate(),
            Err(ConfigError::OverlapTooLarge {
                overlap: 3000,
                size: 3000
            })
        );

        config.indexing.chunk_overlap = 1500;
        assert_eq!(
            config.validate(),
            Err(ConfigError::OverlapTooLarge {
                overlap: 1500,
                size: 3000
            })
        );

        config.indexing.chunk_overlap = 1499;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(
            &path,
            "[indexing]\nbatch_size = 7\n\n[search]\nmax_results = 5\n",
        )
        .unwrap();

        let config = SieveConfig::load(Some(&path)).unwrap();
        assert_eq!(config.indexing.batch_size, 7);
        assert_eq!(config.search.max_results, 5);
        // Untouched sections keep their defaults
        assert_eq!(config.indexing.chunk_size, 3000);
        assert_eq!(config.qdrant.url, "http://localhost:6334");
    }

    #[test]
    fn test_resolve_api_key() {
        std::env::set_var("SIEVE_TEST_KEY_RESOLVE", "secret");
        assert_eq!(
            resolve_api_key(&Some("${SIEVE_TEST_KEY_RESOLVE}".to_string())),
            Some("secret".to_string())
        );
        assert_eq!(
            resolve_api_key(&Some("plain".to_string())),
            Some("plain".to_string())
        );
        assert_eq!(resolve_api_key(&Some("  ".to_string())), None);
        assert_eq!(resolve_api_key(&None), None);
        assert_eq!(
            resolve_api_key(&Some("${SIEVE_TEST_KEY_NOT_SET_ANYWHERE}".to_string())),
            None
        );
    }

    #[test]
    fn test_config_serializes() {
        let json = serde_json::to_string(&SieveConfig::default()).unwrap();
        assert!(json.contains("\"batch_size\":20"));
    }
}
