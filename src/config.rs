use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::FeedMapping;
use crate::search::{IntentTaxonomy, TaxonomyEntry};
use crate::semantic::{DEFAULT_MODEL, DEFAULT_THRESHOLD};

const CONFIG_FILE: &str = "config.yaml";

/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_BATCH_SIZE: usize = 100;
const MAX_BATCH_SIZE: usize = 1000;
const DEFAULT_FEED: &str = "awin";
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
const DEFAULT_TOP_K: usize = 3;
const DEFAULT_MIN_QUERY_CHARS: usize = 3;

/// Embedding model settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SemanticConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_semantic_model")]
    pub model: String,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

fn default_semantic_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Products per index upsert call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Feed mapping used when none is given on the command line
    #[serde(default = "default_feed")]
    pub default_feed: String,

    /// Retries of a failed upsert before the run aborts; 0 disables retrying
    #[serde(default)]
    pub upsert_max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub upsert_retry_base_delay_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            default_feed: DEFAULT_FEED.to_string(),
            upsert_max_retries: 0,
            upsert_retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_feed() -> String {
    DEFAULT_FEED.to_string()
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Nearest neighbours requested from the index
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum similarity score [0.0, 1.0] for a match to be returned
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Queries with fewer non-whitespace characters return no matches
    #[serde(default = "default_min_query_chars")]
    pub min_query_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            threshold: DEFAULT_THRESHOLD,
            min_query_chars: DEFAULT_MIN_QUERY_CHARS,
        }
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_min_query_chars() -> usize {
    DEFAULT_MIN_QUERY_CHARS
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub semantic: SemanticConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub search: SearchConfig,

    /// Feed name -> {source column: canonical field}
    #[serde(default = "FeedMapping::builtin")]
    pub feeds: BTreeMap<String, FeedMapping>,

    /// Replaces the built-in intent taxonomy when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_taxonomy: Option<Vec<TaxonomyEntry>>,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            semantic: SemanticConfig::default(),
            ingest: IngestConfig::default(),
            search: SearchConfig::default(),
            feeds: FeedMapping::builtin(),
            intent_taxonomy: None,
            base_path: PathBuf::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let threshold = self.search.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            bail!("search.threshold must be between 0.0 and 1.0, got {threshold}");
        }

        if self.search.top_k == 0 {
            bail!("search.top_k must be greater than 0");
        }

        let batch_size = self.ingest.batch_size;
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            bail!("ingest.batch_size must be between 1 and {MAX_BATCH_SIZE}, got {batch_size}");
        }

        if self.semantic.download_timeout_secs == 0 {
            bail!("semantic.download_timeout_secs must be greater than 0");
        }

        for (name, mapping) in &self.feeds {
            mapping
                .validate()
                .with_context(|| format!("feeds.{name} is invalid"))?;
        }

        if !self.feeds.contains_key(&self.ingest.default_feed) {
            bail!(
                "ingest.default_feed '{}' is not a configured feed",
                self.ingest.default_feed
            );
        }

        if let Some(entries) = &self.intent_taxonomy {
            for (idx, entry) in entries.iter().enumerate() {
                if entry.keyword.trim().is_empty() {
                    bail!("intent_taxonomy #{} has an empty keyword", idx + 1);
                }
            }
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing defaults if it is missing.
    pub fn load_with(base_path: &Path) -> Result<Self> {
        let path = base_path.join(CONFIG_FILE);

        if !path.exists() {
            std::fs::create_dir_all(base_path)
                .with_context(|| format!("Failed to create {}", base_path.display()))?;
            std::fs::write(&path, serde_yml::to_string(&Self::default())?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("{} is malformed", path.display()))?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = self.base_path.join(CONFIG_FILE);
        std::fs::write(&path, serde_yml::to_string(&self)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Mapping table for a named feed.
    pub fn feed(&self, name: &str) -> Result<FeedMapping> {
        self.feeds
            .get(name)
            .cloned()
            .ok_or_else(|| crate::catalog::MappingError::UnknownFeed(name.to_string()).into())
    }

    /// Configured taxonomy, or the built-in one.
    pub fn taxonomy(&self) -> IntentTaxonomy {
        match &self.intent_taxonomy {
            Some(entries) => IntentTaxonomy::new(entries.iter().cloned()),
            None => IntentTaxonomy::builtin().clone(),
        }
    }
}
