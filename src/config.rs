use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ranker::SimilarityMetric;
use crate::representer::DEFAULT_BATCH_SIZE;

/// Default dense embedding model
const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
/// Default number of results per query
const DEFAULT_TOP_K: usize = 5;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
/// Default corpus location
const DEFAULT_CORPUS_PATH: &str = "trials.csv";

const DEFAULT_TFIDF_MAX_FEATURES: usize = 5000;
const DEFAULT_TFIDF_NGRAM_MAX: usize = 2;
const DEFAULT_TFIDF_MAX_DF: f32 = 0.95;
const DEFAULT_TFIDF_MIN_DF: usize = 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config is malformed: {0}")]
    Parse(#[from] serde_yml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which representation strategy the engine uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepresenterStrategy {
    /// Neural sentence embeddings
    #[default]
    Dense,
    /// Sparse TF-IDF features fitted on the corpus
    Tfidf,
    /// Token presence scored by word overlap
    Lexical,
}

impl fmt::Display for RepresenterStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepresenterStrategy::Dense => "dense",
            RepresenterStrategy::Tfidf => "tfidf",
            RepresenterStrategy::Lexical => "lexical",
        };
        f.write_str(name)
    }
}

/// TF-IDF vocabulary options
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TfIdfConfig {
    /// Vocabulary cap, most frequent terms kept
    #[serde(default = "default_tfidf_max_features")]
    pub max_features: usize,

    /// Largest n-gram length (1 = unigrams only)
    #[serde(default = "default_tfidf_ngram_max")]
    pub ngram_max: usize,

    /// Drop terms present in more than this share of records (0.0, 1.0]
    #[serde(default = "default_tfidf_max_df")]
    pub max_df: f32,

    /// Drop terms present in fewer records than this
    #[serde(default = "default_tfidf_min_df")]
    pub min_df: usize,
}

impl Default for TfIdfConfig {
    fn default() -> Self {
        Self {
            max_features: DEFAULT_TFIDF_MAX_FEATURES,
            ngram_max: DEFAULT_TFIDF_NGRAM_MAX,
            max_df: DEFAULT_TFIDF_MAX_DF,
            min_df: DEFAULT_TFIDF_MIN_DF,
        }
    }
}

fn default_tfidf_max_features() -> usize {
    DEFAULT_TFIDF_MAX_FEATURES
}

fn default_tfidf_ngram_max() -> usize {
    DEFAULT_TFIDF_NGRAM_MAX
}

fn default_tfidf_max_df() -> f32 {
    DEFAULT_TFIDF_MAX_DF
}

fn default_tfidf_min_df() -> usize {
    DEFAULT_TFIDF_MIN_DF
}

/// Engine configuration, fixed at startup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Representation strategy: dense, tfidf or lexical
    #[serde(default)]
    pub strategy: RepresenterStrategy,

    /// Model name for dense embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Number of results to return
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum score to include; unset keeps every top-K entry
    #[serde(default)]
    pub similarity_threshold: Option<f32>,

    /// Text items per representation batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Compute sparse batches concurrently
    #[serde(default = "default_parallel_batches")]
    pub parallel_batches: bool,

    /// Metric for the lexical strategy: overlap or jaccard
    #[serde(default = "default_lexical_metric")]
    pub lexical_metric: SimilarityMetric,

    #[serde(default)]
    pub tfidf: TfIdfConfig,

    /// Trial corpus CSV
    #[serde(default = "default_corpus_path")]
    pub corpus_path: PathBuf,

    /// Directory for persisted corpus vectors and models; unset disables the vector cache
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            strategy: RepresenterStrategy::default(),
            model: DEFAULT_MODEL.to_string(),
            top_k: DEFAULT_TOP_K,
            similarity_threshold: None,
            batch_size: DEFAULT_BATCH_SIZE,
            parallel_batches: true,
            lexical_metric: SimilarityMetric::Overlap,
            tfidf: TfIdfConfig::default(),
            corpus_path: PathBuf::from(DEFAULT_CORPUS_PATH),
            cache_dir: None,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_parallel_batches() -> bool {
    true
}

fn default_lexical_metric() -> SimilarityMetric {
    SimilarityMetric::Overlap
}

fn default_corpus_path() -> PathBuf {
    PathBuf::from(DEFAULT_CORPUS_PATH)
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

impl MatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if let Some(threshold) = self.similarity_threshold {
            if !threshold.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "similarity_threshold must be a finite number, got {}",
                    threshold
                )));
            }
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }

        let tfidf = &self.tfidf;
        if !(tfidf.max_df > 0.0 && tfidf.max_df <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "tfidf.max_df must be in (0.0, 1.0], got {}",
                tfidf.max_df
            )));
        }
        if tfidf.ngram_max == 0 {
            return Err(ConfigError::Invalid(
                "tfidf.ngram_max must be at least 1".to_string(),
            ));
        }
        if tfidf.max_features == 0 {
            return Err(ConfigError::Invalid(
                "tfidf.max_features must be greater than 0".to_string(),
            ));
        }

        if self.download_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "download_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Parse and validate YAML.
    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, writing the defaults there first if the file is missing.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        // create new if does not exist
        if !path.exists() {
            log::info!("Writing default config to {}", path.display());
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
            let defaults = serde_yml::to_string(&Self::default())?;
            std::fs::write(path, defaults).map_err(io_err)?;
        }

        let config_str = std::fs::read_to_string(path).map_err(io_err)?;
        Self::from_yaml(&config_str)
    }
}
