//! Trial matching service.
//!
//! Provides the single entry point used by outer layers:
//! - Lazy-loads the corpus, the representer and the corpus vectors
//! - Coordinates query representation and ranking
//! - Maps ranked indices back to trial records
//!
//! Initialization runs at most once per service, even when the first calls
//! arrive concurrently. After that all state is read-only and queries take no
//! locks.

use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::cache::{CacheKey, VectorCache};
use crate::config::{ConfigError, MatchConfig};
use crate::corpus::{text_or_empty, CorpusSource, CorpusStats, CorpusStore, CsvCorpusSource, TrialRecord};
use crate::errors::MatchError;
use crate::ranker::SimilarityRanker;
use crate::representer::{RepresenterFactory, StrategyFactory, Vector, VectorRepresenter};

/// Per-request overrides of the configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MatchOptions {
    pub top_k: Option<usize>,
    /// NaN is treated as unset
    pub min_score: Option<f32>,
}

/// Display fields of one trial.
///
/// Missing values are empty strings. Extended fields are left out of the JSON
/// output when empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialView {
    pub id: String,
    pub title: String,
    pub condition: String,
    pub summary: String,
    pub inclusion_criteria: String,
    pub exclusion_criteria: String,
    pub country: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub phase: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub enrollment: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub contact_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub contact_role: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub contact_phone: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub contact_email: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub lead_sponsor: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sponsor_type: String,
}

impl From<&TrialRecord> for TrialView {
    fn from(record: &TrialRecord) -> Self {
        let fields = record.fields();
        Self {
            id: record.id().to_string(),
            title: record.title().to_string(),
            condition: record.condition().to_string(),
            summary: record.summary().to_string(),
            inclusion_criteria: record.inclusion_criteria().to_string(),
            exclusion_criteria: record.exclusion_criteria().to_string(),
            country: record.country().to_string(),
            status: text_or_empty(&fields.status).to_string(),
            phase: text_or_empty(&fields.phase).to_string(),
            enrollment: text_or_empty(&fields.enrollment).to_string(),
            contact_name: text_or_empty(&fields.contact_name).to_string(),
            contact_role: text_or_empty(&fields.contact_role).to_string(),
            contact_phone: text_or_empty(&fields.contact_phone).to_string(),
            contact_email: text_or_empty(&fields.contact_email).to_string(),
            lead_sponsor: text_or_empty(&fields.lead_sponsor).to_string(),
            sponsor_type: text_or_empty(&fields.sponsor_type).to_string(),
        }
    }
}

/// One ranked output item. A snapshot; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    #[serde(flatten)]
    pub trial: TrialView,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResponse {
    pub matches: Vec<MatchResult>,
    pub total_found: usize,
}

/// Lazy-loaded matching components.
struct Engine {
    representer: Arc<dyn VectorRepresenter>,
    /// `vectors[i]` represents `corpus.get(i)`
    vectors: Vec<Vector>,
    ranker: SimilarityRanker,
}

/// Service for matching patient descriptions against the trial corpus.
///
/// Construct once per process and share it; it is `Send + Sync`.
pub struct MatchService {
    config: MatchConfig,
    source: Arc<dyn CorpusSource>,
    factory: Arc<dyn RepresenterFactory>,
    corpus: OnceCell<CorpusStore>,
    engine: OnceCell<Engine>,
}

impl MatchService {
    /// Create a service in the uninitialized state.
    ///
    /// Nothing is loaded until the first request or [`initialize`](Self::initialize).
    pub fn new(
        config: MatchConfig,
        source: Arc<dyn CorpusSource>,
        factory: Arc<dyn RepresenterFactory>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            factory,
            corpus: OnceCell::new(),
            engine: OnceCell::new(),
        })
    }

    /// CSV corpus at `config.corpus_path`, strategy picked by `config.strategy`.
    pub fn from_config(config: MatchConfig) -> Result<Self, ConfigError> {
        let source = Arc::new(CsvCorpusSource::new(config.corpus_path.clone()));
        let factory = Arc::new(StrategyFactory::new(config.clone()));
        Self::new(config, source, factory)
    }

    /// Match with the configured `top_k` and threshold.
    pub fn match_trials(&self, description: &str) -> Result<MatchResponse, MatchError> {
        self.match_with(description, MatchOptions::default())
    }

    /// Match a free-text patient description against the corpus.
    ///
    /// # Returns
    /// Results in ranked order: score descending, corpus order on ties.
    /// An empty corpus or a threshold nothing reaches yields no matches, not an error.
    pub fn match_with(
        &self,
        description: &str,
        options: MatchOptions,
    ) -> Result<MatchResponse, MatchError> {
        if description.trim().is_empty() {
            return Err(MatchError::EmptyQuery);
        }

        let engine = self.engine()?;
        let corpus = self.corpus()?;

        let query = engine.representer.represent_one(description)?;

        let top_k = options.top_k.unwrap_or(self.config.top_k);
        let min_score = options
            .min_score
            .filter(|score| !score.is_nan())
            .or(self.config.similarity_threshold);

        let ranked = engine
            .ranker
            .rank(&query, &engine.vectors, top_k, min_score)
            .map_err(|e| MatchError::Integrity(e.to_string()))?;

        let matches = ranked
            .into_iter()
            .map(|ranked| {
                corpus
                    .get(ranked.index)
                    .map(|record| MatchResult {
                        trial: TrialView::from(record),
                        score: ranked.score,
                    })
                    .ok_or_else(|| {
                        MatchError::Integrity(format!(
                            "ranked index {} outside corpus of {}",
                            ranked.index,
                            corpus.len()
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!("Matched description against {} trials: {} results", corpus.len(), matches.len());

        Ok(MatchResponse {
            total_found: matches.len(),
            matches,
        })
    }

    /// Look up a trial by identifier. Loads the corpus but not the representer.
    pub fn trial(&self, id: &str) -> Result<Option<TrialRecord>, MatchError> {
        Ok(self.corpus()?.find_by_id(id.trim()).cloned())
    }

    /// Summary counts over the corpus. Loads the corpus but not the representer.
    pub fn stats(&self) -> Result<CorpusStats, MatchError> {
        Ok(self.corpus()?.stats())
    }

    /// Force initialization of the service.
    ///
    /// Normally initialization happens lazily on the first match.
    /// A failed attempt leaves the service uninitialized; the next call retries.
    pub fn initialize(&self) -> Result<(), MatchError> {
        self.engine().map(|_| ())
    }

    /// Whether corpus, representer and vectors are all loaded.
    pub fn is_initialized(&self) -> bool {
        self.engine.get().is_some()
    }

    fn corpus(&self) -> Result<&CorpusStore, MatchError> {
        self.corpus.get_or_try_init(|| {
            log::info!("Loading trial corpus from {}", self.source.describe());
            Ok(self.source.load()?)
        })
    }

    fn engine(&self) -> Result<&Engine, MatchError> {
        self.engine.get_or_try_init(|| self.build_engine())
    }

    fn build_engine(&self) -> Result<Engine, MatchError> {
        let now = Instant::now();
        let corpus = self.corpus()?;

        let representer = self.factory.build(corpus)?;
        let vectors = self.corpus_vectors(corpus, representer.as_ref())?;

        if vectors.len() != corpus.len() {
            return Err(MatchError::Integrity(format!(
                "{} corpus vectors for {} trials",
                vectors.len(),
                corpus.len()
            )));
        }

        log::info!(
            "Match engine ready: {} trials, {} dimensions ({}) in {}ms",
            corpus.len(),
            representer.dimension(),
            representer.identity(),
            now.elapsed().as_millis()
        );

        Ok(Engine {
            ranker: SimilarityRanker::new(representer.metric()),
            representer,
            vectors,
        })
    }

    /// Corpus vectors from the cache when it matches, otherwise recomputed
    /// and written back.
    fn corpus_vectors(
        &self,
        corpus: &CorpusStore,
        representer: &dyn VectorRepresenter,
    ) -> Result<Vec<Vector>, MatchError> {
        let Some(cache_dir) = &self.config.cache_dir else {
            return compute_vectors(corpus, representer);
        };

        let cache = VectorCache::new(cache_dir.clone());
        let key = CacheKey::new(&representer.identity(), corpus.fingerprint());
        let path = cache.path_for(&key);

        match cache.load(&key, representer.dimension(), corpus.len()) {
            Ok(Some(vectors)) => {
                log::info!("Loaded {} corpus vectors from {}", vectors.len(), path.display());
                return Ok(vectors);
            }
            Ok(None) => log::info!("No cached corpus vectors at {}", path.display()),
            Err(e) => log::warn!("Discarding corpus vector cache at {}: {}", path.display(), e),
        }

        let vectors = compute_vectors(corpus, representer)?;

        match cache.save(&key, representer.dimension(), &vectors) {
            Ok(()) => log::info!("Saved {} corpus vectors to {}", vectors.len(), path.display()),
            Err(e) => log::warn!("Failed to save corpus vectors to {}: {}", path.display(), e),
        }

        Ok(vectors)
    }
}

fn compute_vectors(
    corpus: &CorpusStore,
    representer: &dyn VectorRepresenter,
) -> Result<Vec<Vector>, MatchError> {
    let now = Instant::now();
    let vectors = representer.represent_batch(&corpus.searchable_texts())?;

    log::info!(
        "Computed {} corpus vectors in {}ms",
        vectors.len(),
        now.elapsed().as_millis()
    );

    Ok(vectors)
}
