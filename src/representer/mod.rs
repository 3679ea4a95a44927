//! Text to vector representation.
//!
//! Three interchangeable strategies sit behind [`VectorRepresenter`]:
//!
//! - `embeddings`: dense sentence embeddings via fastembed
//! - `tfidf`: sparse TF-IDF features fitted on the corpus
//! - `lexical`: sparse token-presence vectors for overlap scoring
//!
//! Inputs are processed in fixed-size batches. Batching only bounds peak
//! memory; outputs are reassembled in input order and are identical to an
//! unbatched call.

#[cfg(feature = "dense")]
pub mod embeddings;
pub mod lexical;
pub mod tfidf;
pub mod tokenize;

#[cfg(feature = "dense")]
use std::path::PathBuf;
use std::sync::Arc;
#[cfg(feature = "dense")]
use std::time::Duration;

use rayon::prelude::*;

use crate::config::{MatchConfig, RepresenterStrategy};
use crate::corpus::CorpusStore;
use crate::ranker::SimilarityMetric;

#[cfg(feature = "dense")]
pub use embeddings::EmbeddingModel;
pub use lexical::LexicalRepresenter;
pub use tfidf::TfIdfVectorizer;

/// Default number of texts per representation batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Errors raised while turning text into vectors.
#[derive(Debug, thiserror::Error)]
pub enum RepresentationError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Model download timed out after {0} seconds")]
    DownloadTimeout(u64),

    #[error("Strategy '{0}' is not available in this build")]
    Unavailable(String),

    #[error("Representer returned {got} vectors for {expected} texts")]
    CountMismatch { expected: usize, got: usize },

    #[error("Representer produced a {got}-dimensional vector, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl RepresentationError {
    /// Whether the error signals vectors that cannot be trusted, as opposed
    /// to a backend that is unavailable.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::CountMismatch { .. } | Self::DimensionMismatch { .. }
        )
    }
}

/// Storage layout of a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorKind {
    Dense,
    Sparse,
}

/// A fixed-dimension numeric representation of one text.
#[derive(Debug, Clone, PartialEq)]
pub enum Vector {
    Dense(Vec<f32>),
    Sparse(SparseVector),
}

impl Vector {
    pub fn dimension(&self) -> usize {
        match self {
            Vector::Dense(values) => values.len(),
            Vector::Sparse(sparse) => sparse.dimension(),
        }
    }

    pub fn kind(&self) -> VectorKind {
        match self {
            Vector::Dense(_) => VectorKind::Dense,
            Vector::Sparse(_) => VectorKind::Sparse,
        }
    }
}

/// Sparse vector with strictly increasing indices and non-zero values.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseVector {
    dimension: usize,
    indices: Vec<u32>,
    values: Vec<f32>,
}

impl SparseVector {
    /// Build from unordered entries. Duplicate indices are summed; zeros and
    /// out-of-range indices are dropped.
    pub fn from_entries(dimension: usize, entries: impl IntoIterator<Item = (u32, f32)>) -> Self {
        let mut entries: Vec<(u32, f32)> = entries
            .into_iter()
            .filter(|(idx, _)| (*idx as usize) < dimension)
            .collect();
        entries.sort_by_key(|(idx, _)| *idx);

        let mut indices: Vec<u32> = Vec::with_capacity(entries.len());
        let mut values: Vec<f32> = Vec::with_capacity(entries.len());
        for (idx, value) in entries {
            match indices.last() {
                Some(&last) if last == idx => {
                    if let Some(v) = values.last_mut() {
                        *v += value;
                    }
                }
                _ => {
                    indices.push(idx);
                    values.push(value);
                }
            }
        }

        let (indices, values): (Vec<u32>, Vec<f32>) = indices
            .into_iter()
            .zip(values)
            .filter(|(_, value)| *value != 0.0)
            .unzip();

        Self {
            dimension,
            indices,
            values,
        }
    }

    /// Build from already-ordered parts, as read back from the vector cache.
    ///
    /// Returns `None` unless indices are strictly increasing and in range.
    pub fn from_parts(dimension: usize, indices: Vec<u32>, values: Vec<f32>) -> Option<Self> {
        if indices.len() != values.len() {
            return None;
        }
        let ordered = indices.windows(2).all(|w| w[0] < w[1]);
        let in_range = indices.last().map_or(true, |&last| (last as usize) < dimension);
        if !ordered || !in_range {
            return None;
        }

        Some(Self {
            dimension,
            indices,
            values,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Scale values to unit L2 norm. Zero vectors are left untouched.
    pub fn l2_normalize(&mut self) {
        let norm = self.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut self.values {
                *value /= norm;
            }
        }
    }
}

/// Maps text to fixed-dimension vectors.
///
/// Implementations only provide [`represent_chunk`](Self::represent_chunk);
/// batching, ordering and consistency checks come from the provided methods.
pub trait VectorRepresenter: Send + Sync {
    /// Stable description of the configuration. Two representers with the same
    /// identity and the same corpus produce identical vectors.
    fn identity(&self) -> String;

    /// Vector length, constant for the lifetime of the instance.
    fn dimension(&self) -> usize;

    /// Similarity function suited to this vector space.
    fn metric(&self) -> SimilarityMetric;

    fn batch_size(&self) -> usize {
        DEFAULT_BATCH_SIZE
    }

    /// Whether batches may be computed concurrently on the rayon pool.
    fn parallel_batches(&self) -> bool {
        false
    }

    /// Represent a single batch.
    fn represent_chunk(&self, texts: &[String]) -> Result<Vec<Vector>, RepresentationError>;

    /// Represent any number of texts, `batch_size` at a time, in input order.
    fn represent_batch(&self, texts: &[String]) -> Result<Vec<Vector>, RepresentationError> {
        represent_in_batches(self, texts)
    }

    /// Same as `represent_batch(&[text])[0]`.
    fn represent_one(&self, text: &str) -> Result<Vector, RepresentationError> {
        self.represent_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or(RepresentationError::CountMismatch {
                expected: 1,
                got: 0,
            })
    }
}

/// Split `texts` into batches, represent each, and reassemble in input order.
///
/// Every batch must return one vector per text with the representer's
/// dimension.
pub fn represent_in_batches<R>(representer: &R, texts: &[String]) -> Result<Vec<Vector>, RepresentationError>
where
    R: VectorRepresenter + ?Sized,
{
    if texts.is_empty() {
        return Ok(vec![]);
    }

    let batch_size = representer.batch_size().max(1);
    let run = |chunk: &[String]| -> Result<Vec<Vector>, RepresentationError> {
        let vectors = representer.represent_chunk(chunk)?;
        check_chunk(representer.dimension(), chunk.len(), &vectors)?;
        Ok(vectors)
    };

    let batches: Vec<Vec<Vector>> = if representer.parallel_batches() {
        texts.par_chunks(batch_size).map(run).collect::<Result<_, _>>()?
    } else {
        texts.chunks(batch_size).map(run).collect::<Result<_, _>>()?
    };

    Ok(batches.into_iter().flatten().collect())
}

fn check_chunk(dimension: usize, expected: usize, vectors: &[Vector]) -> Result<(), RepresentationError> {
    if vectors.len() != expected {
        return Err(RepresentationError::CountMismatch {
            expected,
            got: vectors.len(),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.dimension() != dimension) {
        return Err(RepresentationError::DimensionMismatch {
            expected: dimension,
            got: bad.dimension(),
        });
    }
    Ok(())
}

/// Builds the representer once the corpus is available.
///
/// Sparse strategies fit their vocabulary on the corpus, so construction is
/// deferred until the corpus has been loaded.
pub trait RepresenterFactory: Send + Sync {
    fn build(&self, corpus: &CorpusStore) -> Result<Arc<dyn VectorRepresenter>, RepresentationError>;
}

/// Picks the strategy named in the configuration.
#[derive(Debug, Clone)]
pub struct StrategyFactory {
    config: MatchConfig,
}

impl StrategyFactory {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    #[cfg(feature = "dense")]
    fn build_dense(&self) -> Result<Arc<dyn VectorRepresenter>, RepresentationError> {
        let timeout = Duration::from_secs(self.config.download_timeout_secs);
        let model = EmbeddingModel::new(
            &self.config.model,
            self.model_dir(),
            Some(timeout),
            self.config.batch_size,
        )?;
        Ok(Arc::new(model))
    }

    #[cfg(not(feature = "dense"))]
    fn build_dense(&self) -> Result<Arc<dyn VectorRepresenter>, RepresentationError> {
        Err(RepresentationError::Unavailable("dense".to_string()))
    }

    /// Models live under `<cache_dir>/models`, or a local directory when no
    /// cache is configured.
    #[cfg(feature = "dense")]
    fn model_dir(&self) -> PathBuf {
        self.config
            .cache_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".trialmatch"))
            .join("models")
    }
}

impl RepresenterFactory for StrategyFactory {
    fn build(&self, corpus: &CorpusStore) -> Result<Arc<dyn VectorRepresenter>, RepresentationError> {
        log::info!("Building '{}' representer", self.config.strategy);

        match self.config.strategy {
            RepresenterStrategy::Dense => self.build_dense(),
            RepresenterStrategy::Tfidf => {
                let texts = corpus.searchable_texts();
                let vectorizer = TfIdfVectorizer::fit(
                    &texts,
                    self.config.tfidf.clone(),
                    self.config.batch_size,
                    self.config.parallel_batches,
                )?;
                Ok(Arc::new(vectorizer))
            }
            RepresenterStrategy::Lexical => {
                let texts = corpus.searchable_texts();
                Ok(Arc::new(LexicalRepresenter::fit(
                    &texts,
                    self.config.lexical_metric,
                    self.config.batch_size,
                    self.config.parallel_batches,
                )))
            }
        }
    }
}
