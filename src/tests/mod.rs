
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::{MatchConfig, RepresenterStrategy};
use crate::corpus::{CorpusLoadError, CorpusSource, CorpusStore, InMemoryCorpusSource, TrialFields};
use crate::ranker::SimilarityMetric;
use crate::representer::{RepresentationError, RepresenterFactory, StrategyFactory, Vector, VectorRepresenter};
use crate::service::MatchService;

pub(crate) fn trial(id: &str, title: &str) -> TrialFields {
    TrialFields {
        id: Some(id.to_string()),
        title: Some(title.to_string()),
        ..Default::default()
    }
}

pub(crate) fn lexical_config() -> MatchConfig {
    MatchConfig {
        strategy: RepresenterStrategy::Lexical,
        lexical_metric: SimilarityMetric::Overlap,
        ..Default::default()
    }
}

/// Lexical service over in-memory trials, no vector cache.
pub(crate) fn lexical_service(trials: Vec<TrialFields>) -> MatchService {
    let config = lexical_config();
    MatchService::new(
        config.clone(),
        Arc::new(InMemoryCorpusSource::new(trials)),
        Arc::new(StrategyFactory::new(config)),
    )
    .unwrap()
}

/// Fails the first `failures` loads, then serves the wrapped trials.
pub(crate) struct FlakySource {
    failures: AtomicUsize,
    pub loads: AtomicUsize,
    inner: InMemoryCorpusSource,
}

impl FlakySource {
    pub fn new(failures: usize, trials: Vec<TrialFields>) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            loads: AtomicUsize::new(0),
            inner: InMemoryCorpusSource::new(trials),
        }
    }
}

impl CorpusSource for FlakySource {
    fn describe(&self) -> String {
        "flaky".to_string()
    }

    fn load(&self) -> Result<CorpusStore, CorpusLoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(CorpusLoadError::Open {
                path: "unreachable.csv".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            });
        }
        self.inner.load()
    }
}

/// Deterministic dense representer: hashes each `\w+` token into a bucket.
///
/// Identity ignores the dimension, so two instances with different
/// dimensions address the same cache entry.
pub(crate) struct BucketRepresenter {
    dimension: usize,
    /// Total texts represented so far
    pub represented: Arc<AtomicUsize>,
}

impl BucketRepresenter {
    pub fn new(dimension: usize, represented: Arc<AtomicUsize>) -> Self {
        Self {
            dimension,
            represented,
        }
    }
}

impl VectorRepresenter for BucketRepresenter {
    fn identity(&self) -> String {
        "bucket:v1".to_string()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> SimilarityMetric {
        SimilarityMetric::Cosine
    }

    fn represent_chunk(&self, texts: &[String]) -> Result<Vec<Vector>, RepresentationError> {
        self.represented.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let mut values = vec![0.0f32; self.dimension];
                for token in text.split_whitespace() {
                    let bucket = token
                        .to_lowercase()
                        .bytes()
                        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
                    values[bucket % self.dimension] += 1.0;
                }
                Vector::Dense(values)
            })
            .collect())
    }
}

/// Hands out a fresh [`BucketRepresenter`] and counts builds.
pub(crate) struct BucketFactory {
    dimension: usize,
    pub represented: Arc<AtomicUsize>,
    pub builds: AtomicUsize,
    slow: AtomicBool,
}

impl BucketFactory {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            represented: Arc::new(AtomicUsize::new(0)),
            builds: AtomicUsize::new(0),
            slow: AtomicBool::new(false),
        }
    }

    /// Make every build take a while, widening the window for racing callers.
    pub fn slow(self) -> Self {
        self.slow.store(true, Ordering::SeqCst);
        self
    }
}

impl RepresenterFactory for BucketFactory {
    fn build(&self, _corpus: &CorpusStore) -> Result<Arc<dyn VectorRepresenter>, RepresentationError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.slow.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        Ok(Arc::new(BucketRepresenter::new(
            self.dimension,
            self.represented.clone(),
        )))
    }
}
