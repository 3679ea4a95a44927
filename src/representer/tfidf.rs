//! Sparse TF-IDF features fitted on the corpus.
//!
//! Vocabulary: uni- to `ngram_max`-grams of stop-word-filtered tokens, pruned
//! by document frequency and capped at `max_features` by corpus frequency.
//! Weights: raw term count times smoothed IDF `ln((1 + n) / (1 + df)) + 1`,
//! then L2-normalized.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::TfIdfConfig;
use crate::ranker::SimilarityMetric;
use crate::representer::tokenize::{feature_tokens, ngrams};
use crate::representer::{RepresentationError, SparseVector, Vector, VectorRepresenter};

/// Fitted TF-IDF vectorizer.
pub struct TfIdfVectorizer {
    vocabulary: HashMap<String, u32>,
    idf: Vec<f32>,
    options: TfIdfConfig,
    batch_size: usize,
    parallel: bool,
}

impl TfIdfVectorizer {
    /// Learn vocabulary and IDF weights from the corpus texts.
    pub fn fit(
        texts: &[String],
        options: TfIdfConfig,
        batch_size: usize,
        parallel: bool,
    ) -> Result<Self, RepresentationError> {
        let n_docs = texts.len();

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut term_freq: HashMap<String, usize> = HashMap::new();
        for text in texts {
            let grams = ngrams(&feature_tokens(text), options.ngram_max);
            let mut seen: HashSet<&str> = HashSet::new();
            for gram in &grams {
                *term_freq.entry(gram.clone()).or_default() += 1;
                if seen.insert(gram.as_str()) {
                    *doc_freq.entry(gram.clone()).or_default() += 1;
                }
            }
        }

        let max_doc_count = ((options.max_df * n_docs as f32).floor() as usize).max(1);
        let mut kept: Vec<(String, usize)> = doc_freq
            .into_iter()
            .filter(|(_, df)| *df >= options.min_df && *df <= max_doc_count)
            .collect();

        if kept.len() > options.max_features {
            kept.sort_by(|(a, _), (b, _)| {
                let fa = term_freq.get(a).copied().unwrap_or(0);
                let fb = term_freq.get(b).copied().unwrap_or(0);
                fb.cmp(&fa).then_with(|| a.cmp(b))
            });
            kept.truncate(options.max_features);
        }

        // Feature indices follow alphabetical term order
        let kept: BTreeMap<String, usize> = kept.into_iter().collect();
        if kept.is_empty() && n_docs > 0 {
            log::warn!("TF-IDF vocabulary is empty after pruning; every score will be 0");
        }

        let mut vocabulary = HashMap::with_capacity(kept.len());
        let mut idf = Vec::with_capacity(kept.len());
        for (idx, (term, df)) in kept.into_iter().enumerate() {
            let idx = u32::try_from(idx).map_err(|_| {
                RepresentationError::InitFailed("TF-IDF vocabulary exceeds u32 range".to_string())
            })?;
            vocabulary.insert(term, idx);
            idf.push(((1.0 + n_docs as f32) / (1.0 + df as f32)).ln() + 1.0);
        }

        log::debug!(
            "Fitted TF-IDF vocabulary of {} terms over {} documents",
            vocabulary.len(),
            n_docs
        );

        Ok(Self {
            vocabulary,
            idf,
            options,
            batch_size,
            parallel,
        })
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    fn transform(&self, text: &str) -> SparseVector {
        let mut counts: HashMap<u32, u32> = HashMap::new();
        for gram in ngrams(&feature_tokens(text), self.options.ngram_max) {
            if let Some(&idx) = self.vocabulary.get(&gram) {
                *counts.entry(idx).or_default() += 1;
            }
        }

        let mut vector = SparseVector::from_entries(
            self.dimension(),
            counts
                .into_iter()
                .map(|(idx, count)| (idx, count as f32 * self.idf[idx as usize])),
        );
        vector.l2_normalize();
        vector
    }
}

impl VectorRepresenter for TfIdfVectorizer {
    fn identity(&self) -> String {
        format!(
            "tfidf:v1:max_features={};ngram_max={};max_df={};min_df={}",
            self.options.max_features, self.options.ngram_max, self.options.max_df, self.options.min_df
        )
    }

    fn dimension(&self) -> usize {
        self.idf.len()
    }

    fn metric(&self) -> SimilarityMetric {
        SimilarityMetric::Cosine
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn parallel_batches(&self) -> bool {
        self.parallel
    }

    fn represent_chunk(&self, texts: &[String]) -> Result<Vec<Vector>, RepresentationError> {
        Ok(texts
            .iter()
            .map(|text| Vector::Sparse(self.transform(text)))
            .collect())
    }
}
