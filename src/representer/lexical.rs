//! Token-presence vectors for word-overlap scoring.
//!
//! Each text becomes the set of its lower-cased `\w+` tokens, encoded as a
//! 0/1 sparse vector over the corpus vocabulary. The last index counts query
//! tokens the corpus has never seen, so an overlap score keeps the full query
//! token count in its denominator: `shared / unique query tokens`.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::ranker::SimilarityMetric;
use crate::representer::tokenize::word_tokens;
use crate::representer::{RepresentationError, SparseVector, Vector, VectorRepresenter};

/// Presence-vector representer fitted on the corpus vocabulary.
pub struct LexicalRepresenter {
    vocabulary: HashMap<String, u32>,
    metric: SimilarityMetric,
    batch_size: usize,
    parallel: bool,
}

impl LexicalRepresenter {
    pub fn fit(texts: &[String], metric: SimilarityMetric, batch_size: usize, parallel: bool) -> Self {
        let terms: BTreeSet<String> = texts.iter().flat_map(|text| word_tokens(text)).collect();
        let vocabulary: HashMap<String, u32> = terms
            .into_iter()
            .enumerate()
            .map(|(idx, term)| (term, idx as u32))
            .collect();

        log::debug!("Fitted lexical vocabulary of {} tokens", vocabulary.len());

        Self {
            vocabulary,
            metric,
            batch_size,
            parallel,
        }
    }

    /// Index reserved for the unseen-token count.
    fn unseen_slot(&self) -> u32 {
        self.vocabulary.len() as u32
    }

    fn transform(&self, text: &str) -> SparseVector {
        let tokens: HashSet<String> = word_tokens(text).into_iter().collect();

        let mut unseen = 0usize;
        let mut entries: Vec<(u32, f32)> = Vec::with_capacity(tokens.len() + 1);
        for token in &tokens {
            match self.vocabulary.get(token) {
                Some(&idx) => entries.push((idx, 1.0)),
                None => unseen += 1,
            }
        }
        if unseen > 0 {
            entries.push((self.unseen_slot(), unseen as f32));
        }

        SparseVector::from_entries(self.dimension(), entries)
    }
}

impl VectorRepresenter for LexicalRepresenter {
    fn identity(&self) -> String {
        format!("lexical:v1:metric={:?}", self.metric).to_lowercase()
    }

    fn dimension(&self) -> usize {
        self.vocabulary.len() + 1
    }

    fn metric(&self) -> SimilarityMetric {
        self.metric
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
