//! Similarity scoring and top-K selection over the corpus vectors.
//!
//! Scores are sanitized before ordering, ties are broken by ascending corpus
//! index, and the minimum-score filter only ever removes entries from the
//! already selected top-K.

use std::cmp::Ordering;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::representer::{SparseVector, Vector};

/// Pairwise similarity function used by the ranker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    /// Dot product over the product of L2 norms.
    #[default]
    Cosine,
    /// Weighted overlap coefficient: sum(min(q, d)) / sum(q).
    /// On presence vectors this is shared query tokens / query tokens.
    Overlap,
    /// Weighted Jaccard: sum(min(q, d)) / sum(max(q, d)).
    Jaccard,
}

/// One ranked entry: corpus index and its sanitized score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedMatch {
    pub index: usize,
    pub score: f32,
}

/// Errors raised when vectors from different spaces are compared.
#[derive(Debug, thiserror::Error)]
pub enum RankError {
    #[error("Dimension mismatch: query has {expected}, corpus vector has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot compare dense and sparse vectors")]
    KindMismatch,
}

/// Scores a query against every corpus vector and keeps the best K.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarityRanker {
    metric: SimilarityMetric,
}

impl SimilarityRanker {
    pub fn new(metric: SimilarityMetric) -> Self {
        Self { metric }
    }

    /// Rank `corpus` against `query`.
    ///
    /// # Arguments
    /// * `query` - The query vector
    /// * `corpus` - Corpus vectors in corpus order
    /// * `top_k` - Maximum number of results
    /// * `min_score` - Entries scoring strictly below this are dropped after truncation
    ///
    /// # Returns
    /// At most `min(top_k, corpus.len())` entries, score descending then index ascending.
    pub fn rank(
        &self,
        query: &Vector,
        corpus: &[Vector],
        top_k: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<RankedMatch>, RankError> {
        if top_k == 0 || corpus.is_empty() {
            return Ok(vec![]);
        }

        let mut ranked: Vec<RankedMatch> = corpus
            .par_iter()
            .enumerate()
            .map(|(index, target)| {
                self.score(query, target).map(|raw| RankedMatch {
                    index,
                    score: sanitize_score(raw),
                })
            })
            .collect::<Result<_, _>>()?;

        if top_k < ranked.len() {
            ranked.select_nth_unstable_by(top_k - 1, rank_order);
            ranked.truncate(top_k);
        }
        ranked.sort_by(rank_order);

        if let Some(min_score) = min_score {
            ranked.retain(|m| m.score >= min_score);
        }

        Ok(ranked)
    }

    /// Raw similarity between two vectors. May be NaN or infinite.
    pub fn score(&self, query: &Vector, target: &Vector) -> Result<f32, RankError> {
        if query.dimension() != target.dimension() {
            return Err(RankError::DimensionMismatch {
                expected: query.dimension(),
                got: target.dimension(),
            });
        }

        let stats = match (query, target) {
            (Vector::Dense(q), Vector::Dense(t)) => PairStats::dense(q, t),
            (Vector::Sparse(q), Vector::Sparse(t)) => PairStats::sparse(q, t),
            _ => return Err(RankError::KindMismatch),
        };

        Ok(match self.metric {
            SimilarityMetric::Cosine => stats.dot / (stats.query_sq.sqrt() * stats.target_sq.sqrt()),
            SimilarityMetric::Overlap => stats.min_sum / stats.query_sum,
            SimilarityMetric::Jaccard => {
                stats.min_sum / (stats.query_sum + stats.target_sum - stats.min_sum)
            }
        })
    }
}

/// Map degenerate scores onto the finite range.
///
/// NaN becomes 0.0, positive infinity 1.0, negative infinity 0.0.
/// Negative zero is folded into zero so it ties with 0.0.
pub fn sanitize_score(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else if score == f32::INFINITY {
        1.0
    } else if score == f32::NEG_INFINITY {
        0.0
    } else if score == 0.0 {
        0.0
    } else {
        score
    }
}

/// Score descending, then corpus index ascending. Total over sanitized scores.
fn rank_order(a: &RankedMatch, b: &RankedMatch) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.index.cmp(&b.index))
}

/// Accumulated sums for one query/target pair.
#[derive(Debug, Default)]
struct PairStats {
    dot: f32,
    query_sq: f32,
    target_sq: f32,
    min_sum: f32,
    query_sum: f32,
    target_sum: f32,
}

impl PairStats {
    fn add(&mut self, q: f32, t: f32) {
        self.dot += q * t;
        self.query_sq += q * q;
        self.target_sq += t * t;
        self.min_sum += q.min(t);
        self.query_sum += q;
        self.target_sum += t;
    }

    fn dense(query: &[f32], target: &[f32]) -> Self {
        let mut stats = Self::default();
        for (&q, &t) in query.iter().zip(target.iter()) {
            stats.add(q, t);
        }
        stats
    }

    /// Merge-join over sorted indices; absent entries count as zero.
    fn sparse(query: &SparseVector, target: &SparseVector) -> Self {
        let mut stats = Self::default();
        let (qi, qv) = (query.indices(), query.values());
        let (ti, tv) = (target.indices(), target.values());

        let (mut i, mut j) = (0, 0);
        while i < qi.len() && j < ti.len() {
            match qi[i].cmp(&ti[j]) {
                Ordering::Equal => {
                    stats.add(qv[i], tv[j]);
                    i += 1;
                    j += 1;
                }
                Ordering::Less => {
                    stats.add(qv[i], 0.0);
                    i += 1;
                }
                Ordering::Greater => {
                    stats.add(0.0, tv[j]);
                    j += 1;
                }
            }
        }
        for &q in &qv[i..] {
            stats.add(q, 0.0);
        }
        for &t in &tv[j..] {
            stats.add(0.0, t);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(values: &[f32]) -> Vector {
        Vector::Dense(values.to_vec())
    }

    fn sparse(dimension: usize, entries: &[(u32, f32)]) -> Vector {
        Vector::Sparse(SparseVector::from_entries(dimension, entries.iter().copied()))
    }

    #[test]
    fn test_sanitize_score() {
        assert_eq!(sanitize_score(f32::NAN), 0.0);
        assert_eq!(sanitize_score(f32::INFINITY), 1.0);
        assert_eq!(sanitize_score(f32::NEG_INFINITY), 0.0);
        assert_eq!(sanitize_score(0.42), 0.42);
        assert_eq!(sanitize_score(-0.5), -0.5);
        assert!(sanitize_score(-0.0).is_sign_positive());
    }

    #[test]
    fn test_rank_basic() {
        let ranker = SimilarityRanker::new(SimilarityMetric::Cosine);
        let corpus = vec![dense(&[0.0, 1.0, 0.0]), dense(&[1.0, 0.0, 0.0])];

        let results = ranker.rank(&dense(&[1.0, 0.1, 0.0]), &corpus, 10, None).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].index, 1);
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_rank_empty_corpus_and_zero_k() {
        let ranker = SimilarityRanker::default();
        let query = dense(&[1.0, 0.0]);

        assert!(ranker.rank(&query, &[], 5, None).unwrap().is_empty());
        assert!(ranker
            .rank(&query, &[dense(&[1.0, 0.0])], 0, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_rank_ties_broken_by_index() {
        let ranker = SimilarityRanker::default();
        let corpus = vec![
            dense(&[0.0, 1.0]),
            dense(&[1.0, 0.0]),
            dense(&[2.0, 0.0]),
            dense(&[1.0, 0.0]),
        ];

        let results = ranker.rank(&dense(&[1.0, 0.0]), &corpus, 3, None).unwrap();
        let indices: Vec<usize> = results.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_rank_truncates_before_threshold() {
        let ranker = SimilarityRanker::default();
        // scores: 1.0, ~0.995, ~0.707, 0.0
        let corpus = vec![
            dense(&[1.0, 0.0]),
            dense(&[1.0, 0.1]),
            dense(&[1.0, 1.0]),
            dense(&[0.0, 1.0]),
        ];

        let results = ranker
            .rank(&dense(&[1.0, 0.0]), &corpus, 2, Some(0.999))
            .unwrap();

        // index 1 survives truncation but fails the threshold; index 2 is
        // never promoted into its place
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].index, 0);
    }

    #[test]
    fn test_rank_all_below_threshold() {
        let ranker = SimilarityRanker::default();
        let corpus = vec![dense(&[0.0, 1.0]), dense(&[1.0, 1.0])];

        let results = ranker
            .rank(&dense(&[1.0, 0.0]), &corpus, 5, Some(0.9))
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_rank_threshold_is_inclusive() {
        let ranker = SimilarityRanker::default();
        let corpus = vec![dense(&[1.0, 0.0])];

        let results = ranker.rank(&dense(&[1.0, 0.0]), &corpus, 5, Some(1.0)).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_zero_norm_scores_zero_and_never_dominates() {
        let ranker = SimilarityRanker::default();
        let corpus = vec![dense(&[0.0, 0.0]), dense(&[-1.0, 0.0]), dense(&[1.0, 1.0])];

        let results = ranker.rank(&dense(&[1.0, 0.0]), &corpus, 3, None).unwrap();
        let indices: Vec<usize> = results.iter().map(|r| r.index).collect();

        assert_eq!(indices, vec![2, 0, 1]);
        assert_eq!(results[1].score, 0.0);
        assert!(results[2].score < 0.0);
    }

    #[test]
    fn test_overflowing_vectors_stay_finite() {
        let ranker = SimilarityRanker::default();
        let corpus = vec![dense(&[1.0, 0.0]), dense(&[f32::MAX, f32::MAX])];

        let results = ranker.rank(&dense(&[1.0, 0.0]), &corpus, 2, None).unwrap();
        for result in &results {
            assert!(result.score.is_finite());
            assert!(result.score <= 1.0);
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let ranker = SimilarityRanker::default();
        let result = ranker.rank(&dense(&[1.0, 0.0]), &[dense(&[1.0, 0.0, 0.0])], 5, None);
        assert!(matches!(
            result,
            Err(RankError::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn test_kind_mismatch() {
        let ranker = SimilarityRanker::default();
        let result = ranker.score(&dense(&[1.0, 0.0]), &sparse(2, &[(0, 1.0)]));
        assert!(matches!(result, Err(RankError::KindMismatch)));
    }

    #[test]
    fn test_sparse_cosine_matches_dense() {
        let ranker = SimilarityRanker::new(SimilarityMetric::Cosine);

        let dense_score = ranker
            .score(&dense(&[1.0, 0.0, 2.0, 0.0]), &dense(&[0.0, 3.0, 1.0, 0.0]))
            .unwrap();
        let sparse_score = ranker
            .score(
                &sparse(4, &[(0, 1.0), (2, 2.0)]),
                &sparse(4, &[(1, 3.0), (2, 1.0)]),
            )
            .unwrap();

        assert!((dense_score - sparse_score).abs() < 1e-6);
    }

    #[test]
    fn test_overlap_and_jaccard_on_presence_vectors() {
        // query {0, 1, 2}, document {1, 2, 3}
        let query = sparse(5, &[(0, 1.0), (1, 1.0), (2, 1.0)]);
        let doc = sparse(5, &[(1, 1.0), (2, 1.0), (3, 1.0)]);

        let overlap = SimilarityRanker::new(SimilarityMetric::Overlap)
            .score(&query, &doc)
            .unwrap();
        let jaccard = SimilarityRanker::new(SimilarityMetric::Jaccard)
            .score(&query, &doc)
            .unwrap();

        assert!((overlap - 2.0 / 3.0).abs() < 1e-6);
        assert!((jaccard - 2.0 / 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_overlap_empty_query_is_sanitized() {
        let ranker = SimilarityRanker::new(SimilarityMetric::Overlap);
        let corpus = vec![sparse(3, &[(0, 1.0)])];

        let results = ranker.rank(&sparse(3, &[]), &corpus, 1, None).unwrap();
        assert_eq!(results[0].score, 0.0);
    }

    #[test]
    fn test_rank_large_corpus_selects_true_top_k() {
        let ranker = SimilarityRanker::default();
        let corpus: Vec<Vector> = (0..200)
            .map(|i| dense(&[1.0, (i % 17) as f32 * 0.1]))
            .collect();

        let results = ranker.rank(&dense(&[1.0, 0.0]), &corpus, 5, None).unwrap();

        let mut all = ranker.rank(&dense(&[1.0, 0.0]), &corpus, corpus.len(), None).unwrap();
        all.truncate(5);
        assert_eq!(results, all);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
