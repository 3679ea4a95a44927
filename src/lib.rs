//! Clinical trial matching engine.
//!
//! Ranks the trials of a tabular corpus against a free-text patient
//! description. The corpus is loaded once, every trial is turned into a
//! vector by a configurable [`VectorRepresenter`], and each query is scored
//! against those vectors by the [`SimilarityRanker`].

pub mod cache;
pub mod config;
pub mod corpus;
pub mod errors;
pub mod ranker;
pub mod representer;
pub mod service;

#[cfg(test)]
mod tests;

pub use config::{ConfigError, MatchConfig, RepresenterStrategy, TfIdfConfig};
pub use corpus::{CorpusSource, CorpusStats, CorpusStore, CsvCorpusSource, InMemoryCorpusSource, TrialFields, TrialRecord};
pub use errors::{ErrorKind, MatchError};
pub use ranker::{RankedMatch, SimilarityMetric, SimilarityRanker};
pub use representer::{RepresenterFactory, StrategyFactory, Vector, VectorRepresenter};
pub use service::{MatchOptions, MatchResponse, MatchResult, MatchService, TrialView};
