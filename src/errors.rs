use crate::corpus::CorpusLoadError;
use crate::representer::RepresentationError;

/// How a caller should treat a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; recoverable by the caller
    UserInput,
    /// Corpus or representer could not be brought up
    BackendUnavailable,
    /// Vectors and records disagree; nothing was served
    DataIntegrity,
    Unexpected,
}

#[derive(thiserror::Error, Debug)]
pub enum MatchError {
    #[error("description must not be empty")]
    EmptyQuery,

    #[error("corpus unavailable: {0}")]
    CorpusLoad(#[from] CorpusLoadError),

    #[error("representer unavailable: {0}")]
    Representation(#[from] RepresentationError),

    #[error("data integrity error: {0}")]
    Integrity(String),

    #[error("unexpected error: {0:?}")]
    Service(#[from] anyhow::Error),
}

impl MatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MatchError::EmptyQuery => ErrorKind::UserInput,
            MatchError::CorpusLoad(_) => ErrorKind::BackendUnavailable,
            MatchError::Representation(e) if e.is_integrity() => ErrorKind::DataIntegrity,
            MatchError::Representation(_) => ErrorKind::BackendUnavailable,
            MatchError::Integrity(_) => ErrorKind::DataIntegrity,
            MatchError::Service(_) => ErrorKind::Unexpected,
        }
    }
}
