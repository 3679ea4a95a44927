//! Embedding model wrapper for fastembed.
//!
//! Provides the dense semantic strategy:
//! - Model loading with configurable cache directory
//! - Model download with timeout on first use
//! - Batch embedding generation

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::time::Duration;

use crate::ranker::SimilarityMetric;
use crate::representer::tokenize::truncate_chars;
use crate::representer::{RepresentationError, Vector, VectorRepresenter};

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum input length for embedding (characters, not tokens)
const MAX_INPUT_CHARS: usize = 2048;

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct EmbeddingModel {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
    batch_size: usize,
}

impl EmbeddingModel {
    /// Create a new embedding model with the given name.
    ///
    /// The model will be downloaded on first use if not cached.
    ///
    /// # Arguments
    /// * `model_name` - Name of the model (e.g., "all-MiniLM-L6-v2")
    /// * `models_dir` - Directory to cache downloaded models
    /// * `download_timeout` - Optional timeout for model download
    /// * `batch_size` - Texts per inference batch
    pub fn new(
        model_name: &str,
        models_dir: PathBuf,
        download_timeout: Option<Duration>,
        batch_size: usize,
    ) -> Result<Self, RepresentationError> {
        let model_enum = Self::parse_model_name(model_name)?;
        let timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        std::fs::create_dir_all(&models_dir).map_err(|e| {
            RepresentationError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(false);

        // Download, load and probe off-thread, bounded by `timeout`
        let (model, dimensions) = run_with_timeout(timeout, move || {
            let mut model = TextEmbedding::try_new(options)
                .map_err(|e| RepresentationError::InitFailed(e.to_string()))?;
            let dimensions = Self::probe_dimensions(&mut model)?;
            Ok((model, dimensions))
        })?;

        log::info!(
            "Loaded embedding model '{}' ({} dimensions)",
            model_name,
            dimensions
        );

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
            batch_size: batch_size.max(1),
        })
    }

    /// Get the model name
    pub fn name(&self) -> &str {
        &self.model_name
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(
        name: &str,
    ) -> Result<fastembed::EmbeddingModel, RepresentationError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2)
            }
            "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q)
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15)
            }
            "bge-base-en-v1.5" | "bgebaseenv15" => {
                Ok(fastembed::EmbeddingModel::BGEBaseENV15)
            }
            "bge-large-en-v1.5" | "bgelargeenv15" => {
                Ok(fastembed::EmbeddingModel::BGELargeENV15)
            }
            _ => Err(RepresentationError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5",
                name
            ))),
        }
    }

    /// Probe the model to determine embedding dimensions.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, RepresentationError> {
        let test_embeddings = model.embed(vec!["test"], None).map_err(|e| {
            RepresentationError::InitFailed(format!("Failed to probe dimensions: {}", e))
        })?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| RepresentationError::InitFailed("Model returned no embedding".to_string()))
    }
}

/// Run `init` on a worker thread and wait at most `timeout` for it.
///
/// On timeout the worker is left to finish in the background; its result is dropped.
fn run_with_timeout<T, F>(timeout: Duration, init: F) -> Result<T, RepresentationError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RepresentationError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("embedding-model-init".to_string())
        .spawn(move || {
            let _ = tx.send(init());
        })
        .map_err(|e| {
            RepresentationError::InitFailed(format!("Failed to spawn model loader: {}", e))
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            log::error!("Embedding model not ready after {}s", timeout.as_secs());
            Err(RepresentationError::DownloadTimeout(timeout.as_secs()))
        }
        Err(RecvTimeoutError::Disconnected) => Err(RepresentationError::InitFailed(
            "Model loader exited without a result".to_string(),
        )),
    }
}

impl VectorRepresenter for EmbeddingModel {
    fn identity(&self) -> String {
        format!("dense:v1:{}", self.model_name.to_lowercase())
    }

    fn dimension(&self) -> usize {
        self.dimensions
    }

    fn metric(&self) -> SimilarityMetric {
        SimilarityMetric::Cosine
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn represent_chunk(&self, texts: &[String]) -> Result<Vec<Vector>, RepresentationError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let inputs: Vec<String> = texts
            .iter()
            .map(|text| truncate_chars(text.trim(), MAX_INPUT_CHARS))
            .collect();

        let mut model = self.model.lock().map_err(|e| {
            RepresentationError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let embeddings = model
            .embed(inputs, Some(self.batch_size))
            .map_err(|e| RepresentationError::EmbeddingFailed(e.to_string()))?;

        Ok(embeddings.into_iter().map(Vector::Dense).collect())
    }
}
