//! Embedding backend seam for the semantic index.
//!
//! The index only needs a fixed-dimension vector per text. Two backends
//! ship: [`hash::HashEmbedder`] (no model files) and
//! [`onnx::OnnxEmbedder`]. [`from_config`] picks one for a project.
pub mod hash;
pub mod onnx;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{EmbeddingBackend, EmbeddingConfig};

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow sharing behind `Arc`.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;

    /// Stable name of the vector space this backend produces. Vectors from
    /// backends with different ids are not comparable.
    fn id(&self) -> String;
}

/// Build the backend a project is configured for. A relative
/// `model_dir` resolves against `root`.
pub fn from_config(
    config: &EmbeddingConfig,
    root: &Path,
) -> Result<Arc<dyn Embedder>, EmbedderError> {
    match config.backend {
        EmbeddingBackend::Hash => Ok(Arc::new(hash::HashEmbedder::new(config.dimensions))),
        EmbeddingBackend::Onnx => {
            let dir = config.model_dir.as_deref().ok_or_else(|| {
                EmbedderError::ModelLoadFailed("embedding.model_dir is not set".into())
            })?;
            let embedder = onnx::OnnxEmbedder::new(&root.join(dir), config.dimensions)?;
            Ok(Arc::new(embedder))
        }
    }
}

/// Check that `vector` matches the backend dimensionality.
pub fn check_dimensions(vector: &[f32], expected: usize) -> Result<(), EmbedderError> {
    if vector.len() == expected {
        Ok(())
    } else {
        Err(EmbedderError::DimensionMismatch {
            expected,
            actual: vector.len(),
        })
    }
}

/// L2-normalize `vec` in place. A zero vector is left as is.
pub(crate) fn l2_normalize(vec: &mut [f32]) {
    let norm_sq: f32 = vec.iter().map(|v| v * v).sum();
    if norm_sq == 0.0 {
        return;
    }
    let inv = 1.0 / norm_sq.sqrt();
    for v in vec {
        *v *= inv;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0f32; 3];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0; 3]);
    }

    #[test]
    fn test_from_config() {
        let config = EmbeddingConfig {
            dimensions: 48,
            ..EmbeddingConfig::default()
        };
        let embedder = from_config(&config, Path::new(".")).unwrap();
        assert_eq!(embedder.dimensions(), 48);
        assert_eq!(embedder.id(), hash::HashEmbedder::new(48).id());

        let onnx = EmbeddingConfig {
            backend: EmbeddingBackend::Onnx,
            model_dir: Some("no/such/model".into()),
            ..EmbeddingConfig::default()
        };
        let err = from_config(&onnx, Path::new("/nonexistent")).err().unwrap();
        assert!(matches!(err, EmbedderError::ModelLoadFailed(_)));

        let unset = EmbeddingConfig {
            backend: EmbeddingBackend::Onnx,
            ..EmbeddingConfig::default()
        };
        assert!(from_config(&unset, Path::new(".")).is_err());
    }
}
