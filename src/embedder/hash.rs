//! Token-hashing embedder: the default backend, and the one tests use.
//!
//! Each identifier-like token is hashed into one of `dimensions` buckets,
//! so texts that share vocabulary end up close under cosine distance. The
//! bucket comes from SHA-256 of the lower-cased token, which never changes
//! between builds, so stored vectors stay comparable with new queries.
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use super::{Embedder, EmbedderError, l2_normalize};

/// Bumped whenever tokenising or bucketing changes.
const HASH_SCHEME: &str = "token-sha256-v1";

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*|[0-9]+").expect("token regex"));

/// A deterministic embedder with no model behind it.
pub struct HashEmbedder {
    pub dimensions: usize,
}

impl HashEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let digest = Sha256::digest(token.to_lowercase().as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let hash = u64::from_le_bytes(head);
        let idx = (hash % self.dimensions as u64) as usize;
        // Top bit picks the sign so unrelated tokens partly cancel.
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        (idx, sign)
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        if self.dimensions == 0 {
            return Err(EmbedderError::InferenceFailed(
                "embedder configured with zero dimensions".into(),
            ));
        }

        let mut embedding = vec![0.0f32; self.dimensions];
        for token in TOKEN_RE.find_iter(text) {
            let (idx, sign) = self.bucket(token.as_str());
            embedding[idx] += sign;
        }

        // Empty or symbol-only text still needs a unit vector.
        if embedding.iter().all(|v| *v == 0.0) {
            embedding[0] = 1.0;
        }
        l2_normalize(&mut embedding);
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn id(&self) -> String {
        HASH_SCHEME.to_string()
    }
}
