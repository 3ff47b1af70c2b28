//! Sentence-embedding backend on ONNX Runtime.
//!
//! Expects a BERT-style model directory with `model.onnx` and
//! `tokenizer.json` (for example multilingual-e5-small). The last hidden
//! state is mean-pooled over real tokens and L2-normalised. The runtime
//! library is loaded dynamically, so only projects configured for this
//! backend need it installed.
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::info;

use super::{Embedder, EmbedderError, l2_normalize};

const MODEL_FILE: &str = "model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";
const MAX_TOKENS: usize = 512;

pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimensions: usize,
    model_dir: PathBuf,
}

impl OnnxEmbedder {
    /// Load the model in `model_dir`. `dimensions` must equal the model's
    /// hidden size; a mismatch surfaces on the first `embed` call.
    pub fn new(model_dir: &Path, dimensions: usize) -> Result<Self, EmbedderError> {
        let model_path = model_dir.join(MODEL_FILE);
        let tokenizer_path = model_dir.join(TOKENIZER_FILE);
        for required in [&model_path, &tokenizer_path] {
            if !required.exists() {
                return Err(EmbedderError::ModelLoadFailed(format!(
                    "{} not found",
                    required.display()
                )));
            }
        }

        info!("Loading ONNX model from {}", model_dir.display());
        let session = Session::builder()
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("session builder: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("thread config: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("model load: {e}")))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("tokenizer: {e}")))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| EmbedderError::ModelLoadFailed(format!("tokenizer: {e}")))?;
        info!(
            "Tokenizer loaded (vocab size {})",
            tokenizer.get_vocab_size(false)
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimensions,
            model_dir: model_dir.to_path_buf(),
        })
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbedderError::InferenceFailed(format!("tokenization: {e}")))?;
        let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| i64::from(id)).collect();
        let mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| i64::from(m))
            .collect();
        let seq_len = ids.len();

        let tensor = |name: &str, data: Vec<i64>| {
            Tensor::from_array(([1usize, seq_len], data))
                .map_err(|e| EmbedderError::InferenceFailed(format!("{name}: {e}")))
        };
        let input_ids = tensor("input_ids", ids)?;
        let attention_mask = tensor("attention_mask", mask.clone())?;
        let token_type_ids = tensor("token_type_ids", vec![0; seq_len])?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbedderError::InferenceFailed(format!("session lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids,
            ])
            .map_err(|e| EmbedderError::InferenceFailed(e.to_string()))?;

        // [1, seq_len, hidden]
        let (_shape, hidden) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("output: {e}")))?;
        if hidden.len() != seq_len * self.dimensions {
            return Err(EmbedderError::DimensionMismatch {
                expected: self.dimensions,
                actual: hidden.len() / seq_len.max(1),
            });
        }

        let mut pooled = mean_pool(hidden, &mask, self.dimensions);
        l2_normalize(&mut pooled);
        Ok(pooled)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn id(&self) -> String {
        let name = self
            .model_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("onnx:{name}")
    }
}

/// Average the rows of a `[seq_len, hidden]` matrix whose mask is set.
fn mean_pool(hidden: &[f32], mask: &[i64], width: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; width];
    let mut counted = 0.0f32;
    for (row, &m) in hidden.chunks_exact(width).zip(mask) {
        if m == 0 {
            continue;
        }
        counted += 1.0;
        for (acc, v) in pooled.iter_mut().zip(row) {
            *acc += v;
        }
    }
    if counted > 0.0 {
        for v in &mut pooled {
            *v /= counted;
        }
    }
    pooled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_pool_skips_padding() {
        let hidden = [1.0, 2.0, 3.0, 4.0, 10.0, 20.0];
        assert_eq!(mean_pool(&hidden, &[1, 1, 0], 2), vec![2.0, 3.0]);
        assert_eq!(mean_pool(&hidden, &[0, 0, 0], 2), vec![0.0, 0.0]);
    }

    #[test]
    fn test_missing_model_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxEmbedder::new(dir.path(), 384).err().unwrap();
        assert!(err.to_string().contains("model.onnx"));

        std::fs::write(dir.path().join(MODEL_FILE), b"").unwrap();
        let err = OnnxEmbedder::new(dir.path(), 384).err().unwrap();
        assert!(err.to_string().contains("tokenizer.json"));
    }

    /// Needs a downloaded model and the ONNX Runtime library:
    /// `CODEMEM_ONNX_MODEL=/path/to/e5-small cargo test -- --ignored`
    #[test]
    #[ignore]
    fn test_onnx_embed() {
        let Ok(dir) = std::env::var("CODEMEM_ONNX_MODEL") else {
            return;
        };
        let embedder = OnnxEmbedder::new(Path::new(&dir), 384).unwrap();
        let v = embedder.embed("def load_config(path): ...").unwrap();
        assert_eq!(v.len(), 384);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
        assert!(embedder.id().starts_with("onnx:"));
    }
}
