//! Project configuration stored in `.codemem/config.json`.
//!
//! Every field has a default, so a partial (or missing) file is fine.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::RelationType;

// ── Default value functions ──────────────────────────────────────────

fn default_version() -> String {
    "1.0".to_string()
}

fn default_include_patterns() -> Vec<String> {
    [
        "py", "js", "ts", "tsx", "jsx", "go", "rs", "java", "kt", "rb", "php", "c", "cpp", "h",
        "hpp", "cs", "swift", "md", "rst", "yaml", "yml", "json", "toml",
    ]
    .iter()
    .map(|ext| format!("**/*.{ext}"))
    .collect()
}

fn default_exclude_patterns() -> Vec<String> {
    [
        // Version control
        ".git/", ".svn/", ".hg/",
        // Dependencies
        "node_modules/", ".venv/", "venv/", "env/", "__pycache__/", "*.pyc", ".eggs/",
        "*.egg-info/",
        // Build artifacts
        "dist/", "build/", "target/", "*.so", "*.dll", "*.dylib",
        // IDE
        ".idea/", ".vscode/", "*.swp", "*.swo",
        // OS files
        ".DS_Store", "Thumbs.db",
        // Our own state
        ".codemem/",
        // Generated
        "*.min.js", "*.min.css", "*.map",
        // Data
        "*.sqlite", "*.sqlite3", "*.db",
        // Logs
        "*.log", "logs/",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

fn default_max_file_size_kb() -> u64 {
    500
}

fn default_max_chunk_chars() -> usize {
    4000
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> usize {
    10
}

fn default_dimensions() -> usize {
    384
}

fn default_search_top_k() -> usize {
    10
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,

    /// Project name; the root directory name when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_include_patterns")]
    pub include_patterns: Vec<String>,

    /// Gitignore-style: `dir/` excludes a directory anywhere, a bare
    /// pattern matches a file name anywhere.
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    #[serde(default = "default_max_file_size_kb")]
    pub max_file_size_kb: u64,

    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GraphConfig {
    #[serde(default = "default_true")]
    pub track_imports: bool,

    #[serde(default = "default_true")]
    pub track_calls: bool,

    #[serde(default = "default_true")]
    pub track_inheritance: bool,

    /// Upper bound for any traversal depth a caller asks for.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

/// Which model turns chunk text into vectors.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Token hashing; needs no model files.
    #[default]
    Hash,
    /// A sentence-embedding ONNX model (`model.onnx` + `tokenizer.json`).
    Onnx,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbeddingBackend,

    /// Output size of the backend. For `onnx` this must equal the model's
    /// hidden size.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Directory holding the ONNX model; relative paths resolve against
    /// the project root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<PathBuf>,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            name: None,
            description: None,
            indexing: IndexingConfig::default(),
            graph: GraphConfig::default(),
            embedding: EmbeddingConfig::default(),
            search_top_k: default_search_top_k(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            include_patterns: default_include_patterns(),
            exclude_patterns: default_exclude_patterns(),
            max_file_size_kb: default_max_file_size_kb(),
            max_chunk_chars: default_max_chunk_chars(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            track_imports: default_true(),
            track_calls: default_true(),
            track_inheritance: default_true(),
            max_depth: default_max_depth(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            dimensions: default_dimensions(),
            model_dir: None,
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&data)
            .with_context(|| format!("invalid config: {}", path.display()))?;

        info!("Loaded configuration from {}", path.display());
        Ok(cfg)
    }

    /// Save configuration to a JSON file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.embedding.dimensions > 0,
            "embedding.dimensions must be positive"
        );
        anyhow::ensure!(
            self.embedding.backend != EmbeddingBackend::Onnx || self.embedding.model_dir.is_some(),
            "embedding.model_dir is required for the onnx backend"
        );
        anyhow::ensure!(
            self.indexing.max_file_size_kb > 0,
            "indexing.max_file_size_kb must be positive"
        );
        anyhow::ensure!(
            self.indexing.max_chunk_chars > 0,
            "indexing.max_chunk_chars must be positive"
        );
        anyhow::ensure!(self.graph.max_depth > 0, "graph.max_depth must be positive");
        anyhow::ensure!(self.search_top_k > 0, "search_top_k must be positive");
        anyhow::ensure!(
            !self.indexing.include_patterns.is_empty(),
            "at least one include pattern must be specified"
        );
        self.indexing.include_set()?;
        self.indexing.exclude_set()?;
        Ok(())
    }
}

impl IndexingConfig {
    pub fn include_set(&self) -> Result<GlobSet> {
        build_set(self.include_patterns.iter().map(String::as_str))
    }

    pub fn exclude_set(&self) -> Result<GlobSet> {
        let globs: Vec<String> = self
            .exclude_patterns
            .iter()
            .map(|p| exclude_glob(p))
            .collect();
        build_set(globs.iter().map(String::as_str))
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_kb * 1024
    }
}

impl GraphConfig {
    /// Whether relationships of this kind should reach the store.
    pub fn tracks(&self, kind: RelationType) -> bool {
        match kind {
            RelationType::Imports => self.track_imports,
            RelationType::Calls => self.track_calls,
            RelationType::Inherits | RelationType::Implements => self.track_inheritance,
            _ => true,
        }
    }

    pub fn clamp_depth(&self, depth: usize) -> usize {
        depth.min(self.max_depth)
    }
}

// ── Pattern helpers ──────────────────────────────────────────────────

fn build_set<'a>(patterns: impl Iterator<Item = &'a str>) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Translate a gitignore-style exclude into a glob over relative paths.
fn exclude_glob(pattern: &str) -> String {
    let anchored = pattern.starts_with('/');
    let body = pattern.trim_start_matches('/');
    let prefix = if anchored || body.trim_end_matches('/').contains('/') {
        ""
    } else {
        "**/"
    };
    match body.strip_suffix('/') {
        Some(dir) => format!("{prefix}{dir}/**"),
        None => format!("{prefix}{body}"),
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.indexing.max_file_size_kb, 500);
        assert_eq!(config.indexing.max_chunk_chars, 4000);
        assert_eq!(config.graph.max_depth, 10);
        assert_eq!(config.embedding.dimensions, 384);
        assert_eq!(config.search_top_k, 10);
        assert!(config.indexing.include_patterns.contains(&"**/*.py".to_string()));
        assert!(config.indexing.exclude_patterns.contains(&".codemem/".to_string()));
    }

    #[test]
    fn test_partial_json_gets_defaults() {
        let json = r#"{"name": "demo", "graph": {"track_calls": false}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.name.as_deref(), Some("demo"));
        assert!(!config.graph.track_calls);
        assert!(config.graph.track_imports);
        assert_eq!(config.graph.max_depth, 10);
        assert_eq!(config.indexing.max_chunk_chars, 4000);
    }

    #[test]
    fn test_validate_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.embedding.dimensions = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.indexing.max_chunk_chars = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search_top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_onnx_backend_needs_model_dir() {
        let json = r#"{"embedding": {"backend": "onnx"}}"#;
        let mut config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.embedding.backend, EmbeddingBackend::Onnx);
        assert!(config.validate().is_err());

        config.embedding.model_dir = Some(PathBuf::from("models/e5-small"));
        assert!(config.validate().is_ok());
        assert_eq!(Config::default().embedding.backend, EmbeddingBackend::Hash);
    }

    #[test]
    fn test_validate_patterns() {
        let mut config = Config::default();
        config.indexing.include_patterns.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.indexing.exclude_patterns.push("src/[".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("src/["));
    }

    #[test]
    fn test_exclude_glob_translation() {
        assert_eq!(exclude_glob("node_modules/"), "**/node_modules/**");
        assert_eq!(exclude_glob("*.pyc"), "**/*.pyc");
        assert_eq!(exclude_glob("/build/"), "build/**");
        assert_eq!(exclude_glob("docs/generated/"), "docs/generated/**");

        let set = IndexingConfig::default().exclude_set().unwrap();
        assert!(set.is_match("node_modules/left-pad/index.js"));
        assert!(set.is_match("pkg/__pycache__/mod.cpython-312.pyc"));
        assert!(set.is_match(".codemem/memory/graph.json"));
        assert!(!set.is_match("src/app.py"));
    }

    #[test]
    fn test_include_set() {
        let set = IndexingConfig::default().include_set().unwrap();
        assert!(set.is_match("app.py"));
        assert!(set.is_match("src/deep/lib.rs"));
        assert!(!set.is_match("image.png"));
    }

    #[test]
    fn test_tracking_flags_and_depth() {
        let graph = GraphConfig {
            track_calls: false,
            ..GraphConfig::default()
        };
        assert!(!graph.tracks(RelationType::Calls));
        assert!(graph.tracks(RelationType::Imports));
        assert!(graph.tracks(RelationType::Contains));
        assert_eq!(graph.clamp_depth(50), 10);
        assert_eq!(graph.clamp_depth(2), 2);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".codemem/config.json");

        let missing = Config::load(&path).unwrap();
        assert!(missing.name.is_none());

        let mut config = Config::default();
        config.name = Some("demo".into());
        config.search_top_k = 3;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.name.as_deref(), Some("demo"));
        assert_eq!(loaded.search_top_k, 3);

        std::fs::write(&path, "{not json").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
