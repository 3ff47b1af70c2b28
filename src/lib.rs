//! # codemem: local code memory
//!
//! Keeps a dependency graph and a semantic index of a source tree in step
//! with the files on disk, and answers search, symbol and impact queries
//! over both.
//!
//! ## Architecture
//!
//! - **[`graph`]**: typed dependency multigraph with bounded traversal and JSON persistence
//! - **[`db`]**: SQLite + sqlite-vec semantic index of code chunks and decisions
//! - **[`embedder`]**: embedding backend trait, a deterministic token-hashing embedder and an ONNX backend
//! - **[`store`]**: hybrid store that writes both indexes together and joins them in queries
//! - **[`impact`]**: change-impact scoring, severity, risks and recommendations
//! - **[`indexer`]**: Python, Markdown and generic parsers plus the incremental indexer
//! - **[`project`]**: `.codemem/` layout, file selection and the sync lock
//! - **[`config`]**: project configuration (`config.json`)

pub mod config;
pub mod db;
pub mod embedder;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod impact;
pub mod indexer;
pub mod models;
pub(crate) mod persist;
pub mod project;
pub mod store;

pub use error::{Error, Result};
