//! Semantic index: chunks and their embeddings in SQLite + sqlite-vec.
use std::path::Path;
use std::sync::{Arc, Once};

use rusqlite::{Connection, OptionalExtension, params};
use sqlite_vec::sqlite3_vec_init;
use tracing::{info, warn};

use crate::embedder::Embedder;
use crate::error::Result;

pub mod chunks;
pub mod decisions;
pub mod search;

pub use decisions::DecisionResult;
pub use search::{SearchFilter, SearchResult};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    file_path TEXT NOT NULL,
    language TEXT NOT NULL,
    symbol_name TEXT,
    symbol_type TEXT NOT NULL,
    line_start INTEGER NOT NULL,
    line_end INTEGER NOT NULL,
    content TEXT NOT NULL,
    docstring TEXT,
    signature TEXT,
    parent_symbol TEXT,
    content_hash TEXT NOT NULL,
    last_indexed DATETIME NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_path);
CREATE INDEX IF NOT EXISTS idx_chunks_language ON chunks(language);
CREATE INDEX IF NOT EXISTS idx_chunks_symbol ON chunks(symbol_name);

CREATE TABLE IF NOT EXISTS decisions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    timestamp DATETIME NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    context TEXT NOT NULL,
    rationale TEXT NOT NULL,
    related_files TEXT NOT NULL,
    related_symbols TEXT NOT NULL,
    tags TEXT NOT NULL,
    status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS index_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// `index_meta` key naming the vector space stored vectors belong to.
const EMBEDDER_KEY: &str = "embedder";

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Chunk and decision store with vector columns sized to the embedder.
///
/// The embedder's id and dimension are recorded in `index_meta`. Opening
/// with a different embedder drops every stored chunk (they are rebuilt
/// from source) and re-embeds decisions; the new embedder is recorded once
/// the caller confirms with [`SemanticIndex::commit_embedder`].
pub struct SemanticIndex {
    pub(crate) conn: Connection,
    pub(crate) embedder: Arc<dyn Embedder>,
    embedder_changed: bool,
}

impl SemanticIndex {
    /// Open (or create) the index at `path`.
    pub fn open<P: AsRef<Path>>(path: P, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening semantic index: {}", path.display());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        init_sqlite_vec();
        let conn = Connection::open(path)?;
        Self::init(conn, embedder)
    }

    /// In-memory index, mostly for tests.
    pub fn open_in_memory(embedder: Arc<dyn Embedder>) -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::init(conn, embedder)
    }

    fn init(conn: Connection, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        info!("sqlite-vec version: {}", vec_version);

        conn.execute_batch(SCHEMA_SQL)?;
        let space = vector_space(embedder.as_ref());
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM index_meta WHERE key = ?",
                params![EMBEDDER_KEY],
                |row| row.get(0),
            )
            .optional()?;

        let embedder_changed = stored.as_ref().is_some_and(|s| *s != space);
        if embedder_changed {
            warn!(
                "Embedding backend changed from {} to {space}; dropping stored vectors",
                stored.as_deref().unwrap_or_default()
            );
            conn.execute_batch(
                "DROP TABLE IF EXISTS vec_chunks; DROP TABLE IF EXISTS vec_decisions; DELETE FROM chunks;",
            )?;
        }

        // vec0 needs the dimension baked into the table definition.
        let dims = embedder.dimensions();
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(embedding FLOAT[{dims}]);
             CREATE VIRTUAL TABLE IF NOT EXISTS vec_decisions USING vec0(embedding FLOAT[{dims}]);"
        ))?;

        let mut index = Self {
            conn,
            embedder,
            embedder_changed,
        };
        if stored.is_none() {
            index.commit_embedder()?;
        }
        if embedder_changed {
            index.reembed_decisions()?;
        }
        Ok(index)
    }

    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    /// Whether this open found vectors from another embedder and dropped
    /// the stored chunks.
    pub fn embedder_changed(&self) -> bool {
        self.embedder_changed
    }

    /// Record the current embedder as the owner of the stored vectors.
    pub fn commit_embedder(&mut self) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO index_meta (key, value) VALUES (?, ?)",
            params![EMBEDDER_KEY, vector_space(self.embedder.as_ref())],
        )?;
        self.embedder_changed = false;
        Ok(())
    }
}

/// `<id>/<dimensions>` of an embedder.
fn vector_space(embedder: &dyn Embedder) -> String {
    format!("{}/{}", embedder.id(), embedder.dimensions())
}

/// Helper to serialize a float32 vector into bytes for vec0 virtual table
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}
