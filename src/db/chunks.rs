use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, Transaction, params};

use super::{SemanticIndex, serialize_vector};
use crate::embedder::check_dimensions;
use crate::error::{Error, Result};
use crate::models::{CodeChunk, SymbolType};

/// Column list shared by every query that rebuilds a `CodeChunk`.
pub(crate) const CHUNK_COLUMNS: &str = "c.id, c.file_path, c.language, c.symbol_name, c.symbol_type, \
     c.line_start, c.line_end, c.content, c.docstring, c.signature, c.parent_symbol, \
     c.content_hash, c.last_indexed";

pub(crate) fn map_chunk_row(row: &Row<'_>) -> rusqlite::Result<CodeChunk> {
    let symbol_type: String = row.get(4)?;
    let symbol_type = symbol_type.parse::<SymbolType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into())
    })?;

    Ok(CodeChunk {
        id: row.get(0)?,
        file_path: row.get(1)?,
        language: row.get(2)?,
        symbol_name: row.get(3)?,
        symbol_type,
        line_start: row.get::<_, i64>(5)? as usize,
        line_end: row.get::<_, i64>(6)? as usize,
        content: row.get(7)?,
        docstring: row.get(8)?,
        signature: row.get(9)?,
        parent_symbol: row.get(10)?,
        content_hash: row.get(11)?,
        last_indexed: row.get(12)?,
    })
}

/// Insert or replace `chunks` by id inside `tx`.
pub(crate) fn write_chunks(tx: &Transaction<'_>, chunks: &[CodeChunk], vectors: &[Vec<f32>]) -> Result<()> {
    for (chunk, vector) in chunks.iter().zip(vectors) {
        let old_seq: Option<i64> = tx
            .query_row(
                "SELECT seq FROM chunks WHERE id = ?",
                params![chunk.id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(seq) = old_seq {
            tx.execute("DELETE FROM vec_chunks WHERE rowid = ?", params![seq])?;
            tx.execute("DELETE FROM chunks WHERE seq = ?", params![seq])?;
        }

        tx.execute(
            r#"
            INSERT INTO chunks (id, file_path, language, symbol_name, symbol_type,
                line_start, line_end, content, docstring, signature, parent_symbol,
                content_hash, last_indexed)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                chunk.id,
                chunk.file_path,
                chunk.language,
                chunk.symbol_name,
                chunk.symbol_type.as_str(),
                chunk.line_start as i64,
                chunk.line_end as i64,
                chunk.content,
                chunk.docstring,
                chunk.signature,
                chunk.parent_symbol,
                chunk.content_hash,
                chunk.last_indexed,
            ],
        )?;
        let seq = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO vec_chunks (rowid, embedding) VALUES (?, ?)",
            params![seq, serialize_vector(vector)],
        )?;
    }
    Ok(())
}

/// Delete every chunk of `file_path` inside `tx`.
pub(crate) fn delete_file_rows(tx: &Transaction<'_>, file_path: &str) -> Result<usize> {
    // vec0 tables do not take part in cascades.
    tx.execute(
        "DELETE FROM vec_chunks WHERE rowid IN (SELECT seq FROM chunks WHERE file_path = ?)",
        params![file_path],
    )?;
    Ok(tx.execute("DELETE FROM chunks WHERE file_path = ?", params![file_path])?)
}

pub(crate) fn clear_rows(tx: &Transaction<'_>) -> Result<()> {
    tx.execute("DELETE FROM vec_chunks", [])?;
    tx.execute("DELETE FROM chunks", [])?;
    Ok(())
}

impl SemanticIndex {
    /// Vectors for `chunks`: the supplied ones after a length and
    /// dimension check, or fresh embeddings of `CodeChunk::embedding_text`.
    pub(crate) fn vectors_for(
        &self,
        chunks: &[CodeChunk],
        embeddings: Option<&[Vec<f32>]>,
    ) -> Result<Vec<Vec<f32>>> {
        let vectors = match embeddings {
            Some(v) => {
                if v.len() != chunks.len() {
                    return Err(Error::Storage(format!(
                        "{} embeddings supplied for {} chunks",
                        v.len(),
                        chunks.len()
                    )));
                }
                v.to_vec()
            }
            None => {
                let texts: Vec<String> = chunks.iter().map(CodeChunk::embedding_text).collect();
                let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
                self.embedder.embed_batch(&refs)?
            }
        };
        let dims = self.embedder.dimensions();
        for v in &vectors {
            check_dimensions(v, dims)?;
        }
        Ok(vectors)
    }

    /// Insert or replace chunks by id. Embeddings are computed from
    /// `CodeChunk::embedding_text` when not supplied.
    pub fn upsert_chunks(
        &mut self,
        chunks: &[CodeChunk],
        embeddings: Option<&[Vec<f32>]>,
    ) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let vectors = self.vectors_for(chunks, embeddings)?;
        let tx = self.conn.transaction()?;
        write_chunks(&tx, chunks, &vectors)?;
        tx.commit()?;
        Ok(chunks.len())
    }

    /// Remove chunks by id. Unknown ids are ignored.
    pub fn delete_by_ids(&mut self, ids: &[&str]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        for id in ids {
            tx.execute(
                "DELETE FROM vec_chunks WHERE rowid IN (SELECT seq FROM chunks WHERE id = ?)",
                params![id],
            )?;
            removed += tx.execute("DELETE FROM chunks WHERE id = ?", params![id])?;
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Remove every chunk of `file_path`.
    pub fn delete_by_file(&mut self, file_path: &str) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let removed = delete_file_rows(&tx, file_path)?;
        tx.commit()?;
        Ok(removed)
    }

    pub fn get_chunk(&self, id: &str) -> Result<Option<CodeChunk>> {
        let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks c WHERE c.id = ?");
        Ok(self
            .conn
            .query_row(&sql, params![id], map_chunk_row)
            .optional()?)
    }

    /// Chunks of a file ordered by position in the file.
    pub fn get_chunks_by_file(&self, file_path: &str) -> Result<Vec<CodeChunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks c WHERE c.file_path = ? ORDER BY c.line_start, c.id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![file_path], map_chunk_row)?;
        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?);
        }
        Ok(chunks)
    }

    pub fn file_paths(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT file_path FROM chunks ORDER BY file_path")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut paths = Vec::new();
        for row in rows {
            paths.push(row?);
        }
        Ok(paths)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn clear(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        clear_rows(&tx)?;
        tx.commit()?;
        Ok(())
    }
}
