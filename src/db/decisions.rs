//! Architectural decisions: a second embedded collection next to chunks.
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use tracing::info;

use super::search::distance_to_score;
use super::{SemanticIndex, serialize_vector};
use crate::embedder::check_dimensions;
use crate::error::Result;
use crate::models::{Decision, DecisionStatus};

const DECISION_COLUMNS: &str = "d.id, d.timestamp, d.title, d.description, d.context, \
     d.rationale, d.related_files, d.related_symbols, d.tags, d.status";

#[derive(Debug, Clone, Serialize)]
pub struct DecisionResult {
    pub decision: Decision,
    pub score: f64,
    pub distance: f64,
}

fn text_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn map_decision_row(row: &Row<'_>) -> rusqlite::Result<Decision> {
    let status: String = row.get(9)?;
    let status = status
        .parse::<DecisionStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, e.into()))?;
    Ok(Decision {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        context: row.get(4)?,
        rationale: row.get(5)?,
        related_files: text_list(row, 6)?,
        related_symbols: text_list(row, 7)?,
        tags: text_list(row, 8)?,
        status,
    })
}

impl SemanticIndex {
    /// Insert or replace a decision by id, embedding
    /// [`Decision::embedding_text`].
    pub fn upsert_decision(&mut self, decision: &Decision) -> Result<()> {
        let vector = self.embedder.embed(&decision.embedding_text())?;
        check_dimensions(&vector, self.embedder.dimensions())?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM vec_decisions WHERE rowid IN (SELECT seq FROM decisions WHERE id = ?)",
            params![decision.id],
        )?;
        tx.execute("DELETE FROM decisions WHERE id = ?", params![decision.id])?;
        tx.execute(
            r#"
            INSERT INTO decisions (id, timestamp, title, description, context, rationale,
                related_files, related_symbols, tags, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                decision.id,
                decision.timestamp,
                decision.title,
                decision.description,
                decision.context,
                decision.rationale,
                serde_json::to_string(&decision.related_files)?,
                serde_json::to_string(&decision.related_symbols)?,
                serde_json::to_string(&decision.tags)?,
                decision.status.as_str(),
            ],
        )?;
        let seq = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO vec_decisions (rowid, embedding) VALUES (?, ?)",
            params![seq, serialize_vector(&vector)],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_decision(&self, id: &str) -> Result<Option<Decision>> {
        let sql = format!("SELECT {DECISION_COLUMNS} FROM decisions d WHERE d.id = ?");
        Ok(self
            .conn
            .query_row(&sql, params![id], map_decision_row)
            .optional()?)
    }

    /// Top-`k` decisions nearest to `query`.
    pub fn search_decisions(&self, query: &str, k: usize) -> Result<Vec<DecisionResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed(query)?;
        check_dimensions(&query_vector, self.embedder.dimensions())?;

        let sql = format!(
            r#"
            SELECT {DECISION_COLUMNS},
                vec_distance_cosine(v.embedding, ?) as distance
            FROM vec_decisions v
            JOIN decisions d ON v.rowid = d.seq
            ORDER BY distance ASC, d.id ASC
            LIMIT ?
            "#
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![serialize_vector(&query_vector), k as i64],
            |row| {
                let distance: f64 = row.get(10)?;
                Ok(DecisionResult {
                    decision: map_decision_row(row)?,
                    score: distance_to_score(distance),
                    distance,
                })
            },
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn count_decisions(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM decisions", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Recompute every decision vector with the current embedder.
    pub(crate) fn reembed_decisions(&mut self) -> Result<()> {
        let sql = format!("SELECT {DECISION_COLUMNS} FROM decisions d ORDER BY d.seq");
        let decisions: Vec<Decision> = {
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map([], map_decision_row)?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        for decision in &decisions {
            self.upsert_decision(decision)?;
        }
        if !decisions.is_empty() {
            info!("Re-embedded {} decisions", decisions.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::index;
    use super::*;

    fn decision(title: &str, description: &str, tags: &[&str]) -> Decision {
        let mut d = Decision::new(title, description, "keeps the system simple");
        d.tags = tags.iter().map(|t| (*t).to_string()).collect();
        d.related_files = vec!["src/db/mod.rs".into()];
        d
    }

    #[test]
    fn test_upsert_and_get() {
        let mut idx = index();
        let mut d = decision("Use SQLite for vectors", "sqlite-vec stores embeddings", &["storage"]);
        idx.upsert_decision(&d).unwrap();

        d.status = DecisionStatus::Superseded;
        idx.upsert_decision(&d).unwrap();

        assert_eq!(idx.count_decisions().unwrap(), 1);
        let stored = idx.get_decision(&d.id).unwrap().unwrap();
        assert_eq!(stored.status, DecisionStatus::Superseded);
        assert_eq!(stored.tags, vec!["storage"]);
        assert_eq!(stored.related_files, vec!["src/db/mod.rs"]);
        assert_eq!(stored.timestamp, d.timestamp);
        assert!(idx.get_decision("decision:none").unwrap().is_none());
    }

    #[test]
    fn test_search_decisions() {
        let mut idx = index();
        let storage = decision("Use SQLite for vectors", "sqlite vectors storage", &[]);
        let logging = decision("Log with tracing", "structured logging to stderr", &[]);
        idx.upsert_decision(&storage).unwrap();
        idx.upsert_decision(&logging).unwrap();

        let hits = idx.search_decisions("sqlite storage", 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].decision.id, storage.id);
        assert!(hits[0].score >= hits[1].score);
        assert!(idx.search_decisions("anything", 0).unwrap().is_empty());
    }

    #[test]
    fn test_decisions_are_separate_from_chunks() {
        let mut idx = index();
        idx.upsert_decision(&decision("Keep ids stable", "ids never change", &[]))
            .unwrap();
        idx.clear().unwrap();
        assert_eq!(idx.count().unwrap(), 0);
        assert_eq!(idx.count_decisions().unwrap(), 1);
        assert!(idx.search("ids", None, 5, None).unwrap().is_empty());
    }
}
