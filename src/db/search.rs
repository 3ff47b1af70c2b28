use rusqlite::types::Value;
use serde::Serialize;

use super::chunks::{CHUNK_COLUMNS, map_chunk_row};
use super::{SemanticIndex, serialize_vector};
use crate::embedder::check_dimensions;
use crate::error::Result;
use crate::models::CodeChunk;

/// Metadata filters for similarity search. Both parts are conjunctive.
#[derive(Debug, Default, Clone, Copy)]
pub struct SearchFilter<'a> {
    /// Keep chunks whose language is any of these. Empty means any.
    pub languages: &'a [&'a str],
    /// Keep chunks from exactly this file.
    pub file_path: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk: CodeChunk,
    /// `1 / (1 + distance)`: 1.0 for an exact match, falling towards 0.
    pub score: f64,
    pub distance: f64,
    /// Ids directly linked to the chunk in the graph; filled by the hybrid store.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<String>,
}

/// Map a cosine distance onto a bounded similarity score.
pub fn distance_to_score(distance: f64) -> f64 {
    1.0 / (1.0 + distance.max(0.0))
}

impl SemanticIndex {
    /// Top-`k` chunks nearest to the query. `query_embedding` skips the
    /// embedding call when the caller already has a vector.
    pub fn search(
        &self,
        query_text: &str,
        query_embedding: Option<&[f32]>,
        k: usize,
        filter: Option<&SearchFilter<'_>>,
    ) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = match query_embedding {
            Some(v) => v.to_vec(),
            None => self.embedder.embed(query_text)?,
        };
        check_dimensions(&query_vector, self.embedder.dimensions())?;

        let mut query = format!(
            r#"
            SELECT {CHUNK_COLUMNS},
                vec_distance_cosine(v.embedding, ?) as distance
            FROM vec_chunks v
            JOIN chunks c ON v.rowid = c.seq
            "#
        );

        let mut where_clauses = Vec::new();
        let mut params: Vec<Value> = vec![Value::Blob(serialize_vector(&query_vector))];

        if let Some(f) = filter {
            if !f.languages.is_empty() {
                let marks = vec!["?"; f.languages.len()].join(", ");
                where_clauses.push(format!("c.language IN ({marks})"));
                params.extend(f.languages.iter().map(|l| Value::Text((*l).to_string())));
            }
            if let Some(path) = f.file_path {
                where_clauses.push("c.file_path = ?".to_string());
                params.push(Value::Text(path.to_string()));
            }
        }

        if !where_clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&where_clauses.join(" AND "));
        }

        query.push_str(" ORDER BY distance ASC, c.id ASC LIMIT ?");
        params.push(Value::Integer(k as i64));

        let param_refs: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();

        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let distance: f64 = row.get(13)?;
            Ok(SearchResult {
                chunk: map_chunk_row(row)?,
                score: distance_to_score(distance),
                distance,
                related: Vec::new(),
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{chunk, index};
    use super::*;

    fn seeded() -> SemanticIndex {
        let mut idx = index();
        idx.upsert_chunks(
            &[
                chunk("src/config.py", "load_config", "python", "def load_config(path): read config file"),
                chunk("src/http.py", "send_request", "python", "def send_request(url): open socket"),
                chunk("web/config.ts", "loadConfig", "typescript", "function loadConfig() { read config file }"),
            ],
            None,
        )
        .unwrap();
        idx
    }

    #[test]
    fn test_score_mapping() {
        assert_eq!(distance_to_score(0.0), 1.0);
        assert_eq!(distance_to_score(1.0), 0.5);
        assert!(distance_to_score(0.2) > distance_to_score(0.4));
    }

    #[test]
    fn test_search_ranks_by_similarity() {
        let idx = seeded();
        let results = idx.search("read config file", None, 3, None).unwrap();
        assert_eq!(results.len(), 3);
        assert_ne!(results[2].chunk.symbol_name.as_deref(), Some("load_config"));
        assert_eq!(results[2].chunk.symbol_name.as_deref(), Some("send_request"));
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert!(results.iter().all(|r| r.score > 0.0 && r.score <= 1.0));
    }

    #[test]
    fn test_exact_vector_scores_one() {
        let idx = seeded();
        let target = idx.get_chunk("function:src/http.py:send_request").unwrap().unwrap();
        let v = idx.embedder.embed(&target.embedding_text()).unwrap();
        let results = idx.search("", Some(&v), 1, None).unwrap();
        assert_eq!(results[0].chunk.id, target.id);
        assert!((results[0].score - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_filters_are_conjunctive() {
        let idx = seeded();

        let langs = ["typescript"];
        let by_lang = SearchFilter { languages: &langs, file_path: None };
        let res = idx.search("config", None, 10, Some(&by_lang)).unwrap();
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].chunk.file_path, "web/config.ts");

        let by_file = SearchFilter { languages: &[], file_path: Some("src/http.py") };
        let res = idx.search("config", None, 10, Some(&by_file)).unwrap();
        assert_eq!(res.len(), 1);

        let langs = ["python"];
        let both = SearchFilter { languages: &langs, file_path: Some("web/config.ts") };
        assert!(idx.search("config", None, 10, Some(&both)).unwrap().is_empty());
    }

    #[test]
    fn test_zero_k_and_empty_index() {
        let idx = index();
        assert!(idx.search("anything", None, 5, None).unwrap().is_empty());
        let idx = seeded();
        assert!(idx.search("anything", None, 0, None).unwrap().is_empty());
    }
}
