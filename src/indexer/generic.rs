use super::languages::{file_stem, language_for_path};
use super::{Parser, line_chunk, line_count};
use crate::error::Result;
use crate::models::{CodeChunk, Relationship};

/// Fallback strategy: one chunk for a small file, otherwise consecutive
/// runs of whole lines of at most `max_chunk_chars` each.
pub struct GenericParser {
    max_chunk_chars: usize,
}

impl GenericParser {
    pub fn new(max_chunk_chars: usize) -> Self {
        Self {
            max_chunk_chars: max_chunk_chars.max(1),
        }
    }
}

impl Parser for GenericParser {
    fn language(&self) -> &str {
        "generic"
    }

    fn can_parse(&self, _path: &str) -> bool {
        true
    }

    fn parse(&self, path: &str, content: &str) -> Result<Vec<CodeChunk>> {
        let language = language_for_path(path);
        let total_lines = line_count(content);

        if content.chars().count() <= self.max_chunk_chars {
            return Ok(vec![line_chunk(
                path,
                language,
                Some(file_stem(path).to_string()),
                1,
                total_lines,
                content.to_string(),
            )]);
        }

        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut start = 1;
        let mut size = 0;

        for (i, line) in content.split('\n').enumerate() {
            let line_no = i + 1;
            let line_size = line.chars().count() + 1;
            if size + line_size > self.max_chunk_chars && !current.is_empty() {
                chunks.push(line_chunk(path, language, None, start, line_no - 1, current.join("\n")));
                current.clear();
                start = line_no;
                size = 0;
            }
            current.push(line);
            size += line_size;
        }
        if !current.is_empty() {
            chunks.push(line_chunk(path, language, None, start, total_lines, current.join("\n")));
        }

        Ok(chunks)
    }

    fn extract_relationships(
        &self,
        _path: &str,
        _content: &str,
        _chunks: &[CodeChunk],
    ) -> Result<Vec<Relationship>> {
        Ok(Vec::new())
    }
}
