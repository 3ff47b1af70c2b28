//! Parsers that turn a file into chunks and relationships, and the
//! indexer that feeds them into the store.
use chrono::Utc;

use crate::error::Result;
use crate::fingerprint::hash_content;
use crate::models::{CodeChunk, Relationship, SymbolType, chunk_id};

pub mod core;
pub mod generic;
pub mod languages;
pub mod markdown;
pub mod python;

pub use self::core::{IndexStatus, Indexer, SyncStats};
pub use generic::GenericParser;
pub use markdown::MarkdownParser;
pub use python::PythonParser;

/// Output of parsing one file.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub chunks: Vec<CodeChunk>,
    pub relationships: Vec<Relationship>,
}

/// A parsing strategy for some kind of file. Paths are project-relative
/// with `/` separators.
pub trait Parser: Send + Sync {
    fn language(&self) -> &str;

    fn can_parse(&self, path: &str) -> bool;

    fn parse(&self, path: &str, content: &str) -> Result<Vec<CodeChunk>>;

    /// Relationships among `chunks` (as returned by `parse`) and the ids
    /// they reference. File-level edges use the `file:<path>` id.
    fn extract_relationships(
        &self,
        path: &str,
        content: &str,
        chunks: &[CodeChunk],
    ) -> Result<Vec<Relationship>>;

    fn parse_file(&self, path: &str, content: &str) -> Result<ParsedFile> {
        let chunks = self.parse(path, content)?;
        let relationships = self.extract_relationships(path, content, &chunks)?;
        Ok(ParsedFile {
            chunks,
            relationships,
        })
    }
}

/// Ordered parsing strategies; the first that accepts a path wins, and
/// the generic parser takes everything else.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn Parser>>,
    fallback: GenericParser,
}

impl ParserRegistry {
    /// Python and Markdown strategies in front of the generic fallback.
    pub fn new(max_chunk_chars: usize) -> Result<Self> {
        let mut registry = Self::with_fallback(GenericParser::new(max_chunk_chars));
        registry.register(Box::new(PythonParser::new(max_chunk_chars)?));
        registry.register(Box::new(MarkdownParser::new()));
        Ok(registry)
    }

    pub fn with_fallback(fallback: GenericParser) -> Self {
        Self {
            parsers: Vec::new(),
            fallback,
        }
    }

    pub fn register(&mut self, parser: Box<dyn Parser>) {
        self.parsers.push(parser);
    }

    pub fn parser_for(&self, path: &str) -> &dyn Parser {
        self.parsers
            .iter()
            .find(|p| p.can_parse(path))
            .map(|p| p.as_ref())
            .unwrap_or(&self.fallback)
    }

    pub fn parse_file(&self, path: &str, content: &str) -> Result<ParsedFile> {
        self.parser_for(path).parse_file(path, content)
    }
}

/// Line count the way chunk ids count them: a trailing newline opens one
/// more (empty) line.
pub(crate) fn line_count(content: &str) -> usize {
    content.split('\n').count()
}

/// A line-addressed chunk of kind `file`.
pub(crate) fn line_chunk(
    path: &str,
    language: &str,
    symbol_name: Option<String>,
    line_start: usize,
    line_end: usize,
    content: String,
) -> CodeChunk {
    CodeChunk {
        id: chunk_id(path, line_start, line_end),
        file_path: path.to_string(),
        language: language.to_string(),
        symbol_name,
        symbol_type: SymbolType::File,
        line_start,
        line_end,
        content_hash: hash_content(&content),
        content,
        docstring: None,
        signature: None,
        parent_symbol: None,
        last_indexed: Utc::now(),
    }
}

/// Cut `text` to at most `max_chars` characters.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_order() {
        let registry = ParserRegistry::new(4000).unwrap();
        assert_eq!(registry.parser_for("pkg/mod.py").language(), "python");
        assert_eq!(registry.parser_for("docs/guide.md").language(), "markdown");
        assert_eq!(registry.parser_for("Cargo.toml").language(), "generic");
        assert_eq!(registry.parser_for("LICENSE").language(), "generic");
    }

    #[test]
    fn test_fallback_only_registry() {
        let registry = ParserRegistry::with_fallback(GenericParser::new(100));
        let parsed = registry.parse_file("a.py", "def f():\n    pass\n").unwrap();
        assert_eq!(parsed.chunks.len(), 1);
        assert_eq!(parsed.chunks[0].language, "python");
        assert!(parsed.relationships.is_empty());
    }

    #[test]
    fn test_helpers() {
        assert_eq!(line_count(""), 1);
        assert_eq!(line_count("a\nb"), 2);
        assert_eq!(line_count("a\nb\n"), 3);
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
