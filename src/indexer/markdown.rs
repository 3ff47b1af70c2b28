use pulldown_cmark::{Event, Options, Parser as CmarkParser, Tag, TagEnd};

use super::languages::{extension, file_stem};
use super::{Parser, line_chunk, line_count};
use crate::error::Result;
use crate::models::{CodeChunk, Relationship};

/// One chunk per heading-delimited section, named after the heading.
/// Text before the first heading is its own section, named after the file.
#[derive(Default)]
pub struct MarkdownParser;

impl MarkdownParser {
    pub fn new() -> Self {
        Self
    }
}

struct Heading {
    line: usize,
    title: String,
}

/// Headings with their 1-based starting line. Headings inside code blocks
/// are not headings.
fn headings(content: &str) -> Vec<Heading> {
    let mut found = Vec::new();
    let mut current: Option<Heading> = None;

    for (event, range) in CmarkParser::new_ext(content, Options::empty()).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                current = Some(Heading {
                    line: content[..range.start].matches('\n').count() + 1,
                    title: String::new(),
                });
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some(h) = current.as_mut() {
                    h.title.push_str(&text);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(h) = current.take() {
                    found.push(h);
                }
            }
            _ => {}
        }
    }
    found
}

impl Parser for MarkdownParser {
    fn language(&self) -> &str {
        "markdown"
    }

    fn can_parse(&self, path: &str) -> bool {
        matches!(extension(path).as_deref(), Some("md" | "markdown"))
    }

    fn parse(&self, path: &str, content: &str) -> Result<Vec<CodeChunk>> {
        let lines: Vec<&str> = content.split('\n').collect();
        let total = line_count(content);
        let stem = file_stem(path);

        // (first line, title) of every section, the preamble included.
        let mut starts: Vec<(usize, String)> = vec![(1, stem.to_string())];
        for h in headings(content) {
            if h.line == 1 {
                starts[0].1 = h.title;
            } else {
                starts.push((h.line, h.title));
            }
        }

        let mut chunks = Vec::new();
        for (i, (start, title)) in starts.iter().enumerate() {
            let end = starts.get(i + 1).map_or(total, |(next, _)| next - 1);
            let text = lines[start - 1..end].join("\n");
            if text.trim().is_empty() {
                continue;
            }
            let name = if title.trim().is_empty() { stem } else { title.trim() };
            chunks.push(line_chunk(path, "markdown", Some(name.to_string()), *start, end, text));
        }

        if chunks.is_empty() {
            chunks.push(line_chunk(
                path,
                "markdown",
                Some(stem.to_string()),
                1,
                total,
                content.to_string(),
            ));
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
