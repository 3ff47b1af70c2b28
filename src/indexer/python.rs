//! Python strategy built on tree-sitter.
//!
//! Chunks: one for the whole file, then every class, function and method.
//! Relationships:
//! - `imports` from `file:<path>` to `module:<dotted>`.
//! - `inherits` from a class to its bases.
//! - `calls` from the enclosing function or method to the callee.
//! - `contains` from `file:<path>` to every symbol chunk.
//!
//! A callee or base defined in the same file resolves to its symbol id. A
//! name brought in with `from pkg.mod import name` resolves into
//! `pkg/mod.py`. Anything else is left as a dangling `function:<name>` or
//! `class:<name>` id.
use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tree_sitter::{Language, Node, Parser as TsParser, Query, QueryCursor, StreamingIterator, Tree};

use super::languages::{extension, file_stem};
use super::{ParsedFile, Parser, line_chunk, line_count, truncate_chars};
use crate::error::{Error, Result};
use crate::fingerprint::hash_content;
use crate::models::{CodeChunk, RelationType, Relationship, SymbolType, file_node_id, symbol_id};

const CALL_QUERY: &str = r#"
(call
  function: [(identifier) (attribute)] @call)
"#;

pub struct PythonParser {
    language: Language,
    call_query: Query,
    max_chunk_chars: usize,
}

/// Chunks of one file plus the lookup tables used to resolve names.
#[derive(Default)]
struct Outline {
    chunks: Vec<CodeChunk>,
    seen: HashSet<String>,
    /// Start byte of a definition node -> its chunk.
    owners: HashMap<usize, Owner>,
    /// Dotted name within the file (`outer.inner`) -> id.
    qualified: HashMap<String, String>,
    /// Module-level function and class names -> id; first definition wins.
    locals: HashMap<String, String>,
    /// Same for definitions nested in a function or class body.
    nested: HashMap<String, String>,
    /// (qualified class, method) -> id.
    methods: HashMap<(String, String), String>,
}

impl Outline {
    fn add(&mut self, def_start: usize, chunk: CodeChunk) {
        let name = chunk.symbol_name.clone().unwrap_or_default();
        let class = match (chunk.symbol_type, &chunk.parent_symbol) {
            (SymbolType::Method, Some(class)) => {
                self.methods
                    .entry((class.clone(), name.clone()))
                    .or_insert_with(|| chunk.id.clone());
                Some(class.clone())
            }
            (_, Some(_)) => {
                self.nested
                    .entry(name.clone())
                    .or_insert_with(|| chunk.id.clone());
                None
            }
            (_, None) => {
                self.locals
                    .entry(name.clone())
                    .or_insert_with(|| chunk.id.clone());
                None
            }
        };
        let qualified = qualify(chunk.parent_symbol.as_deref(), &name);
        self.qualified
            .entry(qualified.clone())
            .or_insert_with(|| chunk.id.clone());
        self.owners.insert(
            def_start,
            Owner {
                id: chunk.id.clone(),
                class,
                qualified,
            },
        );
        if self.seen.insert(chunk.id.clone()) {
            self.chunks.push(chunk);
        }
    }

    /// A bare name defined in this file, module level first.
    fn local(&self, name: &str) -> Option<&String> {
        self.locals.get(name).or_else(|| self.nested.get(name))
    }
}

/// A function, method or class definition with a chunk.
struct Owner {
    id: String,
    /// Qualified class name when the definition is a method.
    class: Option<String>,
    qualified: String,
}

/// Where a `from ... import name` binding points.
struct ImportedName {
    module_file: String,
    name: String,
}

struct Source<'a> {
    path: &'a str,
    text: &'a str,
    lines: Vec<&'a str>,
}

impl<'a> Source<'a> {
    fn new(path: &'a str, text: &'a str) -> Self {
        Self {
            path,
            text,
            lines: text.split('\n').collect(),
        }
    }

    fn bytes(&self) -> &'a [u8] {
        self.text.as_bytes()
    }

    fn node_text(&self, node: Node) -> &'a str {
        self.text.get(node.start_byte()..node.end_byte()).unwrap_or("")
    }

    fn field_text(&self, node: Node, field: &str) -> Option<&'a str> {
        node.child_by_field_name(field).map(|n| self.node_text(n))
    }
}

impl PythonParser {
    pub fn new(max_chunk_chars: usize) -> Result<Self> {
        let language: Language = tree_sitter_python::LANGUAGE.into();
        let call_query = Query::new(&language, CALL_QUERY)
            .map_err(|e| Error::Config(format!("python call query: {e}")))?;
        Ok(Self {
            language,
            call_query,
            max_chunk_chars,
        })
    }

    /// Syntax tree of `content`, or `None` when it does not parse cleanly.
    fn parse_tree(&self, content: &str) -> Option<Tree> {
        let mut parser = TsParser::new();
        parser.set_language(&self.language).ok()?;
        let tree = parser.parse(content, None)?;
        if tree.root_node().has_error() {
            None
        } else {
            Some(tree)
        }
    }

    fn file_chunk(&self, src: &Source, docstring: Option<String>) -> CodeChunk {
        let mut chunk = line_chunk(
            src.path,
            "python",
            Some(file_stem(src.path).to_string()),
            1,
            line_count(src.text),
            truncate_chars(src.text, self.max_chunk_chars).to_string(),
        );
        chunk.docstring = docstring;
        chunk
    }

    fn outline(&self, tree: &Tree, src: &Source) -> Outline {
        let root = tree.root_node();
        let mut outline = Outline::default();
        let file = self.file_chunk(src, docstring(Some(root), src));
        outline.seen.insert(file.id.clone());
        outline.chunks.push(file);
        self.walk_block(root, src, None, None, &mut outline);
        outline
    }

    /// Visit the statements of `block`. `scope` is the dotted name of the
    /// enclosing definitions; definitions directly inside a class body are
    /// methods of `class`. A function nested in `outer` gets the id
    /// `function:<path>:outer.inner`, so it never collides with a
    /// module-level `inner`.
    fn walk_block(
        &self,
        block: Node,
        src: &Source,
        scope: Option<&str>,
        class: Option<&str>,
        out: &mut Outline,
    ) {
        let mut cursor = block.walk();
        for child in block.named_children(&mut cursor) {
            let def = if child.kind() == "decorated_definition" {
                child.child_by_field_name("definition")
            } else {
                Some(child)
            };
            let Some(def) = def else { continue };

            match def.kind() {
                "class_definition" => {
                    let Some(name) = src.field_text(def, "name") else { continue };
                    out.add(
                        def.start_byte(),
                        self.symbol_chunk(def, src, SymbolType::Class, name, scope),
                    );
                    let qualified = qualify(scope, name);
                    if let Some(body) = def.child_by_field_name("body") {
                        self.walk_block(body, src, Some(&qualified), Some(&qualified), out);
                    }
                }
                "function_definition" => {
                    let Some(name) = src.field_text(def, "name") else { continue };
                    let kind = if class.is_some() {
                        SymbolType::Method
                    } else {
                        SymbolType::Function
                    };
                    out.add(def.start_byte(), self.symbol_chunk(def, src, kind, name, scope));
                    let qualified = qualify(scope, name);
                    if let Some(body) = def.child_by_field_name("body") {
                        self.walk_block(body, src, Some(&qualified), None, out);
                    }
                }
                _ => self.walk_block(child, src, scope, None, out),
            }
        }
    }

    fn symbol_chunk(
        &self,
        def: Node,
        src: &Source,
        kind: SymbolType,
        name: &str,
        parent: Option<&str>,
    ) -> CodeChunk {
        let line_start = def.start_position().row + 1;
        let line_end = (def.end_position().row + 1).min(src.lines.len());
        let content = src.lines[line_start - 1..line_end].join("\n");
        let body = def.child_by_field_name("body");

        CodeChunk {
            id: symbol_id(kind, src.path, name, parent),
            file_path: src.path.to_string(),
            language: "python".to_string(),
            symbol_name: Some(name.to_string()),
            symbol_type: kind,
            line_start,
            line_end,
            content_hash: hash_content(&content),
            content,
            docstring: docstring(body, src),
            signature: signature(def, body, src),
            parent_symbol: parent.map(str::to_string),
            last_indexed: Utc::now(),
        }
    }

    fn relationships(
        &self,
        tree: &Tree,
        src: &Source,
        outline: &Outline,
        chunks: &[CodeChunk],
    ) -> Vec<Relationship> {
        let root = tree.root_node();
        let file_id = file_node_id(src.path);
        let mut rels = Vec::new();
        let mut imported: HashMap<String, ImportedName> = HashMap::new();

        // Imports
        for node in descendants(root, &["import_statement", "import_from_statement"]) {
            let line = node.start_position().row + 1;
            if node.kind() == "import_statement" {
                let mut cursor = node.walk();
                for name in node.children_by_field_name("name", &mut cursor) {
                    let dotted = match name.kind() {
                        "aliased_import" => src.field_text(name, "name"),
                        _ => Some(src.node_text(name)),
                    };
                    if let Some(dotted) = dotted {
                        rels.push(
                            Relationship::new(&file_id, format!("module:{dotted}"), RelationType::Imports)
                                .with_line(line),
                        );
                    }
                }
                continue;
            }

            let Some(module) = node.child_by_field_name("module_name") else { continue };
            let module_text = src.node_text(module);
            let dots = module_text.chars().take_while(|c| *c == '.').count();
            let dotted = &module_text[dots..];
            let module_file = module_file(src.path, dots, dotted);

            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                let (original, bound) = match name.kind() {
                    "aliased_import" => match (src.field_text(name, "name"), src.field_text(name, "alias")) {
                        (Some(n), Some(a)) => (n, a),
                        _ => continue,
                    },
                    _ => (src.node_text(name), src.node_text(name)),
                };
                if !dotted.is_empty() {
                    rels.push(
                        Relationship::new(
                            &file_id,
                            format!("module:{dotted}.{original}"),
                            RelationType::Imports,
                        )
                        .with_line(line),
                    );
                }
                if let Some(module_file) = &module_file {
                    imported.insert(
                        bound.to_string(),
                        ImportedName {
                            module_file: module_file.clone(),
                            name: original.to_string(),
                        },
                    );
                }
            }
        }

        // Inheritance
        for class in descendants(root, &["class_definition"]) {
            let Some(Owner { id: class_id, .. }) = outline.owners.get(&class.start_byte()) else {
                continue;
            };
            let Some(bases) = class.child_by_field_name("superclasses") else { continue };
            let line = class.start_position().row + 1;
            let mut cursor = bases.walk();
            for base in bases.named_children(&mut cursor) {
                let Some(base_name) = dotted_name(base, src) else { continue };
                let target = match (outline.local(&base_name), imported.get(&base_name)) {
                    (Some(id), _) if id.starts_with("class:") => id.clone(),
                    (_, Some(imp)) => format!("class:{}:{}", imp.module_file, imp.name),
                    _ => format!("class:{base_name}"),
                };
                rels.push(Relationship::new(class_id, target, RelationType::Inherits).with_line(line));
            }
        }

        // Calls
        let mut seen_calls: HashSet<(String, String)> = HashSet::new();
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&self.call_query, root, src.bytes());
        while let Some(m) = matches.next() {
            for cap in m.captures {
                let Some(owner) = enclosing_owner(cap.node, outline) else {
                    continue;
                };
                let Some(callee) = dotted_name(cap.node, src) else { continue };
                let target = resolve_call(&callee, owner, outline, &imported);
                if seen_calls.insert((owner.id.clone(), target.clone())) {
                    rels.push(
                        Relationship::new(owner.id.clone(), target, RelationType::Calls)
                            .with_line(cap.node.start_position().row + 1),
                    );
                }
            }
        }

        // Containment
        for chunk in chunks.iter().filter(|c| c.symbol_type != SymbolType::File) {
            rels.push(Relationship::new(&file_id, &chunk.id, RelationType::Contains));
        }

        rels
    }
}

impl Parser for PythonParser {
    fn language(&self) -> &str {
        "python"
    }

    fn can_parse(&self, path: &str) -> bool {
        matches!(extension(path).as_deref(), Some("py" | "pyi"))
    }

    fn parse(&self, path: &str, content: &str) -> Result<Vec<CodeChunk>> {
        let src = Source::new(path, content);
        Ok(match self.parse_tree(content) {
            Some(tree) => self.outline(&tree, &src).chunks,
            None => vec![self.file_chunk(&src, None)],
        })
    }

    fn extract_relationships(
        &self,
        path: &str,
        content: &str,
        chunks: &[CodeChunk],
    ) -> Result<Vec<Relationship>> {
        let src = Source::new(path, content);
        let Some(tree) = self.parse_tree(content) else {
            return Ok(Vec::new());
        };
        let outline = self.outline(&tree, &src);
        Ok(self.relationships(&tree, &src, &outline, chunks))
    }

    fn parse_file(&self, path: &str, content: &str) -> Result<ParsedFile> {
        let src = Source::new(path, content);
        let Some(tree) = self.parse_tree(content) else {
            return Ok(ParsedFile {
                chunks: vec![self.file_chunk(&src, None)],
                relationships: Vec::new(),
            });
        };
        let outline = self.outline(&tree, &src);
        let relationships = self.relationships(&tree, &src, &outline, &outline.chunks);
        Ok(ParsedFile {
            chunks: outline.chunks,
            relationships,
        })
    }
}

// ── Tree helpers ─────────────────────────────────────────────────────

/// Every node under `root` (inclusive) whose kind is one of `kinds`, in
/// document order.
fn descendants<'t>(root: Node<'t>, kinds: &[&str]) -> Vec<Node<'t>> {
    let mut found = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if kinds.contains(&node.kind()) {
            found.push(node);
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    found
}

fn qualify(scope: Option<&str>, name: &str) -> String {
    match scope {
        Some(scope) => format!("{scope}.{name}"),
        None => name.to_string(),
    }
}

/// `a`, `a.b.c`; for `f().x` just the attribute.
fn dotted_name(node: Node, src: &Source) -> Option<String> {
    match node.kind() {
        "identifier" => Some(src.node_text(node).to_string()),
        "attribute" => {
            let attr = src.field_text(node, "attribute")?;
            match node
                .child_by_field_name("object")
                .and_then(|obj| dotted_name(obj, src))
            {
                Some(obj) => Some(format!("{obj}.{attr}")),
                None => Some(attr.to_string()),
            }
        }
        _ => None,
    }
}

/// The innermost function or method around `node` that has a chunk.
fn enclosing_owner<'o>(node: Node, outline: &'o Outline) -> Option<&'o Owner> {
    let mut current = node.parent();
    while let Some(n) = current {
        if n.kind() == "function_definition" {
            if let Some(owner) = outline.owners.get(&n.start_byte()) {
                return Some(owner);
            }
        }
        current = n.parent();
    }
    None
}

/// Target id for a call to `callee` made inside `owner`. Bare names are
/// looked up in the enclosing function scopes first, innermost out.
fn resolve_call(
    callee: &str,
    owner: &Owner,
    outline: &Outline,
    imported: &HashMap<String, ImportedName>,
) -> String {
    if let (Some(class), Some((receiver, method))) = (&owner.class, callee.split_once('.')) {
        if matches!(receiver, "self" | "cls") {
            if let Some(id) = outline.methods.get(&(class.clone(), method.to_string())) {
                return id.clone();
            }
        }
    }
    if !callee.contains('.') {
        let mut scope = Some(owner.qualified.as_str());
        while let Some(current) = scope {
            // Class bodies are not a scope for bare names.
            if let Some(id) = outline.qualified.get(&format!("{current}.{callee}")) {
                if !id.starts_with("method:") {
                    return id.clone();
                }
            }
            scope = current.rsplit_once('.').map(|(parent, _)| parent);
        }
        if let Some(id) = outline.local(callee) {
            return id.clone();
        }
        if let Some(imp) = imported.get(callee) {
            return format!("function:{}:{}", imp.module_file, imp.name);
        }
    }
    format!("function:{callee}")
}

/// Project-relative file a `from` import points at. `dots` is the
/// relative-import level.
fn module_file(current: &str, dots: usize, dotted: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    if dots > 0 {
        parts.extend(current.split('/'));
        parts.pop();
        for _ in 1..dots {
            parts.pop()?;
        }
    }
    if dotted.is_empty() {
        parts.push("__init__.py");
        return Some(parts.join("/"));
    }
    let mut segments: Vec<&str> = dotted.split('.').collect();
    let last = segments.pop()?;
    parts.extend(segments);
    let file = format!("{last}.py");
    Some(
        parts
            .iter()
            .copied()
            .chain([file.as_str()])
            .collect::<Vec<_>>()
            .join("/"),
    )
}

/// Docstring of a module or block: a string literal as its first statement.
fn docstring(block: Option<Node>, src: &Source) -> Option<String> {
    let block = block?;
    let mut cursor = block.walk();
    let first = block
        .named_children(&mut cursor)
        .find(|n| n.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let mut inner = first.walk();
    let string = first.named_children(&mut inner).next()?;
    if string.kind() != "string" {
        return None;
    }
    let mut parts = string.walk();
    let raw: String = string
        .named_children(&mut parts)
        .filter(|n| n.kind() == "string_content")
        .map(|n| src.node_text(n))
        .collect();
    clean_docstring(&raw)
}

/// Strip the common indentation of continuation lines and blank edges.
fn clean_docstring(raw: &str) -> Option<String> {
    let lines: Vec<&str> = raw.lines().collect();
    let indent = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let mut cleaned: Vec<String> = Vec::with_capacity(lines.len());
    if let Some(first) = lines.first() {
        cleaned.push(first.trim().to_string());
    }
    for line in lines.iter().skip(1) {
        cleaned.push(line.get(indent..).unwrap_or("").trim_end().to_string());
    }
    let text = cleaned.join("\n");
    let text = text.trim_matches('\n').trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Header of a definition up to its body, whitespace-collapsed and
/// without the trailing colon.
fn signature(def: Node, body: Option<Node>, src: &Source) -> Option<String> {
    let end = body.map_or(def.end_byte(), |b| b.start_byte());
    let header = src.text.get(def.start_byte()..end)?;
    let header = header.trim().trim_end_matches(':');
    let collapsed = header.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}
