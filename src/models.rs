//! Records shared by the semantic index and the dependency graph.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of symbol a chunk or node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolType {
    File,
    Module,
    Class,
    Function,
    Method,
    Variable,
    Constant,
    Import,
    Decorator,
}

impl SymbolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolType::File => "file",
            SymbolType::Module => "module",
            SymbolType::Class => "class",
            SymbolType::Function => "function",
            SymbolType::Method => "method",
            SymbolType::Variable => "variable",
            SymbolType::Constant => "constant",
            SymbolType::Import => "import",
            SymbolType::Decorator => "decorator",
        }
    }
}

impl fmt::Display for SymbolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SymbolType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "file" => SymbolType::File,
            "module" => SymbolType::Module,
            "class" => SymbolType::Class,
            "function" => SymbolType::Function,
            "method" => SymbolType::Method,
            "variable" => SymbolType::Variable,
            "constant" => SymbolType::Constant,
            "import" => SymbolType::Import,
            "decorator" => SymbolType::Decorator,
            other => return Err(format!("unknown symbol type: {other}")),
        })
    }
}

/// Kind of a directed relationship between two node ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Imports,
    Calls,
    Inherits,
    Implements,
    References,
    Contains,
    DependsOn,
    Decorates,
    Instantiates,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Imports => "imports",
            RelationType::Calls => "calls",
            RelationType::Inherits => "inherits",
            RelationType::Implements => "implements",
            RelationType::References => "references",
            RelationType::Contains => "contains",
            RelationType::DependsOn => "depends_on",
            RelationType::Decorates => "decorates",
            RelationType::Instantiates => "instantiates",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of source text that is embedded and retrieved as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChunk {
    pub id: String,
    pub file_path: String,
    pub language: String,
    pub symbol_name: Option<String>,
    pub symbol_type: SymbolType,
    pub line_start: usize,
    pub line_end: usize,
    pub content: String,
    pub docstring: Option<String>,
    pub signature: Option<String>,
    pub parent_symbol: Option<String>,
    pub content_hash: String,
    pub last_indexed: DateTime<Utc>,
}

impl CodeChunk {
    /// Text fed to the embedding backend: kind and name first, then
    /// signature and docs, then the raw code.
    pub fn embedding_text(&self) -> String {
        let mut parts = Vec::with_capacity(4);
        if let Some(name) = &self.symbol_name {
            parts.push(format!("{}: {}", self.symbol_type, name));
        }
        if let Some(sig) = &self.signature {
            parts.push(format!("Signature: {sig}"));
        }
        if let Some(doc) = &self.docstring {
            parts.push(format!("Documentation: {doc}"));
        }
        parts.push(format!("Code:\n{}", self.content));
        parts.join("\n")
    }

    /// The graph-side mirror of this chunk.
    pub fn to_node(&self) -> GraphNode {
        GraphNode {
            id: self.id.clone(),
            node_type: self.symbol_type,
            name: self
                .symbol_name
                .clone()
                .unwrap_or_else(|| self.file_path.clone()),
            file_path: Some(self.file_path.clone()),
            line_start: Some(self.line_start),
            line_end: Some(self.line_end),
            metadata: BTreeMap::new(),
        }
    }
}

/// Node of the dependency graph. Unknown attributes found in a persisted
/// graph are kept in `metadata` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub node_type: SymbolType,
    pub name: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub line_start: Option<usize>,
    #[serde(default)]
    pub line_end: Option<usize>,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

fn default_weight() -> f64 {
    1.0
}

/// Directed, typed edge between two node ids. The target may not exist
/// as a node yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "source")]
    pub source_id: String,
    #[serde(rename = "target")]
    pub target_id: String,
    pub relation_type: RelationType,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub line_number: Option<usize>,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Relationship {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation_type,
            weight: default_weight(),
            line_number: None,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_line(mut self, line: usize) -> Self {
        self.line_number = Some(line);
        self
    }

    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// The endpoint that is not `id`.
    pub fn other_end(&self, id: &str) -> &str {
        if self.source_id == id {
            &self.target_id
        } else {
            &self.source_id
        }
    }
}

/// Lifecycle of a recorded decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    #[default]
    Active,
    Superseded,
    Deprecated,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Active => "active",
            DecisionStatus::Superseded => "superseded",
            DecisionStatus::Deprecated => "deprecated",
        }
    }
}

impl FromStr for DecisionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(DecisionStatus::Active),
            "superseded" => Ok(DecisionStatus::Superseded),
            "deprecated" => Ok(DecisionStatus::Deprecated),
            other => Err(format!("unknown decision status: {other}")),
        }
    }
}

/// An architectural decision recorded alongside the code. Decisions are
/// not derived from files, so syncs never remove them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub context: String,
    pub rationale: String,
    #[serde(default)]
    pub related_files: Vec<String>,
    #[serde(default)]
    pub related_symbols: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: DecisionStatus,
}

impl Decision {
    /// A new active decision stamped now. The id is derived from the
    /// title and the timestamp.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        let title = title.into();
        let timestamp = Utc::now();
        let seed = format!("{title}\n{}", timestamp.to_rfc3339());
        let hash = crate::fingerprint::hash_content(seed);
        Self {
            id: format!("decision:{}", &hash[..16]),
            timestamp,
            title,
            description: description.into(),
            context: String::new(),
            rationale: rationale.into(),
            related_files: Vec::new(),
            related_symbols: Vec::new(),
            tags: Vec::new(),
            status: DecisionStatus::Active,
        }
    }

    /// Text fed to the embedding backend.
    pub fn embedding_text(&self) -> String {
        let mut text = format!("{}\n\n{}", self.title, self.description);
        if !self.context.is_empty() {
            text.push_str(&format!("\n\nContext: {}", self.context));
        }
        text.push_str(&format!("\n\nRationale: {}", self.rationale));
        if !self.tags.is_empty() {
            text.push_str(&format!("\n\nTags: {}", self.tags.join(", ")));
        }
        text
    }
}

/// Id of a line-addressed chunk: `<file>:<start>:<end>`.
pub fn chunk_id(file_path: &str, line_start: usize, line_end: usize) -> String {
    format!("{file_path}:{line_start}:{line_end}")
}

/// Id of a symbol-addressed chunk: `<kind>:<file>:<qualified name>`.
/// Methods are qualified with their parent, e.g. `Parser.parse`.
pub fn symbol_id(
    symbol_type: SymbolType,
    file_path: &str,
    name: &str,
    parent: Option<&str>,
) -> String {
    match parent {
        Some(parent) => format!("{symbol_type}:{file_path}:{parent}.{name}"),
        None => format!("{symbol_type}:{file_path}:{name}"),
    }
}

/// Synthetic source id used for file-level `imports` and `contains` edges.
pub fn file_node_id(file_path: &str) -> String {
    format!("file:{file_path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk() -> CodeChunk {
        CodeChunk {
            id: symbol_id(SymbolType::Method, "src/app.py", "run", Some("App")),
            file_path: "src/app.py".into(),
            language: "python".into(),
            symbol_name: Some("run".into()),
            symbol_type: SymbolType::Method,
            line_start: 4,
            line_end: 9,
            content: "def run(self):\n    pass".into(),
            docstring: Some("Start the app.".into()),
            signature: Some("def run(self)".into()),
            parent_symbol: Some("App".into()),
            content_hash: "abc".into(),
            last_indexed: Utc::now(),
        }
    }

    #[test]
    fn test_id_schemes() {
        assert_eq!(chunk_id("a.py", 1, 12), "a.py:1:12");
        assert_eq!(
            symbol_id(SymbolType::Function, "a.py", "f", None),
            "function:a.py:f"
        );
        assert_eq!(chunk().id, "method:src/app.py:App.run");
        assert_eq!(file_node_id("a.py"), "file:a.py");
    }

    #[test]
    fn test_embedding_text_layout() {
        let text = chunk().embedding_text();
        assert_eq!(
            text,
            "method: run\nSignature: def run(self)\nDocumentation: Start the app.\nCode:\ndef run(self):\n    pass"
        );
    }

    #[test]
    fn test_node_name_falls_back_to_path() {
        let mut c = chunk();
        c.symbol_name = None;
        let node = c.to_node();
        assert_eq!(node.name, "src/app.py");
        assert_eq!(node.id, c.id);
        assert_eq!(node.line_start, Some(4));
    }

    #[test]
    fn test_decision_defaults() {
        let mut d = Decision::new("Use SQLite", "Store vectors in sqlite-vec", "No server to run");
        assert!(d.id.starts_with("decision:"));
        assert_eq!(d.id.len(), "decision:".len() + 16);
        assert_eq!(d.status, DecisionStatus::Active);
        assert_eq!(
            d.embedding_text(),
            "Use SQLite\n\nStore vectors in sqlite-vec\n\nRationale: No server to run"
        );

        d.tags = vec!["storage".into()];
        assert!(d.embedding_text().ends_with("Tags: storage"));

        let json = r#"{"id": "decision:1", "timestamp": "2024-05-01T10:00:00Z",
            "title": "t", "description": "d", "rationale": "r"}"#;
        let parsed: Decision = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.status, DecisionStatus::Active);
        assert!(parsed.tags.is_empty());
        assert_eq!("superseded".parse::<DecisionStatus>(), Ok(DecisionStatus::Superseded));
    }

    #[test]
    fn test_relation_type_strings() {
        assert_eq!(RelationType::DependsOn.to_string(), "depends_on");
        let json = serde_json::to_string(&RelationType::Instantiates).unwrap();
        assert_eq!(json, "\"instantiates\"");
        assert_eq!("decorator".parse::<SymbolType>(), Ok(SymbolType::Decorator));
        assert!("widget".parse::<SymbolType>().is_err());
    }
}
