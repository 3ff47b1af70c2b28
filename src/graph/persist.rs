//! On-disk form of the graph: `{"nodes": [...], "edges": [...]}`.
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::KnowledgeGraph;
use crate::error::Result;
use crate::models::{GraphNode, Relationship};
use crate::persist::{load_json_or_default, write_json_atomic};

#[derive(Serialize)]
struct GraphFileRef<'a> {
    nodes: Vec<&'a GraphNode>,
    edges: Vec<&'a Relationship>,
}

#[derive(Deserialize, Default)]
struct GraphFile {
    #[serde(default)]
    nodes: Vec<GraphNode>,
    #[serde(default)]
    edges: Vec<Relationship>,
}

impl KnowledgeGraph {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.as_file())?)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let file: GraphFile = serde_json::from_str(data)?;
        Ok(Self::from_file(file))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, &self.as_file())?;
        debug!(
            "Saved graph ({} nodes, {} edges) to {}",
            self.node_count(),
            self.edge_count(),
            path.display()
        );
        Ok(())
    }

    /// Load a graph from `path`; a missing file yields an empty graph.
    pub fn load(path: &Path) -> Result<Self> {
        let file: GraphFile = load_json_or_default(path)?;
        Ok(Self::from_file(file))
    }

    fn as_file(&self) -> GraphFileRef<'_> {
        GraphFileRef {
            nodes: self.nodes().collect(),
            edges: self.relationships().collect(),
        }
    }

    fn from_file(file: GraphFile) -> Self {
        let mut graph = KnowledgeGraph::new();
        for node in file.nodes {
            graph.add_node(node);
        }
        for edge in file.edges {
            graph.add_relationship(edge);
        }
        graph
    }
}
