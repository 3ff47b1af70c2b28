//! Dependency graph: a directed, labeled multigraph over node ids.
//!
//! Edges are keyed by `(source, target, relation)`, so at most one edge of
//! each kind links two ids. An edge may point at an id that has no node
//! yet; it starts resolving as soon as that node is added.
//!
//! ```
//! use codemem::graph::KnowledgeGraph;
//! use codemem::models::{Relationship, RelationType};
//!
//! let mut graph = KnowledgeGraph::new();
//! graph.add_relationship(Relationship::new("function:b.py:g", "function:a.py:f", RelationType::Calls));
//! assert_eq!(graph.get_dependents("function:a.py:f", 1), vec!["function:b.py:g".to_string()]);
//! ```
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::models::{GraphNode, RelationType, Relationship, SymbolType, file_node_id};

mod persist;
mod traversal;

pub(crate) type EdgeKey = (String, String, RelationType);

/// Which edges to follow from a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Edges pointing at the node: its dependents.
    Incoming,
    /// Edges leaving the node: its dependencies.
    Outgoing,
    #[default]
    Both,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    nodes: BTreeMap<String, GraphNode>,
    edges: BTreeMap<EdgeKey, Relationship>,
    outgoing: HashMap<String, BTreeSet<EdgeKey>>,
    incoming: HashMap<String, BTreeSet<EdgeKey>>,
    by_file: HashMap<String, BTreeSet<String>>,
}

fn edge_key(rel: &Relationship) -> EdgeKey {
    (
        rel.source_id.clone(),
        rel.target_id.clone(),
        rel.relation_type,
    )
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Nodes ────────────────────────────────────────────────────────

    /// Insert or replace a node.
    pub fn add_node(&mut self, node: GraphNode) {
        if let Some(old) = self.nodes.get(&node.id) {
            if old.file_path != node.file_path {
                if let Some(path) = old.file_path.clone() {
                    self.unindex_file(&path, &node.id);
                }
            }
        }
        if let Some(path) = &node.file_path {
            self.by_file
                .entry(path.clone())
                .or_default()
                .insert(node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
    }

    /// Remove a node and every edge that touches it, in either direction.
    pub fn remove_node(&mut self, id: &str) -> Option<GraphNode> {
        let node = self.nodes.remove(id)?;
        if let Some(path) = &node.file_path {
            self.unindex_file(path, id);
        }
        let touching: Vec<EdgeKey> = self
            .outgoing
            .get(id)
            .into_iter()
            .chain(self.incoming.get(id))
            .flatten()
            .cloned()
            .collect();
        for key in touching {
            self.remove_edge_by_key(&key);
        }
        Some(node)
    }

    /// Remove every node defined in `file_path` together with the edges
    /// those nodes (or the file's synthetic `file:` id) originate.
    ///
    /// Edges from other files that point into this file are kept as
    /// dangling references and resolve again once the file is re-indexed.
    /// Returns the number of nodes removed.
    pub fn remove_nodes_by_file(&mut self, file_path: &str) -> usize {
        let ids: Vec<String> = self
            .by_file
            .remove(file_path)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        let mut sources = ids.clone();
        sources.push(file_node_id(file_path));
        for source in &sources {
            let owned: Vec<EdgeKey> = self
                .outgoing
                .get(source)
                .map(|keys| keys.iter().cloned().collect())
                .unwrap_or_default();
            for key in owned {
                self.remove_edge_by_key(&key);
            }
        }

        for id in &ids {
            self.nodes.remove(id);
        }
        ids.len()
    }

    pub fn get_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Whether `id` is a node or the endpoint of any edge.
    pub fn contains_id(&self, id: &str) -> bool {
        self.nodes.contains_key(id) || self.outgoing.contains_key(id) || self.incoming.contains_key(id)
    }

    pub fn get_nodes_by_file(&self, file_path: &str) -> Vec<&GraphNode> {
        self.by_file
            .get(file_path)
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }

    /// Case-insensitive substring match on node names. An empty pattern
    /// matches every name; an empty `types` slice matches every kind.
    pub fn search_nodes(&self, name_pattern: &str, types: &[SymbolType]) -> Vec<&GraphNode> {
        let needle = name_pattern.to_lowercase();
        self.nodes
            .values()
            .filter(|n| types.is_empty() || types.contains(&n.node_type))
            .filter(|n| needle.is_empty() || n.name.to_lowercase().contains(&needle))
            .collect()
    }

    /// Files that own at least one node.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.by_file
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(path, _)| path.as_str())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ── Edges ────────────────────────────────────────────────────────

    /// Insert an edge, or update weight, line and metadata of the edge
    /// with the same `(source, target, relation)`.
    pub fn add_relationship(&mut self, rel: Relationship) {
        let key = edge_key(&rel);
        self.outgoing
            .entry(rel.source_id.clone())
            .or_default()
            .insert(key.clone());
        self.incoming
            .entry(rel.target_id.clone())
            .or_default()
            .insert(key.clone());
        self.edges.insert(key, rel);
    }

    /// Edges touching `id` in the given direction, optionally restricted to
    /// some relation kinds (empty means all).
    pub fn get_relationships(
        &self,
        id: &str,
        direction: Direction,
        kinds: &[RelationType],
    ) -> Vec<&Relationship> {
        let mut keys: BTreeSet<&EdgeKey> = BTreeSet::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            keys.extend(self.outgoing.get(id).into_iter().flatten());
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            keys.extend(self.incoming.get(id).into_iter().flatten());
        }
        keys.into_iter()
            .filter(|k| kinds.is_empty() || kinds.contains(&k.2))
            .filter_map(|k| self.edges.get(k))
            .collect()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.edges.values()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.outgoing.clear();
        self.incoming.clear();
        self.by_file.clear();
    }

    /// Ids one dependency hop away. `contains` edges are structural and
    /// never count as a dependency.
    pub(crate) fn neighbors(&self, id: &str, direction: Direction) -> Vec<&str> {
        let follows = |k: &&EdgeKey| k.2 != RelationType::Contains;
        let mut out = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            out.extend(
                self.outgoing
                    .get(id)
                    .into_iter()
                    .flatten()
                    .filter(follows)
                    .map(|k| k.1.as_str()),
            );
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            out.extend(
                self.incoming
                    .get(id)
                    .into_iter()
                    .flatten()
                    .filter(follows)
                    .map(|k| k.0.as_str()),
            );
        }
        out
    }

    fn remove_edge_by_key(&mut self, key: &EdgeKey) -> Option<Relationship> {
        let rel = self.edges.remove(key)?;
        if let Some(set) = self.outgoing.get_mut(&key.0) {
            set.remove(key);
            if set.is_empty() {
                self.outgoing.remove(&key.0);
            }
        }
        if let Some(set) = self.incoming.get_mut(&key.1) {
            set.remove(key);
            if set.is_empty() {
                self.incoming.remove(&key.1);
            }
        }
        Some(rel)
    }

    fn unindex_file(&mut self, path: &str, id: &str) {
        if let Some(set) = self.by_file.get_mut(path) {
            set.remove(id);
            if set.is_empty() {
                self.by_file.remove(path);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn node(id: &str, kind: SymbolType, name: &str, file: &str) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            node_type: kind,
            name: name.to_string(),
            file_path: Some(file.to_string()),
            line_start: Some(1),
            line_end: Some(2),
            metadata: BTreeMap::new(),
        }
    }

    fn calls(from: &str, to: &str) -> Relationship {
        Relationship::new(from, to, RelationType::Calls)
    }

    #[test]
    fn test_add_relationship_is_upsert() {
        let mut graph = KnowledgeGraph::new();
        graph.add_relationship(calls("a", "b").with_line(3));
        graph.add_relationship(calls("a", "b").with_line(7).with_weight(2.0));
        graph.add_relationship(Relationship::new("a", "b", RelationType::References));

        assert_eq!(graph.edge_count(), 2);
        let rels = graph.get_relationships("a", Direction::Outgoing, &[RelationType::Calls]);
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].line_number, Some(7));
        assert_eq!(rels[0].weight, 2.0);
    }

    #[test]
    fn test_add_node_is_upsert_and_moves_file_index() {
        let mut graph = KnowledgeGraph::new();
        graph.add_node(node("x", SymbolType::Function, "x", "a.py"));
        graph.add_node(node("x", SymbolType::Function, "x", "b.py"));

        assert_eq!(graph.node_count(), 1);
        assert!(graph.get_nodes_by_file("a.py").is_empty());
        assert_eq!(graph.get_nodes_by_file("b.py").len(), 1);
    }

    #[test]
    fn test_remove_node_drops_touching_edges() {
        let mut graph = KnowledgeGraph::new();
        for id in ["a", "b", "c"] {
            graph.add_node(node(id, SymbolType::Function, id, "m.py"));
        }
        graph.add_relationship(calls("a", "b"));
        graph.add_relationship(calls("b", "c"));
        graph.add_relationship(calls("a", "c"));

        assert!(graph.remove_node("b").is_some());
        assert!(graph.remove_node("b").is_none());
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.get_relationships("c", Direction::Incoming, &[])[0].source_id, "a");
    }

    #[test]
    fn test_remove_nodes_by_file_keeps_foreign_incoming_edges() {
        let mut graph = KnowledgeGraph::new();
        graph.add_node(node("function:a.py:f", SymbolType::Function, "f", "a.py"));
        graph.add_node(node("function:a.py:h", SymbolType::Function, "h", "a.py"));
        graph.add_node(node("function:b.py:g", SymbolType::Function, "g", "b.py"));
        graph.add_relationship(calls("function:a.py:f", "function:a.py:h"));
        graph.add_relationship(calls("function:b.py:g", "function:a.py:f"));
        graph.add_relationship(Relationship::new(
            "file:a.py",
            "module:os",
            RelationType::Imports,
        ));

        assert_eq!(graph.remove_nodes_by_file("a.py"), 2);

        assert!(graph.get_nodes_by_file("a.py").is_empty());
        assert_eq!(graph.node_count(), 1);
        // b.py's call survives as a dangling reference.
        assert_eq!(graph.edge_count(), 1);
        assert!(!graph.has_node("function:a.py:f"));
        assert!(graph.get_relationships("file:a.py", Direction::Outgoing, &[]).is_empty());
    }

    #[test]
    fn test_search_nodes() {
        let mut graph = KnowledgeGraph::new();
        graph.add_node(node("class:m.py:Parser", SymbolType::Class, "Parser", "m.py"));
        graph.add_node(node("function:m.py:parse", SymbolType::Function, "parse", "m.py"));
        graph.add_node(node("function:m.py:emit", SymbolType::Function, "emit", "m.py"));

        assert_eq!(graph.search_nodes("PARS", &[]).len(), 2);
        let funcs = graph.search_nodes("pars", &[SymbolType::Function]);
        assert_eq!(funcs.len(), 1);
        assert_eq!(funcs[0].name, "parse");
        assert_eq!(graph.search_nodes("", &[SymbolType::Function]).len(), 2);
        assert!(graph.search_nodes("zzz", &[]).is_empty());
    }

    #[test]
    fn test_get_relationships_direction_and_kind() {
        let mut graph = KnowledgeGraph::new();
        graph.add_relationship(calls("a", "b"));
        graph.add_relationship(Relationship::new("c", "a", RelationType::Inherits));
        graph.add_relationship(calls("a", "a"));

        assert_eq!(graph.get_relationships("a", Direction::Outgoing, &[]).len(), 2);
        assert_eq!(graph.get_relationships("a", Direction::Incoming, &[]).len(), 2);
        // The self-loop is reported once.
        assert_eq!(graph.get_relationships("a", Direction::Both, &[]).len(), 3);
        assert_eq!(
            graph
                .get_relationships("a", Direction::Both, &[RelationType::Inherits])
                .len(),
            1
        );
    }

    #[test]
    fn test_clear() {
        let mut graph = KnowledgeGraph::new();
        graph.add_node(node("a", SymbolType::File, "a", "a.py"));
        graph.add_relationship(calls("a", "b"));
        graph.clear();
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.edge_count(), 0);
        assert!(!graph.contains_id("a"));
    }
}
