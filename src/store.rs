//! Hybrid store: the single writer of both indexes.
//!
//! Every chunk written through [`HybridStore::index_chunks`] gets a graph
//! node with the same id, and [`HybridStore::remove_file`] drops both sides,
//! so chunk ids and node ids stay in bijection.
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::db::chunks::{clear_rows, delete_file_rows, write_chunks};
use crate::db::{DecisionResult, SearchFilter, SearchResult, SemanticIndex};
use crate::embedder::Embedder;
use crate::error::Result;
use crate::graph::{Direction, KnowledgeGraph};
use crate::models::{
    CodeChunk, Decision, DecisionStatus, GraphNode, RelationType, Relationship, SymbolType, file_node_id,
};

/// Related ids attached to each search hit.
pub const RELATED_LIMIT: usize = 5;

pub const VECTORS_FILE: &str = "vectors.db";
pub const GRAPH_FILE: &str = "graph.json";

#[derive(Debug, Clone, Serialize)]
pub struct ContextSearch {
    pub results: Vec<SearchResult>,
    pub affected_files: Vec<String>,
    pub affected_symbols: Vec<String>,
    pub total_results: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolInfo {
    pub symbol: GraphNode,
    pub content: Option<String>,
    pub docstring: Option<String>,
    pub signature: Option<String>,
    pub imports: Vec<Relationship>,
    pub calls: Vec<Relationship>,
    pub inherits: Vec<Relationship>,
    pub called_by: Vec<Relationship>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileContext {
    pub file_path: String,
    pub chunks: Vec<CodeChunk>,
    pub symbols: Vec<String>,
    pub relationships: Vec<Relationship>,
    pub related_files: Vec<String>,
}

/// Baseline impact figures; `ImpactAnalyzer` layers scoring on top.
#[derive(Debug, Clone, Serialize)]
pub struct ImpactSummary {
    pub changed_files: Vec<String>,
    pub changed_symbols: Vec<String>,
    pub affected_files: Vec<String>,
    pub affected_symbols: Vec<String>,
    pub impact_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total_chunks: usize,
    pub total_nodes: usize,
    pub total_relationships: usize,
    pub total_decisions: usize,
    pub indexed_files: usize,
}

pub struct HybridStore {
    index: SemanticIndex,
    graph: KnowledgeGraph,
    graph_path: Option<PathBuf>,
}

impl HybridStore {
    /// Open both indexes under `memory_dir`. When the semantic index had
    /// to drop its chunks for a new embedder, the graph is emptied too.
    pub fn open(memory_dir: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let index = SemanticIndex::open(memory_dir.join(VECTORS_FILE), embedder)?;
        let graph_path = memory_dir.join(GRAPH_FILE);
        let mut graph = KnowledgeGraph::load(&graph_path)?;
        if index.embedder_changed() && graph.node_count() + graph.edge_count() > 0 {
            graph.clear();
            graph.save(&graph_path)?;
        }
        debug!(
            "Loaded graph with {} nodes and {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        Ok(Self {
            index,
            graph,
            graph_path: Some(graph_path),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Result<Self> {
        Ok(Self {
            index: SemanticIndex::open_in_memory(embedder)?,
            graph: KnowledgeGraph::new(),
            graph_path: None,
        })
    }

    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    pub fn semantic_index(&self) -> &SemanticIndex {
        &self.index
    }

    /// See [`SemanticIndex::embedder_changed`].
    pub fn embedder_changed(&self) -> bool {
        self.index.embedder_changed()
    }

    pub fn commit_embedder(&mut self) -> Result<()> {
        self.index.commit_embedder()
    }

    // ── Writes ───────────────────────────────────────────────────────
    //
    // Each write runs its SQL in an open transaction, applies the graph
    // change and saves the graph file, and only then commits. A failed
    // graph save rolls the SQL back and reloads the graph from disk, so
    // both indexes stay as they were.

    /// Write chunks, their mirror nodes and the given relationships, then
    /// persist the graph.
    pub fn index_chunks(
        &mut self,
        chunks: &[CodeChunk],
        relationships: &[Relationship],
    ) -> Result<()> {
        if chunks.is_empty() && relationships.is_empty() {
            return Ok(());
        }
        let vectors = self.index.vectors_for(chunks, None)?;

        let tx = self.index.conn.transaction()?;
        write_chunks(&tx, chunks, &vectors)?;
        for chunk in chunks {
            self.graph.add_node(chunk.to_node());
        }
        for rel in relationships {
            self.graph.add_relationship(rel.clone());
        }
        if let Err(e) = save_graph(&self.graph, self.graph_path.as_deref()) {
            drop(tx);
            self.reload_graph();
            return Err(e);
        }
        tx.commit()?;
        Ok(())
    }

    /// Drop a file from both indexes and persist the graph. Returns the
    /// number of chunks removed.
    pub fn remove_file(&mut self, file_path: &str) -> Result<usize> {
        let tx = self.index.conn.transaction()?;
        let removed = delete_file_rows(&tx, file_path)?;
        let nodes = self.graph.remove_nodes_by_file(file_path);
        if let Err(e) = save_graph(&self.graph, self.graph_path.as_deref()) {
            drop(tx);
            self.reload_graph();
            return Err(e);
        }
        tx.commit()?;
        debug!("Removed {file_path}: {removed} chunks, {nodes} nodes");
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<()> {
        let tx = self.index.conn.transaction()?;
        clear_rows(&tx)?;
        self.graph.clear();
        if let Err(e) = save_graph(&self.graph, self.graph_path.as_deref()) {
            drop(tx);
            self.reload_graph();
            return Err(e);
        }
        tx.commit()?;
        Ok(())
    }

    /// Put the in-memory graph back to the last saved state.
    fn reload_graph(&mut self) {
        let Some(path) = &self.graph_path else { return };
        match KnowledgeGraph::load(path) {
            Ok(graph) => self.graph = graph,
            Err(e) => warn!("Could not reload graph from {}: {e}", path.display()),
        }
    }

    // ── Decisions ────────────────────────────────────────────────────

    pub fn add_decision(&mut self, decision: &Decision) -> Result<()> {
        self.index.upsert_decision(decision)?;
        debug!("Recorded decision {}", decision.id);
        Ok(())
    }

    /// Mark decision `id` superseded. False when there is no such decision.
    pub fn supersede_decision(&mut self, id: &str) -> Result<bool> {
        let Some(mut old) = self.index.get_decision(id)? else {
            return Ok(false);
        };
        old.status = DecisionStatus::Superseded;
        self.index.upsert_decision(&old)?;
        debug!("Decision {id} superseded");
        Ok(true)
    }

    pub fn search_decisions(&self, query: &str, k: usize) -> Result<Vec<DecisionResult>> {
        self.index.search_decisions(query, k)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn search(
        &self,
        query: &str,
        k: usize,
        include_related: bool,
        filter: Option<&SearchFilter<'_>>,
    ) -> Result<Vec<SearchResult>> {
        let mut results = self.index.search(query, None, k, filter)?;
        if include_related {
            for result in &mut results {
                let id = result.chunk.id.as_str();
                result.related = self
                    .graph
                    .get_relationships(id, Direction::Both, &[])
                    .into_iter()
                    .map(|rel| rel.other_end(id).to_string())
                    .take(RELATED_LIMIT)
                    .collect();
            }
        }
        Ok(results)
    }

    /// Search, then widen each hit to the files and symbols within
    /// `context_depth` hops in both directions.
    pub fn search_with_context(
        &self,
        query: &str,
        k: usize,
        context_depth: usize,
        filter: Option<&SearchFilter<'_>>,
    ) -> Result<ContextSearch> {
        let results = self.search(query, k, false, filter)?;

        let mut files: BTreeSet<String> = BTreeSet::new();
        let mut symbols: BTreeSet<String> = BTreeSet::new();
        for result in &results {
            files.insert(result.chunk.file_path.clone());
            let id = result.chunk.id.as_str();
            let reached = self
                .graph
                .get_dependents(id, context_depth)
                .into_iter()
                .chain(self.graph.get_dependencies(id, context_depth));
            for other in reached {
                if let Some(node) = self.graph.get_node(&other) {
                    if let Some(path) = &node.file_path {
                        files.insert(path.clone());
                    }
                    symbols.insert(node.name.clone());
                }
            }
        }

        Ok(ContextSearch {
            total_results: results.len(),
            results,
            affected_files: files.into_iter().collect(),
            affected_symbols: symbols.into_iter().collect(),
        })
    }

    /// First node whose name contains `name` (optionally in `file_path`),
    /// with its chunk text and categorized relationships.
    pub fn get_symbol_info(&self, name: &str, file_path: Option<&str>) -> Result<Option<SymbolInfo>> {
        let candidates = self.graph.search_nodes(name, &[]);
        // An exact name beats a substring hit.
        let node = candidates
            .iter()
            .filter(|n| file_path.is_none() || n.file_path.as_deref() == file_path)
            .min_by_key(|n| n.name != name);
        let Some(node) = node else {
            return Ok(None);
        };

        let chunk = self.index.get_chunk(&node.id)?;
        let rels = self.relationships_of(node);
        let pick = |kind: RelationType, outgoing: bool| -> Vec<Relationship> {
            rels.iter()
                .filter(|r| r.relation_type == kind)
                .filter(|r| (r.target_id != node.id) == outgoing)
                .map(|r| (*r).clone())
                .collect()
        };

        Ok(Some(SymbolInfo {
            imports: pick(RelationType::Imports, true),
            calls: pick(RelationType::Calls, true),
            inherits: pick(RelationType::Inherits, true),
            called_by: pick(RelationType::Calls, false),
            content: chunk.as_ref().map(|c| c.content.clone()),
            docstring: chunk.as_ref().and_then(|c| c.docstring.clone()),
            signature: chunk.as_ref().and_then(|c| c.signature.clone()),
            symbol: (*node).clone(),
        }))
    }

    pub fn get_file_context(&self, file_path: &str, include_related: bool) -> Result<FileContext> {
        let chunks = self.index.get_chunks_by_file(file_path)?;
        let nodes = self.graph.get_nodes_by_file(file_path);

        let mut seen: HashSet<(&str, &str, RelationType)> = HashSet::new();
        let mut relationships = Vec::new();
        let mut related_files: BTreeSet<String> = BTreeSet::new();
        let file_id = file_node_id(file_path);

        let owners = nodes.iter().map(|n| n.id.as_str()).chain([file_id.as_str()]);
        for owner in owners {
            for rel in self.graph.get_relationships(owner, Direction::Both, &[]) {
                if !seen.insert((&rel.source_id, &rel.target_id, rel.relation_type)) {
                    continue;
                }
                relationships.push(rel.clone());
                if include_related {
                    let other = rel.other_end(owner);
                    if let Some(path) = self.graph.get_node(other).and_then(|n| n.file_path.as_ref()) {
                        if path != file_path {
                            related_files.insert(path.clone());
                        }
                    }
                }
            }
        }

        Ok(FileContext {
            file_path: file_path.to_string(),
            chunks,
            symbols: nodes.iter().map(|n| n.name.clone()).collect(),
            relationships,
            related_files: related_files.into_iter().collect(),
        })
    }

    /// Dependents of every node in `file_paths`, mapped back to files.
    pub fn analyze_impact(&self, file_paths: &[&str], max_depth: usize) -> ImpactSummary {
        let changed_files: HashSet<&str> = file_paths.iter().copied().collect();
        let mut changed: BTreeSet<String> = BTreeSet::new();
        let mut affected: BTreeSet<String> = BTreeSet::new();

        for path in file_paths {
            for node in self.graph.get_nodes_by_file(path) {
                changed.insert(node.id.clone());
                affected.extend(self.graph.get_dependents(&node.id, max_depth));
            }
        }

        let affected_files: BTreeSet<String> = affected
            .iter()
            .filter_map(|id| self.graph.get_node(id)?.file_path.clone())
            .filter(|p| !changed_files.contains(p.as_str()))
            .collect();

        ImpactSummary {
            changed_files: file_paths.iter().map(|p| (*p).to_string()).collect(),
            impact_score: (affected_files.len() as f64 / 10.0).min(1.0),
            affected_symbols: affected.difference(&changed).cloned().collect(),
            changed_symbols: changed.into_iter().collect(),
            affected_files: affected_files.into_iter().collect(),
        }
    }

    pub fn get_dependents(&self, id: &str, max_depth: usize) -> Vec<String> {
        self.graph.get_dependents(id, max_depth)
    }

    pub fn get_dependencies(&self, id: &str, max_depth: usize) -> Vec<String> {
        self.graph.get_dependencies(id, max_depth)
    }

    /// Every file with chunks in the semantic index or nodes in the graph.
    pub fn stored_files(&self) -> Result<BTreeSet<String>> {
        let mut files: BTreeSet<String> = self.index.file_paths()?.into_iter().collect();
        files.extend(self.graph.files().map(str::to_string));
        Ok(files)
    }

    pub fn get_statistics(&self) -> Result<Statistics> {
        Ok(Statistics {
            total_chunks: self.index.count()?,
            total_nodes: self.graph.node_count(),
            total_relationships: self.graph.edge_count(),
            total_decisions: self.index.count_decisions()?,
            indexed_files: self.index.file_paths()?.len(),
        })
    }

    /// Edges of `node`, plus those of its file's synthetic id when the node
    /// is the file chunk itself.
    fn relationships_of(&self, node: &GraphNode) -> Vec<&Relationship> {
        let mut rels = self.graph.get_relationships(&node.id, Direction::Both, &[]);
        if node.node_type == SymbolType::File {
            if let Some(path) = &node.file_path {
                rels.extend(
                    self.graph
                        .get_relationships(&file_node_id(path), Direction::Both, &[]),
                );
            }
        }
        rels
    }
}

fn save_graph(graph: &KnowledgeGraph, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => graph.save(path),
        None => Ok(()),
    }
}
