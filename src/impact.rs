//! Change impact scoring on top of the dependency graph.
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::Serialize;

use crate::graph::{Direction, KnowledgeGraph};
use crate::store::HybridStore;

pub const DEFAULT_IMPACT_DEPTH: usize = 3;
pub const DEFAULT_CHAIN_DEPTH: usize = 5;
pub const DEFAULT_MAX_PATHS: usize = 10;

/// Depth used when looking for critical paths.
const CRITICAL_PATH_DEPTH: usize = 5;

/// Path fragments that mark a file as central to a project.
const CORE_MARKERS: [&str; 6] = ["__init__", "main", "config", "base", "core", "utils"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Severity::Critical
        } else if score >= 0.6 {
            Severity::High
        } else if score >= 0.3 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Four independently capped components, summed and capped at 1.0.
pub fn impact_score(files: usize, symbols: usize, direct: usize, transitive: usize) -> f64 {
    let file_weight = (files as f64 / 10.0).min(0.3);
    let symbol_weight = (symbols as f64 / 20.0).min(0.2);
    let direct_weight = (direct as f64 / 30.0).min(0.3);
    let transitive_weight = (transitive as f64 / 50.0).min(0.2);
    (file_weight + symbol_weight + direct_weight + transitive_weight).min(1.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct ImpactResult {
    pub changed_files: Vec<String>,
    pub changed_symbols: Vec<String>,
    pub directly_affected: Vec<String>,
    pub transitively_affected: Vec<String>,
    pub affected_files: Vec<String>,
    pub impact_score: f64,
    pub severity: Severity,
    pub risk_factors: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ImpactResult {
    pub fn to_summary(&self) -> String {
        let mut summary = format!(
            "Changing {} file(s) touches {} symbol(s): {} direct and {} transitive dependent(s) across {} other file(s). Impact {:.2} ({}).",
            self.changed_files.len(),
            self.changed_symbols.len(),
            self.directly_affected.len(),
            self.transitively_affected.len(),
            self.affected_files.len(),
            self.impact_score,
            self.severity,
        );
        if !self.risk_factors.is_empty() {
            summary.push_str(" Risks: ");
            summary.push_str(&self.risk_factors.join("; "));
            summary.push('.');
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriticalPath {
    pub source: String,
    pub target: String,
    pub target_file: Option<String>,
    pub path: Vec<String>,
    pub depth: usize,
}

pub struct ImpactAnalyzer<'a> {
    graph: &'a KnowledgeGraph,
}

impl<'a> ImpactAnalyzer<'a> {
    pub fn new(store: &'a HybridStore) -> Self {
        Self::for_graph(store.graph())
    }

    pub fn for_graph(graph: &'a KnowledgeGraph) -> Self {
        Self { graph }
    }

    pub fn analyze_files<S: AsRef<str>>(&self, file_paths: &[S], max_depth: usize) -> ImpactResult {
        let files: Vec<String> = file_paths.iter().map(|p| p.as_ref().to_string()).collect();
        let symbols: Vec<String> = files
            .iter()
            .flat_map(|f| self.graph.get_nodes_by_file(f))
            .map(|n| n.id.clone())
            .collect();
        self.analyze(files, symbols, max_depth)
    }

    /// Same analysis seeded with node ids. Changed files are the files
    /// those nodes live in.
    pub fn analyze_symbols<S: AsRef<str>>(&self, symbol_ids: &[S], max_depth: usize) -> ImpactResult {
        let files: BTreeSet<String> = symbol_ids
            .iter()
            .filter_map(|id| self.graph.get_node(id.as_ref())?.file_path.clone())
            .collect();
        let symbols: Vec<String> = symbol_ids.iter().map(|s| s.as_ref().to_string()).collect();
        self.analyze(files.into_iter().collect(), symbols, max_depth)
    }

    fn analyze(&self, files: Vec<String>, symbols: Vec<String>, max_depth: usize) -> ImpactResult {
        let changed: BTreeSet<String> = symbols.into_iter().collect();
        let mut direct: BTreeSet<String> = BTreeSet::new();
        let mut transitive: BTreeSet<String> = BTreeSet::new();

        for id in &changed {
            let first_hop: HashSet<String> = self.graph.get_dependents(id, 1).into_iter().collect();
            for dep in self.graph.get_dependents(id, max_depth) {
                if !first_hop.contains(&dep) && &dep != id {
                    transitive.insert(dep);
                }
            }
            direct.extend(first_hop);
        }

        let input: HashSet<&str> = files.iter().map(String::as_str).collect();
        let affected_files: BTreeSet<String> = direct
            .iter()
            .chain(&transitive)
            .filter_map(|id| self.graph.get_node(id)?.file_path.clone())
            .filter(|p| !input.contains(p.as_str()))
            .collect();

        let score = impact_score(files.len(), changed.len(), direct.len(), transitive.len());
        let severity = Severity::from_score(score);
        let risk_factors = risk_factors(&files, changed.len(), direct.len(), transitive.len());
        let recommendations = recommendations(severity, &risk_factors, affected_files.len());

        ImpactResult {
            changed_files: files,
            changed_symbols: changed.into_iter().collect(),
            directly_affected: direct.into_iter().collect(),
            transitively_affected: transitive.into_iter().collect(),
            affected_files: affected_files.into_iter().collect(),
            impact_score: score,
            severity,
            risk_factors,
            recommendations,
        }
    }

    /// For every id reachable from `symbol_id` in `direction`, the shortest
    /// chain of ids leading from `symbol_id` to it.
    pub fn get_dependency_chain(
        &self,
        symbol_id: &str,
        direction: Direction,
        max_depth: usize,
    ) -> Vec<Vec<String>> {
        let mut chains = Vec::new();
        if matches!(direction, Direction::Incoming | Direction::Both) {
            for dep in self.graph.get_dependents(symbol_id, max_depth) {
                if let Some(path) = self.dependent_path(symbol_id, &dep) {
                    chains.push(path);
                }
            }
        }
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            for dep in self.graph.get_dependencies(symbol_id, max_depth) {
                if let Some(path) = self.graph.find_path(symbol_id, &dep) {
                    chains.push(path);
                }
            }
        }
        chains
    }

    /// Shortest dependent chains out of the changed files, shortest first.
    pub fn get_critical_paths<S: AsRef<str>>(&self, file_paths: &[S], max_paths: usize) -> Vec<CriticalPath> {
        let mut paths = Vec::new();
        for file in file_paths {
            for node in self.graph.get_nodes_by_file(file.as_ref()) {
                for dep in self.graph.get_dependents(&node.id, CRITICAL_PATH_DEPTH) {
                    let Some(path) = self.dependent_path(&node.id, &dep) else {
                        continue;
                    };
                    if path.len() < 2 {
                        continue;
                    }
                    paths.push(CriticalPath {
                        source: node.id.clone(),
                        target_file: self.graph.get_node(&dep).and_then(|n| n.file_path.clone()),
                        depth: path.len() - 1,
                        target: dep,
                        path,
                    });
                }
            }
        }
        // Stable, so ties keep discovery order.
        paths.sort_by_key(|p| p.depth);
        paths.truncate(max_paths);
        paths
    }

    /// Path from `symbol_id` out to one of its dependents, walking edges
    /// backwards.
    fn dependent_path(&self, symbol_id: &str, dependent: &str) -> Option<Vec<String>> {
        let mut path = self.graph.find_path(dependent, symbol_id)?;
        path.reverse();
        Some(path)
    }
}

fn risk_factors(files: &[String], symbols: usize, direct: usize, transitive: usize) -> Vec<String> {
    let mut risks = Vec::new();
    if files.len() > 5 {
        risks.push(format!("Large change spanning {} files", files.len()));
    }
    if symbols > 20 {
        risks.push(format!("Many symbols modified ({symbols})"));
    }
    if direct > 10 {
        risks.push(format!("High number of direct dependents ({direct})"));
    }
    if transitive > 30 {
        risks.push(format!("Large transitive impact ({transitive} symbols)"));
    }
    for file in files {
        let lower = file.to_lowercase();
        if CORE_MARKERS.iter().any(|m| lower.contains(m)) {
            risks.push(format!("Changes to core file: {file}"));
        }
    }
    risks
}

fn recommendations(severity: Severity, risks: &[String], affected_files: usize) -> Vec<String> {
    let mut recs = Vec::new();
    if severity >= Severity::High {
        recs.push("Consider breaking this change into smaller PRs".to_string());
        recs.push("Ensure comprehensive test coverage for affected areas".to_string());
    }
    if affected_files > 10 {
        recs.push(format!("Review all {affected_files} affected files before merging"));
    }
    if risks.iter().any(|r| r.to_lowercase().contains("core")) {
        recs.push("Changes to core modules require extra review".to_string());
    }
    if severity == Severity::Critical {
        recs.push("Consider a staged rollout or feature flag".to_string());
    }
    if recs.is_empty() {
        recs.push("Standard review process should be sufficient".to_string());
    }
    recs
}
