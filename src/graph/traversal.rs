//! Bounded breadth-first traversal and shortest paths.
use std::collections::{HashMap, HashSet, VecDeque};

use super::{Direction, KnowledgeGraph};

impl KnowledgeGraph {
    /// Ids that reach `id` through incoming edges within `max_depth` hops.
    pub fn get_dependents(&self, id: &str, max_depth: usize) -> Vec<String> {
        self.bfs(id, max_depth, Direction::Incoming)
    }

    /// Ids that `id` reaches through outgoing edges within `max_depth` hops.
    pub fn get_dependencies(&self, id: &str, max_depth: usize) -> Vec<String> {
        self.bfs(id, max_depth, Direction::Outgoing)
    }

    /// Breadth-first walk in discovery order. The start id is never part of
    /// the result, and the visited set makes cycles harmless.
    fn bfs(&self, start: &str, max_depth: usize, direction: Direction) -> Vec<String> {
        let mut found = Vec::new();
        if !self.contains_id(start) {
            return found;
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::new();
        visited.insert(start);
        queue.push_back((start, 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for next in self.neighbors(current, direction) {
                if visited.insert(next) {
                    found.push(next.to_string());
                    queue.push_back((next, depth + 1));
                }
            }
        }

        found
    }

    /// Shortest path by hop count following edge direction, including both
    /// endpoints. `None` when either id is unknown or no path exists.
    pub fn find_path(&self, source: &str, target: &str) -> Option<Vec<String>> {
        if !self.contains_id(source) || !self.contains_id(target) {
            return None;
        }
        if source == target {
            return Some(vec![source.to_string()]);
        }

        let mut parent: HashMap<&str, &str> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::from([source]);
        let mut visited: HashSet<&str> = HashSet::from([source]);

        while let Some(current) = queue.pop_front() {
            for next in self.neighbors(current, Direction::Outgoing) {
                if !visited.insert(next) {
                    continue;
                }
                parent.insert(next, current);
                if next == target {
                    let mut path = vec![target.to_string()];
                    let mut cursor = target;
                    while let Some(prev) = parent.get(cursor) {
                        path.push(prev.to_string());
                        cursor = *prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }

        None
    }

    /// A new graph holding the given ids and everything within `depth` hops
    /// of them in either direction, with the edges among those ids.
    pub fn get_impact_subgraph(&self, ids: &[&str], depth: usize) -> KnowledgeGraph {
        let mut keep: HashSet<String> = HashSet::new();
        for id in ids {
            keep.insert((*id).to_string());
            keep.extend(self.get_dependents(id, depth));
            keep.extend(self.get_dependencies(id, depth));
        }

        let mut sub = KnowledgeGraph::new();
        for id in &keep {
            if let Some(node) = self.get_node(id) {
                sub.add_node(node.clone());
            }
        }
        for rel in self.relationships() {
            if keep.contains(&rel.source_id) && keep.contains(&rel.target_id) {
                sub.add_relationship(rel.clone());
            }
        }
        sub
    }
}
