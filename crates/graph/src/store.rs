use std::collections::{BTreeMap, HashMap};

use grafo_core::{CompactEdge, CompactNode};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Directed,
    Undirected,
}

#[derive(Debug, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub isolated_nodes: usize,
    pub total_weight: f64,
}

/// Weighted contact graph of one metric window.
///
/// Nodes are addressed by dense indices in insertion order; the string
/// identifiers are kept alongside. Repeated edges between the same pair sum
/// their weights. Self loops are dropped.
#[derive(Debug, Clone)]
pub struct WindowGraph {
    direction: Direction,
    ids: Vec<String>,
    index: HashMap<String, usize>,
    node_weights: Vec<f64>,
    outgoing: Vec<BTreeMap<usize, f64>>,
    /// Only populated for directed graphs.
    incoming: Vec<BTreeMap<usize, f64>>,
    edge_count: usize,
}

impl WindowGraph {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            ids: Vec::new(),
            index: HashMap::new(),
            node_weights: Vec::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
            edge_count: 0,
        }
    }

    pub fn undirected() -> Self {
        Self::new(Direction::Undirected)
    }

    pub fn directed() -> Self {
        Self::new(Direction::Directed)
    }

    /// Build from the compact node/edge lists produced by a contact source.
    /// Edge endpoints missing from `nodes` are added with zero weight.
    pub fn from_compact(nodes: &[CompactNode], edges: &[CompactEdge], direction: Direction) -> Self {
        let mut graph = Self::new(direction);
        for node in nodes {
            let idx = graph.upsert_node(&node.identifier);
            graph.node_weights[idx] += node.weight;
        }
        for edge in edges {
            graph.add_edge(&edge.id1, &edge.id2, edge.weight);
        }
        graph
    }

    pub fn upsert_node(&mut self, key: &str) -> usize {
        if let Some(&existing) = self.index.get(key) {
            return existing;
        }
        let idx = self.ids.len();
        self.ids.push(key.to_string());
        self.index.insert(key.to_string(), idx);
        self.node_weights.push(0.0);
        self.outgoing.push(BTreeMap::new());
        if self.direction == Direction::Directed {
            self.incoming.push(BTreeMap::new());
        }
        idx
    }

    /// Add `weight` to the edge `source -> target`. Returns `false` for self
    /// loops, which are ignored.
    pub fn add_edge(&mut self, source: &str, target: &str, weight: f64) -> bool {
        if source == target {
            return false;
        }
        let s = self.upsert_node(source);
        let t = self.upsert_node(target);

        if !self.outgoing[s].contains_key(&t) {
            self.edge_count += 1;
        }
        *self.outgoing[s].entry(t).or_insert(0.0) += weight;

        match self.direction {
            Direction::Undirected => {
                *self.outgoing[t].entry(s).or_insert(0.0) += weight;
            }
            Direction::Directed => {
                *self.incoming[t].entry(s).or_insert(0.0) += weight;
            }
        }
        true
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_directed(&self) -> bool {
        self.direction == Direction::Directed
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    /// Distinct edges; an undirected pair counts once.
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id(&self, idx: usize) -> &str {
        &self.ids[idx]
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn node_weight(&self, idx: usize) -> f64 {
        self.node_weights[idx]
    }

    /// Successors (directed) or neighbours (undirected) with edge weights.
    pub fn neighbors(&self, idx: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.outgoing[idx].iter().map(|(&n, &w)| (n, w))
    }

    /// Predecessors (directed) or neighbours (undirected) with edge weights.
    pub fn in_neighbors(&self, idx: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let map = match self.direction {
            Direction::Directed => &self.incoming[idx],
            Direction::Undirected => &self.outgoing[idx],
        };
        map.iter().map(|(&n, &w)| (n, w))
    }

    pub fn out_degree(&self, idx: usize) -> usize {
        self.outgoing[idx].len()
    }

    pub fn in_degree(&self, idx: usize) -> usize {
        match self.direction {
            Direction::Directed => self.incoming[idx].len(),
            Direction::Undirected => self.outgoing[idx].len(),
        }
    }

    /// Sum of outgoing edge weights.
    pub fn strength(&self, idx: usize) -> f64 {
        self.outgoing[idx].values().sum()
    }

    pub fn edge_weight(&self, source: usize, target: usize) -> Option<f64> {
        self.outgoing[source].get(&target).copied()
    }

    pub fn stats(&self) -> GraphStats {
        let isolated_nodes = (0..self.node_count())
            .filter(|&i| self.out_degree(i) == 0 && self.in_degree(i) == 0)
            .count();
        let mut total_weight: f64 = self.outgoing.iter().flat_map(|m| m.values()).sum();
        if self.direction == Direction::Undirected {
            total_weight /= 2.0;
        }
        GraphStats {
            node_count: self.node_count(),
            edge_count: self.edge_count,
            isolated_nodes,
            total_weight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(a: &str, b: &str, w: f64) -> CompactEdge {
        CompactEdge {
            id1: a.into(),
            id2: b.into(),
            weight: w,
        }
    }

    #[test]
    fn undirected_edges_are_symmetric_and_summed() {
        let g = WindowGraph::from_compact(
            &[],
            &[edge("a", "b", 2.0), edge("b", "a", 3.0), edge("b", "c", 1.0)],
            Direction::Undirected,
        );
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.edge_count(), 2);
        let (a, b) = (g.index_of("a").unwrap(), g.index_of("b").unwrap());
        assert_eq!(g.edge_weight(a, b), Some(5.0));
        assert_eq!(g.edge_weight(b, a), Some(5.0));
        assert_eq!(g.stats().total_weight, 6.0);
    }

    #[test]
    fn directed_edges_keep_orientation() {
        let mut g = WindowGraph::directed();
        g.add_edge("a", "b", 1.0);
        g.add_edge("b", "a", 1.0);
        assert_eq!(g.edge_count(), 2);
        let a = g.index_of("a").unwrap();
        assert_eq!(g.out_degree(a), 1);
        assert_eq!(g.in_degree(a), 1);
    }

    #[test]
    fn self_loops_are_dropped_and_isolated_nodes_kept() {
        let nodes = vec![CompactNode {
            identifier: "lonely".into(),
            weight: 4.0,
        }];
        let mut g = WindowGraph::from_compact(&nodes, &[], Direction::Undirected);
        assert!(!g.add_edge("x", "x", 1.0));
        let stats = g.stats();
        assert_eq!(stats.node_count, 1);
        assert_eq!(stats.edge_count, 0);
        assert_eq!(stats.isolated_nodes, 1);
        assert_eq!(g.node_weight(0), 4.0);
    }
}
