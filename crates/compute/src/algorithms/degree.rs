use grafo_graph::WindowGraph;
use serde::Serialize;

/// Degree information for a single node.
#[derive(Debug, Clone, Serialize)]
pub struct DegreeInfo {
    pub in_deg: usize,
    pub out_deg: usize,
    /// Number of distinct neighbours for undirected graphs, `in + out`
    /// otherwise.
    pub total: usize,
}

/// Compute in-degree, out-degree, and total degree for every node.
pub fn degree_centrality(graph: &WindowGraph) -> Vec<DegreeInfo> {
    (0..graph.node_count())
        .map(|i| {
            let in_deg = graph.in_degree(i);
            let out_deg = graph.out_degree(i);
            let total = if graph.is_directed() { in_deg + out_deg } else { out_deg };
            DegreeInfo {
                in_deg,
                out_deg,
                total,
            }
        })
        .collect()
}
