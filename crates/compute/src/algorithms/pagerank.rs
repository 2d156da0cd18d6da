use grafo_graph::WindowGraph;
use rayon::prelude::*;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct PageRankParams {
    pub damping: f64,
    pub max_iterations: usize,
    /// L1 change between iterations below which the scores are final.
    pub tolerance: f64,
    /// Use edge weights as transition weights.
    pub weighted: bool,
}

impl Default for PageRankParams {
    fn default() -> Self {
        Self {
            damping: 0.85,
            max_iterations: 200,
            tolerance: 1e-10,
            weighted: true,
        }
    }
}

/// Compute PageRank scores using the iterative power method.
///
/// Scores sum to 1.0. Nodes without outgoing edges spread their score
/// uniformly.
pub fn pagerank(graph: &WindowGraph, params: &PageRankParams) -> Vec<f64> {
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }
    let uniform = vec![1.0 / n as f64; n];
    power_iteration(graph, params, &uniform)
}

/// PageRank where teleports (and dangling mass) land according to `reset`
/// instead of uniformly. `reset` is indexed like the graph's nodes and does
/// not need to be normalised. An all-zero reset behaves like plain PageRank.
pub fn personalized_pagerank(graph: &WindowGraph, params: &PageRankParams, reset: &[f64]) -> Vec<f64> {
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }
    let total: f64 = reset.iter().take(n).filter(|w| w.is_finite() && **w > 0.0).sum();
    if total <= 0.0 || reset.len() < n {
        return pagerank(graph, params);
    }
    let teleport: Vec<f64> = reset[..n]
        .iter()
        .map(|&w| if w.is_finite() && w > 0.0 { w / total } else { 0.0 })
        .collect();
    power_iteration(graph, params, &teleport)
}

/// Run PageRank with default parameters (damping=0.85, weighted).
pub fn pagerank_default(graph: &WindowGraph) -> Vec<f64> {
    pagerank(graph, &PageRankParams::default())
}

fn power_iteration(graph: &WindowGraph, params: &PageRankParams, teleport: &[f64]) -> Vec<f64> {
    let n = graph.node_count();
    let edge_weight = |w: f64| if params.weighted { w } else { 1.0 };

    // Pre-compute out-strength (or out-degree) for each node
    let out_strength: Vec<f64> = (0..n)
        .map(|i| graph.neighbors(i).map(|(_, w)| edge_weight(w)).sum())
        .collect();

    let mut scores = teleport.to_vec();
    for iteration in 0..params.max_iterations {
        let dangling: f64 = (0..n)
            .filter(|&i| out_strength[i] <= 0.0)
            .map(|i| scores[i])
            .sum();

        let next: Vec<f64> = (0..n)
            .into_par_iter()
            .map(|j| {
                let inflow: f64 = graph
                    .in_neighbors(j)
                    .filter(|&(i, _)| out_strength[i] > 0.0)
                    .map(|(i, w)| scores[i] * edge_weight(w) / out_strength[i])
                    .sum();
                (1.0 - params.damping) * teleport[j]
                    + params.damping * (inflow + dangling * teleport[j])
            })
            .collect();

        // Check convergence (L1 norm)
        let diff: f64 = next.iter().zip(&scores).map(|(a, b)| (a - b).abs()).sum();
        scores = next;

        if diff < params.tolerance {
            debug!(
                "PageRank converged after {} iterations (diff={:.2e})",
                iteration + 1,
                diff
            );
            return scores;
        }
    }

    debug!(
        "PageRank completed {} iterations without convergence",
        params.max_iterations
    );
    scores
}
