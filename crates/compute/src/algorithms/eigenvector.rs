use grafo_graph::WindowGraph;
use rayon::prelude::*;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EigenvectorResult {
    /// Centrality per node, scaled so the maximum is 1.
    pub centrality: Vec<f64>,
    /// Dominant eigenvalue of the (weighted) adjacency matrix.
    pub eigenvalue: f64,
}

const MAX_ITERATIONS: usize = 1000;
const TOLERANCE: f64 = 1e-10;

/// Eigenvector centrality of an undirected graph via shifted power iteration
/// on `A + I`, which keeps bipartite graphs from oscillating.
///
/// A graph without edges yields centrality 1 for every node and eigenvalue 0.
pub fn eigenvector_centrality(graph: &WindowGraph, weighted: bool) -> EigenvectorResult {
    let n = graph.node_count();
    if graph.edge_count() == 0 {
        return EigenvectorResult {
            centrality: vec![1.0; n],
            eigenvalue: 0.0,
        };
    }
    let weight = |w: f64| if weighted { w } else { 1.0 };
    let multiply = |x: &[f64]| -> Vec<f64> {
        (0..n)
            .into_par_iter()
            .map(|i| graph.neighbors(i).map(|(j, w)| weight(w) * x[j]).sum())
            .collect()
    };

    // Start from degree so every component with edges gets a foothold.
    let mut x: Vec<f64> = (0..n).map(|i| graph.out_degree(i) as f64 + 1.0).collect();
    scale_to_max(&mut x);

    for iteration in 0..MAX_ITERATIONS {
        let ax = multiply(&x);
        let mut next: Vec<f64> = ax.iter().zip(&x).map(|(a, b)| a + b).collect();
        scale_to_max(&mut next);
        let diff = next
            .iter()
            .zip(&x)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        x = next;
        if diff < TOLERANCE {
            debug!("Eigenvector centrality converged after {} iterations", iteration + 1);
            break;
        }
    }

    // Rayleigh quotient on the unshifted matrix.
    let ax = multiply(&x);
    let numerator: f64 = x.iter().zip(&ax).map(|(a, b)| a * b).sum();
    let denominator: f64 = x.iter().map(|v| v * v).sum();
    let eigenvalue = if denominator > 0.0 { numerator / denominator } else { 0.0 };

    EigenvectorResult {
        centrality: x,
        eigenvalue,
    }
}

fn scale_to_max(values: &mut [f64]) {
    let max = values.iter().copied().fold(0.0, f64::max);
    if max > 0.0 {
        values.iter_mut().for_each(|v| *v /= max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangle_is_uniform_with_eigenvalue_two() {
        let mut g = WindowGraph::undirected();
        g.add_edge("a", "b", 1.0);
        g.add_edge("b", "c", 1.0);
        g.add_edge("c", "a", 1.0);
        let res = eigenvector_centrality(&g, false);
        assert!(res.centrality.iter().all(|v| (v - 1.0).abs() < 1e-8));
        assert!((res.eigenvalue - 2.0).abs() < 1e-8);
    }

    #[test]
    fn star_eigenvalue_is_sqrt_of_leaves() {
        let mut g = WindowGraph::undirected();
        for leaf in ["a", "b", "c", "d"] {
            g.add_edge("hub", leaf, 1.0);
        }
        let res = eigenvector_centrality(&g, false);
        assert!((res.eigenvalue - 2.0).abs() < 1e-6, "got {}", res.eigenvalue);
        let hub = g.index_of("hub").unwrap();
        assert!((res.centrality[hub] - 1.0).abs() < 1e-9);
        assert!((res.centrality[g.index_of("a").unwrap()] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn weights_scale_the_eigenvalue() {
        let mut g = WindowGraph::undirected();
        g.add_edge("a", "b", 3.0);
        assert!((eigenvector_centrality(&g, true).eigenvalue - 3.0).abs() < 1e-8);
        assert!((eigenvector_centrality(&g, false).eigenvalue - 1.0).abs() < 1e-8);
    }

    #[test]
    fn edgeless_graph_is_flat() {
        let mut g = WindowGraph::undirected();
        g.upsert_node("a");
        g.upsert_node("b");
        let res = eigenvector_centrality(&g, true);
        assert_eq!(res.centrality, vec![1.0, 1.0]);
        assert_eq!(res.eigenvalue, 0.0);
    }
}
