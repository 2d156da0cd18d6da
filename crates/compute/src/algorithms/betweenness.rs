use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use grafo_graph::WindowGraph;
use rayon::prelude::*;

/// Betweenness centrality (Brandes).
///
/// With `weighted`, edge weights are path lengths and shortest paths come
/// from Dijkstra; otherwise every edge has length 1. For undirected graphs
/// each unordered pair is counted once. Scores are not normalised.
pub fn betweenness_centrality(graph: &WindowGraph, weighted: bool) -> Vec<f64> {
    let n = graph.node_count();
    if n == 0 {
        return Vec::new();
    }

    let mut scores = (0..n)
        .into_par_iter()
        .map(|source| {
            let paths = if weighted {
                dijkstra_paths(graph, source)
            } else {
                bfs_paths(graph, source)
            };
            accumulate(source, &paths, n)
        })
        .reduce(
            || vec![0.0; n],
            |mut acc, part| {
                acc.iter_mut().zip(part).for_each(|(a, p)| *a += p);
                acc
            },
        );

    if !graph.is_directed() {
        scores.iter_mut().for_each(|s| *s /= 2.0);
    }
    scores
}

/// Single-source shortest path DAG: visit order, predecessors, path counts.
struct ShortestPaths {
    order: Vec<usize>,
    predecessors: Vec<Vec<usize>>,
    sigma: Vec<f64>,
}

impl ShortestPaths {
    fn new(n: usize, source: usize) -> Self {
        let mut sigma = vec![0.0; n];
        sigma[source] = 1.0;
        Self {
            order: Vec::with_capacity(n),
            predecessors: vec![Vec::new(); n],
            sigma,
        }
    }
}

fn bfs_paths(graph: &WindowGraph, source: usize) -> ShortestPaths {
    let n = graph.node_count();
    let mut paths = ShortestPaths::new(n, source);
    let mut dist: Vec<Option<usize>> = vec![None; n];
    dist[source] = Some(0);
    let mut queue = VecDeque::from([source]);

    while let Some(v) = queue.pop_front() {
        paths.order.push(v);
        let dv = dist[v].unwrap_or_default();
        for (w, _) in graph.neighbors(v) {
            if dist[w].is_none() {
                dist[w] = Some(dv + 1);
                queue.push_back(w);
            }
            if dist[w] == Some(dv + 1) {
                paths.sigma[w] += paths.sigma[v];
                paths.predecessors[w].push(v);
            }
        }
    }
    paths
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Frontier {
    dist: f64,
    node: usize,
    pred: usize,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    // Min-heap on distance.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn same_length(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-10 * a.abs().max(b.abs()).max(1.0)
}

fn dijkstra_paths(graph: &WindowGraph, source: usize) -> ShortestPaths {
    let n = graph.node_count();
    let mut paths = ShortestPaths::new(n, source);
    let mut settled = vec![false; n];
    let mut seen: Vec<Option<f64>> = vec![None; n];
    seen[source] = Some(0.0);

    let mut heap = BinaryHeap::from([Frontier {
        dist: 0.0,
        node: source,
        pred: source,
    }]);

    while let Some(Frontier { dist, node: v, pred }) = heap.pop() {
        if settled[v] {
            continue;
        }
        if v != source {
            paths.sigma[v] += paths.sigma[pred];
            paths.predecessors[v].push(pred);
        }
        settled[v] = true;
        paths.order.push(v);

        for (w, length) in graph.neighbors(v) {
            let candidate = dist + length;
            if settled[w] {
                continue;
            }
            match seen[w] {
                Some(best) if same_length(candidate, best) => {
                    // Another shortest route into w; credit it once w settles
                    // through a different predecessor.
                    paths.sigma[w] += paths.sigma[v];
                    paths.predecessors[w].push(v);
                }
                Some(best) if candidate > best => {}
                _ => {
                    seen[w] = Some(candidate);
                    paths.sigma[w] = 0.0;
                    paths.predecessors[w].clear();
                    heap.push(Frontier {
                        dist: candidate,
                        node: w,
                        pred: v,
                    });
                }
            }
        }
    }
    paths
}

fn accumulate(source: usize, paths: &ShortestPaths, n: usize) -> Vec<f64> {
    let mut delta = vec![0.0; n];
    let mut centrality = vec![0.0; n];
    for &w in paths.order.iter().rev() {
        for &v in &paths.predecessors[w] {
            if paths.sigma[w] > 0.0 {
                delta[v] += paths.sigma[v] / paths.sigma[w] * (1.0 + delta[w]);
            }
        }
        if w != source {
            centrality[w] += delta[w];
        }
    }
    centrality
}
