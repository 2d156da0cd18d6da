use grafo_graph::WindowGraph;

/// Global transitivity: `3 * triangles / connected triples`, ignoring
/// weights and direction. `None` when the graph has no connected triple.
pub fn transitivity(graph: &WindowGraph) -> Option<f64> {
    let mut closed = 0u64;
    let mut triples = 0u64;

    for u in 0..graph.node_count() {
        let neighbours: Vec<usize> = graph.neighbors(u).map(|(v, _)| v).collect();
        let k = neighbours.len() as u64;
        triples += k * k.saturating_sub(1) / 2;
        for (i, &v) in neighbours.iter().enumerate() {
            for &w in &neighbours[i + 1..] {
                if graph.edge_weight(v, w).is_some() || graph.edge_weight(w, v).is_some() {
                    closed += 1;
                }
            }
        }
    }

    (triples > 0).then(|| closed as f64 / triples as f64)
}
