//! Graph analytics over a [`grafo_graph::WindowGraph`].
//!
//! Node-level results are `Vec<f64>` indexed like the graph's nodes.

pub mod betweenness;
pub mod degree;
pub mod distribution;
pub mod eigenvector;
pub mod inequality;
pub mod pagerank;
pub mod transitivity;
