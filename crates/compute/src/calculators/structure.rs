//! Metrics computed directly from the window's contact graph.

use std::sync::Arc;

use grafo_graph::WindowGraph;

use crate::scheduler::{
    AttributeValue, CalculatorError, EligibilityPolicy, MetricCalculator, MetricDefinition, MetricKind,
    MetricWindow,
};
use crate::sources::ContactSource;

pub type GraphFn = fn(&WindowGraph) -> Option<f64>;
pub type NodeFn = fn(&WindowGraph) -> Vec<f64>;

/// One number per window graph. An empty graph is stored as null.
pub struct GraphMetric {
    definition: MetricDefinition,
    policy: EligibilityPolicy,
    source: Arc<dyn ContactSource>,
    compute: GraphFn,
}

impl GraphMetric {
    pub fn new(
        definition: MetricDefinition,
        policy: EligibilityPolicy,
        source: Arc<dyn ContactSource>,
        compute: GraphFn,
    ) -> Self {
        debug_assert_eq!(definition.kind, MetricKind::Graph);
        Self {
            definition,
            policy,
            source,
            compute,
        }
    }
}

impl MetricCalculator for GraphMetric {
    fn definition(&self) -> &MetricDefinition {
        &self.definition
    }

    fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    fn compute_for_window(&self, window: &MetricWindow<'_>) -> Result<Vec<AttributeValue>, CalculatorError> {
        let graph = self.source.window_graph(window.entity, window.start, window.end())?;
        if graph.is_empty() {
            return Ok(vec![AttributeValue::null()]);
        }
        Ok(vec![AttributeValue::graph_opt((self.compute)(&graph))])
    }
}

/// One value per node of the window graph.
pub struct NodeMetric {
    definition: MetricDefinition,
    policy: EligibilityPolicy,
    source: Arc<dyn ContactSource>,
    compute: NodeFn,
}

impl NodeMetric {
    pub fn new(
        definition: MetricDefinition,
        policy: EligibilityPolicy,
        source: Arc<dyn ContactSource>,
        compute: NodeFn,
    ) -> Self {
        debug_assert_eq!(definition.kind, MetricKind::Node);
        Self {
            definition,
            policy,
            source,
            compute,
        }
    }
}

impl MetricCalculator for NodeMetric {
    fn definition(&self) -> &MetricDefinition {
        &self.definition
    }

    fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    fn compute_for_window(&self, window: &MetricWindow<'_>) -> Result<Vec<AttributeValue>, CalculatorError> {
        let graph = self.source.window_graph(window.entity, window.start, window.end())?;
        let scores = (self.compute)(&graph);
        if scores.len() != graph.node_count() {
            return Err(CalculatorError::Failed(format!(
                "{} produced {} scores for {} nodes",
                self.definition.name,
                scores.len(),
                graph.node_count()
            )));
        }
        Ok(graph
            .ids()
            .iter()
            .zip(scores)
            .map(|(id, score)| AttributeValue::node(id.clone(), score))
            .collect())
    }
}

/// Total contact records in the window, without building the graph.
pub struct ContactCountMetric {
    definition: MetricDefinition,
    policy: EligibilityPolicy,
    source: Arc<dyn ContactSource>,
}

impl ContactCountMetric {
    pub fn new(definition: MetricDefinition, policy: EligibilityPolicy, source: Arc<dyn ContactSource>) -> Self {
        Self {
            definition,
            policy,
            source,
        }
    }
}

impl MetricCalculator for ContactCountMetric {
    fn definition(&self) -> &MetricDefinition {
        &self.definition
    }

    fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    fn compute_for_window(&self, window: &MetricWindow<'_>) -> Result<Vec<AttributeValue>, CalculatorError> {
        let count = self.source.contact_count(window.entity, window.start, window.end())?;
        Ok(vec![AttributeValue::graph(count as f64)])
    }
}

// ── Graph and node functions ─────────────────────────────────

pub fn node_count(graph: &WindowGraph) -> Option<f64> {
    Some(graph.node_count() as f64)
}

pub fn edge_count(graph: &WindowGraph) -> Option<f64> {
    Some(graph.edge_count() as f64)
}

pub fn global_transitivity(graph: &WindowGraph) -> Option<f64> {
    crate::algorithms::transitivity::transitivity(graph)
}

pub fn eigenvalue_weighted(graph: &WindowGraph) -> Option<f64> {
    Some(crate::algorithms::eigenvector::eigenvector_centrality(graph, true).eigenvalue)
}

pub fn eigenvalue_unweighted(graph: &WindowGraph) -> Option<f64> {
    Some(crate::algorithms::eigenvector::eigenvector_centrality(graph, false).eigenvalue)
}

pub fn degrees(graph: &WindowGraph) -> Vec<f64> {
    crate::algorithms::degree::degree_centrality(graph)
        .into_iter()
        .map(|d| d.total as f64)
        .collect()
}

pub fn pagerank_scores(graph: &WindowGraph) -> Vec<f64> {
    crate::algorithms::pagerank::pagerank_default(graph)
}

pub fn eigenvector_scores(graph: &WindowGraph) -> Vec<f64> {
    crate::algorithms::eigenvector::eigenvector_centrality(graph, true).centrality
}

pub fn betweenness_scores(graph: &WindowGraph) -> Vec<f64> {
    crate::algorithms::betweenness::betweenness_centrality(graph, true)
}
