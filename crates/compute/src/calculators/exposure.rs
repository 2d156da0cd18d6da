//! Node metrics weighted by proximity to reported cases.

use std::sync::Arc;

use crate::algorithms::pagerank::{personalized_pagerank, PageRankParams};
use crate::scheduler::{
    AttributeValue, CalculatorError, EligibilityPolicy, MetricCalculator, MetricDefinition, MetricWindow,
};
use crate::sources::{ContactSource, ExposureSource};

/// Distance scale of the reset weight, in metres.
const DISTANCE_SCALE_M: f64 = 1200.0;

/// Teleport weight of a device `distance_m` away from the nearest case:
/// `log2(1 + exp(-d / 1200))`, 1 at the case and decaying with distance.
pub fn reset_weight(distance_m: f64) -> f64 {
    (1.0 + (-distance_m / DISTANCE_SCALE_M).exp()).log2()
}

/// PageRank whose teleports favour devices close to cases. Devices with no
/// known distance get no teleport weight.
pub struct PersonalizedPageRankMetric {
    definition: MetricDefinition,
    policy: EligibilityPolicy,
    contacts: Arc<dyn ContactSource>,
    exposure: Arc<dyn ExposureSource>,
}

impl PersonalizedPageRankMetric {
    pub fn new(
        definition: MetricDefinition,
        policy: EligibilityPolicy,
        contacts: Arc<dyn ContactSource>,
        exposure: Arc<dyn ExposureSource>,
    ) -> Self {
        Self {
            definition,
            policy,
            contacts,
            exposure,
        }
    }
}

impl MetricCalculator for PersonalizedPageRankMetric {
    fn definition(&self) -> &MetricDefinition {
        &self.definition
    }

    fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    fn compute_for_window(&self, window: &MetricWindow<'_>) -> Result<Vec<AttributeValue>, CalculatorError> {
        let graph = self.contacts.window_graph(window.entity, window.start, window.end())?;
        let distances = self.exposure.distances(window.entity, window.start, window.end());
        let reset: Vec<f64> = graph
            .ids()
            .iter()
            .map(|id| distances.get(id).map_or(0.0, |&d| reset_weight(d)))
            .collect();

        let scores = personalized_pagerank(&graph, &PageRankParams::default(), &reset);
        Ok(graph
            .ids()
            .iter()
            .zip(scores)
            .map(|(id, score)| AttributeValue::node(id.clone(), score))
            .collect())
    }
}

/// Distance of each device in the window graph to the nearest case. Devices
/// without a known distance are left out.
pub struct DistanceToInfectedMetric {
    definition: MetricDefinition,
    policy: EligibilityPolicy,
    contacts: Arc<dyn ContactSource>,
    exposure: Arc<dyn ExposureSource>,
}

impl DistanceToInfectedMetric {
    pub fn new(
        definition: MetricDefinition,
        policy: EligibilityPolicy,
        contacts: Arc<dyn ContactSource>,
        exposure: Arc<dyn ExposureSource>,
    ) -> Self {
        Self {
            definition,
            policy,
            contacts,
            exposure,
        }
    }
}

impl MetricCalculator for DistanceToInfectedMetric {
    fn definition(&self) -> &MetricDefinition {
        &self.definition
    }

    fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    fn compute_for_window(&self, window: &MetricWindow<'_>) -> Result<Vec<AttributeValue>, CalculatorError> {
        let nodes = self.contacts.compact_nodes(window.entity, window.start, window.end())?;
        let distances = self.exposure.distances(window.entity, window.start, window.end());
        Ok(nodes
            .into_iter()
            .filter_map(|node| {
                let d = *distances.get(&node.identifier)?;
                Some(AttributeValue::node(node.identifier, d))
            })
            .collect())
    }
}
