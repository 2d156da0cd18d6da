//! The metric catalogue.
//!
//! - `structure`: sizes, counts and centralities of the window graph
//! - `layered`: aggregates over persisted node values (Gini, power-law fits)
//! - `exposure`: metrics weighted by distance to reported cases
//! - `cases`: accumulated case counts

pub mod cases;
pub mod exposure;
pub mod layered;
pub mod structure;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use grafo_core::config::AttributeConfig;
use grafo_core::EntityId;

use crate::scheduler::{
    BlackoutWindow, EligibilityPolicy, EligibilityRule, GraphSizeIndex, MetricCalculator, MetricDefinition,
    MetricKind, Priority,
};
use crate::sources::{CaseSource, CaseTable, ContactSource, ExposureSource};

use self::cases::AccumulatedCasesMetric;
use self::exposure::{DistanceToInfectedMetric, PersonalizedPageRankMetric};
use self::layered::{Aggregate, NodeAggregateMetric};
use self::structure::{ContactCountMetric, GraphMetric, NodeMetric};

/// Edge ceiling for the metrics whose cost grows fastest with graph size.
pub const EXPENSIVE_EDGE_CEILING: usize = 50_000_000;

/// Knobs shared by every calculator of a run.
#[derive(Debug, Clone)]
pub struct CalculatorOptions {
    pub starting_date: NaiveDate,
    /// Applied to centrality and Gini metrics.
    pub blackouts: Vec<BlackoutWindow>,
    /// Enables size ceilings. Without an index ceilings are not enforced.
    pub size_index: Option<Arc<GraphSizeIndex>>,
    /// Regions exposure metrics are restricted to; empty means any.
    pub exposure_regions: HashSet<String>,
    pub excluded_entities: HashSet<EntityId>,
    pub freshness_days: u32,
}

impl CalculatorOptions {
    pub fn new(starting_date: NaiveDate) -> Self {
        Self {
            starting_date,
            blackouts: Vec::new(),
            size_index: None,
            exposure_regions: HashSet::new(),
            excluded_entities: HashSet::new(),
            freshness_days: 3,
        }
    }

    pub fn from_config(config: &AttributeConfig) -> Self {
        Self {
            freshness_days: config.freshness_days,
            ..Self::new(config.min_date)
        }
    }

    pub fn with_size_index(mut self, index: Arc<GraphSizeIndex>) -> Self {
        self.size_index = Some(index);
        self
    }

    pub fn with_blackout(mut self, window: BlackoutWindow) -> Self {
        self.blackouts.push(window);
        self
    }

    fn definition(&self, name: &str, kind: MetricKind, priority: Priority) -> MetricDefinition {
        MetricDefinition::new(name, kind, self.starting_date).with_priority(priority)
    }

    fn policy(&self, definition: &MetricDefinition, with_blackouts: bool) -> EligibilityPolicy {
        let mut policy = EligibilityPolicy::for_definition(definition);
        if !self.excluded_entities.is_empty() {
            policy = policy.with_rule(EligibilityRule::ExcludeEntities(self.excluded_entities.clone()));
        }
        if with_blackouts {
            policy = policy.with_rules(self.blackouts.iter().cloned().map(EligibilityRule::Blackout));
        }
        let bounded = definition.max_nodes.is_some() || definition.max_edges.is_some();
        if let (true, Some(index)) = (bounded, &self.size_index) {
            policy = policy.with_rule(EligibilityRule::SizeCeiling(Arc::clone(index)));
        }
        policy
    }

    fn exposure_policy(&self, definition: &MetricDefinition, with_blackouts: bool) -> EligibilityPolicy {
        let policy = self.policy(definition, with_blackouts);
        if self.exposure_regions.is_empty() {
            policy
        } else {
            policy.with_rule(EligibilityRule::RegionsWithin(self.exposure_regions.clone()))
        }
    }

    fn graph_metric(
        &self,
        definition: MetricDefinition,
        with_blackouts: bool,
        contacts: &Arc<dyn ContactSource>,
        compute: structure::GraphFn,
    ) -> Arc<dyn MetricCalculator> {
        let policy = self.policy(&definition, with_blackouts);
        Arc::new(GraphMetric::new(definition, policy, Arc::clone(contacts), compute))
    }

    fn node_metric(
        &self,
        definition: MetricDefinition,
        with_blackouts: bool,
        contacts: &Arc<dyn ContactSource>,
        compute: structure::NodeFn,
    ) -> Arc<dyn MetricCalculator> {
        let policy = self.policy(&definition, with_blackouts);
        Arc::new(NodeMetric::new(definition, policy, Arc::clone(contacts), compute))
    }

    fn aggregate(
        &self,
        name: &str,
        input: &str,
        aggregate: Aggregate,
        with_blackouts: bool,
    ) -> Arc<dyn MetricCalculator> {
        let definition = self.definition(name, MetricKind::Graph, Priority::P2);
        let policy = self.policy(&definition, with_blackouts);
        Arc::new(NodeAggregateMetric::new(definition, policy, input, aggregate))
    }
}

/// Graph size and contact counts. Running these first lets a later pass
/// build the size index the ceilings need.
pub fn base_calculators(
    options: &CalculatorOptions,
    contacts: Arc<dyn ContactSource>,
) -> Vec<Arc<dyn MetricCalculator>> {
    let size = options.definition("graph_size", MetricKind::Graph, Priority::P0);
    let edges = options.definition("graph_num_edges", MetricKind::Graph, Priority::P0);
    let count = options.definition("number_of_contacts", MetricKind::Graph, Priority::P0);
    let count_policy = options.policy(&count, false);
    vec![
        options.graph_metric(size, false, &contacts, structure::node_count),
        options.graph_metric(edges, false, &contacts, structure::edge_count),
        Arc::new(ContactCountMetric::new(count, count_policy, Arc::clone(&contacts))),
    ]
}

/// Every metric the workspace ships. Case-based metrics are included only
/// when a case table is given.
pub fn standard_calculators(
    options: &CalculatorOptions,
    contacts: Arc<dyn ContactSource>,
    cases: Option<Arc<CaseTable>>,
) -> Vec<Arc<dyn MetricCalculator>> {
    let o = options;
    let mut calculators = base_calculators(o, Arc::clone(&contacts));

    calculators.extend([
        o.graph_metric(
            o.definition("graph_transitivity", MetricKind::Graph, Priority::P0),
            false,
            &contacts,
            structure::global_transitivity,
        ),
        o.graph_metric(
            o.definition("largest_eigenvalue_unweighted", MetricKind::Graph, Priority::P0)
                .with_max_edges(EXPENSIVE_EDGE_CEILING),
            false,
            &contacts,
            structure::eigenvalue_unweighted,
        ),
        o.graph_metric(
            o.definition("largest_eigenvalue_weighted", MetricKind::Graph, Priority::P0)
                .with_max_edges(EXPENSIVE_EDGE_CEILING),
            false,
            &contacts,
            structure::eigenvalue_weighted,
        ),
        o.node_metric(
            o.definition("node_degree", MetricKind::Node, Priority::P1),
            false,
            &contacts,
            structure::degrees,
        ),
        o.node_metric(
            o.definition("pagerank_centrality", MetricKind::Node, Priority::P1),
            true,
            &contacts,
            structure::pagerank_scores,
        ),
        o.node_metric(
            o.definition("eigenvector_centrality", MetricKind::Node, Priority::P1),
            true,
            &contacts,
            structure::eigenvector_scores,
        ),
        o.node_metric(
            o.definition("betweenness_centrality", MetricKind::Node, Priority::P1)
                .with_max_edges(EXPENSIVE_EDGE_CEILING),
            true,
            &contacts,
            structure::betweenness_scores,
        ),
        o.aggregate("pagerank_gini_index", "pagerank_centrality", Aggregate::Gini, true),
        o.aggregate("eigenvector_gini_index", "eigenvector_centrality", Aggregate::Gini, true),
        o.aggregate("powerlaw_degree_alpha", "node_degree", Aggregate::PowerLawAlpha, false),
        o.aggregate("powerlaw_degree_ks_statistic", "node_degree", Aggregate::PowerLawKs, false),
        o.aggregate("powerlaw_degree_is_dist", "node_degree", Aggregate::PowerLawPreferred, false),
        o.aggregate("powerlaw_degree_p_value", "node_degree", Aggregate::PowerLawPValue, false),
    ]);

    if let Some(cases) = cases {
        let feed = Arc::new(cases.feed_index());

        let accumulated = o.definition("number_of_cases_accumulated", MetricKind::Graph, Priority::P0);
        let accumulated_policy = o.policy(&accumulated, false).with_rules([
            EligibilityRule::RequireCaseFeed(Arc::clone(&feed)),
            EligibilityRule::Freshness {
                feed,
                min_days: o.freshness_days,
            },
        ]);
        calculators.push(Arc::new(AccumulatedCasesMetric::new(
            accumulated,
            accumulated_policy,
            Arc::clone(&cases) as Arc<dyn CaseSource>,
        )));

        let ppr = o.definition("personalized_pagerank_centrality", MetricKind::Node, Priority::P1);
        let ppr_policy = o.exposure_policy(&ppr, true);
        calculators.push(Arc::new(PersonalizedPageRankMetric::new(
            ppr,
            ppr_policy,
            Arc::clone(&contacts),
            Arc::clone(&cases) as Arc<dyn ExposureSource>,
        )));

        let distance = o.definition("distance_to_infected", MetricKind::Node, Priority::P1);
        let distance_policy = o.exposure_policy(&distance, false);
        calculators.push(Arc::new(DistanceToInfectedMetric::new(
            distance,
            distance_policy,
            Arc::clone(&contacts),
            cases as Arc<dyn ExposureSource>,
        )));

        for (name, input, aggregate, blackouts) in [
            ("personalized_pagerank_gini_index", "personalized_pagerank_centrality", Aggregate::Gini, true),
            ("average_distance_to_infected", "distance_to_infected", Aggregate::Mean, false),
        ] {
            let definition = o.definition(name, MetricKind::Graph, Priority::P2);
            let policy = o.exposure_policy(&definition, blackouts);
            calculators.push(Arc::new(NodeAggregateMetric::new(definition, policy, input, aggregate)));
        }
    }

    calculators
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{AttributeScheduler, SchedulerConfig};
    use crate::sources::EngineContactSource;
    use grafo_engine::LocalEngine;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, m, day).unwrap()
    }

    fn contacts() -> Arc<dyn ContactSource> {
        Arc::new(EngineContactSource::new(Arc::new(LocalEngine::new()), "contacts", "raw_pings"))
    }

    #[test]
    fn standard_set_orders_cleanly() {
        let options = CalculatorOptions::new(d(1, 10));
        let calculators = standard_calculators(&options, contacts(), Some(Arc::new(CaseTable::new())));
        assert_eq!(calculators.len(), 21);

        let mut scheduler = AttributeScheduler::new(SchedulerConfig::new(d(1, 24)));
        scheduler.register_all(calculators).unwrap();
        let order: Vec<String> = scheduler
            .execution_order()
            .unwrap()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("node_degree") < pos("powerlaw_degree_alpha"));
        assert!(pos("node_degree") < pos("powerlaw_degree_p_value"));
        assert!(pos("distance_to_infected") < pos("average_distance_to_infected"));
        assert_eq!(order[0], "graph_num_edges");
    }

    #[test]
    fn ceilings_only_apply_with_an_index() {
        let options = CalculatorOptions::new(d(1, 10));
        let plain = standard_calculators(&options, contacts(), None);
        assert_eq!(plain.len(), 16);
        let betweenness = plain.iter().find(|c| c.name() == "betweenness_centrality").unwrap();
        assert!(betweenness.policy().rules.is_empty());

        let indexed = options.with_size_index(Arc::new(GraphSizeIndex::default()));
        let with_index = standard_calculators(&indexed, contacts(), None);
        let betweenness = with_index.iter().find(|c| c.name() == "betweenness_centrality").unwrap();
        assert_eq!(betweenness.policy().rules.len(), 1);
        let degree = with_index.iter().find(|c| c.name() == "node_degree").unwrap();
        assert!(degree.policy().rules.is_empty());
    }

    #[test]
    fn blackouts_reach_centralities_only() {
        let options =
            CalculatorOptions::new(d(1, 10)).with_blackout(BlackoutWindow::global(d(2, 1), d(2, 7)));
        let calculators = standard_calculators(&options, contacts(), None);
        let rules = |name: &str| {
            calculators
                .iter()
                .find(|c| c.name() == name)
                .map(|c| c.policy().rules.len())
                .unwrap()
        };
        assert_eq!(rules("pagerank_centrality"), 1);
        assert_eq!(rules("pagerank_gini_index"), 1);
        assert_eq!(rules("graph_size"), 0);
    }
}
