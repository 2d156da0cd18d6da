#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use chrono::NaiveDate;
    use grafo_core::{Entity, EntityRegistry};

    use crate::scheduler::calculator::{CalculatorError, MetricCalculator, MetricWindow};
    use crate::scheduler::eligibility::{BlackoutWindow, EligibilityPolicy, EligibilityRule};
    use crate::scheduler::error::SchedulerError;
    use crate::scheduler::runner::AttributeScheduler;
    use crate::scheduler::types::{
        AttributeRecord, AttributeValue, MetricDefinition, MetricKind, Priority, SchedulerConfig,
    };
    use crate::scheduler::watermark::{MemoryWatermarkStore, WatermarkError, WatermarkStore};

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, m, day).unwrap()
    }

    #[derive(Clone, Copy)]
    enum Output {
        Graph(f64),
        NoNodes,
        Nodes,
        TwoGraphValues,
    }

    /// Mock calculator for testing.
    struct MockCalculator {
        definition: MetricDefinition,
        policy: EligibilityPolicy,
        output: Output,
        fail_for: Option<String>,
        calls: Arc<AtomicUsize>,
        windows: Arc<Mutex<Vec<(NaiveDate, NaiveDate)>>>,
    }

    impl MockCalculator {
        fn new(definition: MetricDefinition, output: Output) -> Self {
            Self {
                policy: EligibilityPolicy::for_definition(&definition),
                definition,
                output,
                fail_for: None,
                calls: Arc::new(AtomicUsize::new(0)),
                windows: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn graph(name: &str) -> Self {
            Self::new(MetricDefinition::new(name, MetricKind::Graph, d(1, 10)), Output::Graph(1.0))
        }

        fn with_rule(mut self, rule: EligibilityRule) -> Self {
            self.policy = self.policy.with_rule(rule);
            self
        }

        fn failing_for(mut self, entity: &str) -> Self {
            self.fail_for = Some(entity.to_string());
            self
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    impl MetricCalculator for MockCalculator {
        fn definition(&self) -> &MetricDefinition { &self.definition }
        fn policy(&self) -> &EligibilityPolicy { &self.policy }

        fn compute_for_window(&self, window: &MetricWindow<'_>) -> Result<Vec<AttributeValue>, CalculatorError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.windows.lock().unwrap().push((window.start, window.end()));
            if self.fail_for.as_deref() == Some(window.entity.id.as_str()) {
                return Err(CalculatorError::Failed("source unavailable".into()));
            }
            Ok(match self.output {
                Output::Graph(v) => vec![AttributeValue::graph(v)],
                Output::NoNodes => Vec::new(),
                Output::Nodes => vec![AttributeValue::node("a", 1.0), AttributeValue::node("b", 2.0)],
                Output::TwoGraphValues => vec![AttributeValue::graph(1.0), AttributeValue::graph(2.0)],
            })
        }
    }

    fn weekly(cutoff: NaiveDate) -> SchedulerConfig {
        SchedulerConfig::new(cutoff).with_window(7, 7)
    }

    fn registry(entities: impl IntoIterator<Item = Entity>) -> EntityRegistry {
        EntityRegistry::from_entities(entities).unwrap()
    }

    fn dates(store: &dyn WatermarkStore, metric: &str) -> Vec<NaiveDate> {
        let mut dates: Vec<_> = store.metric_rows(metric).unwrap().into_iter().map(|r| r.date).collect();
        dates.sort();
        dates.dedup();
        dates
    }

    #[test]
    fn fresh_metric_walks_from_starting_date_to_cutoff() {
        let calc = Arc::new(MockCalculator::graph("graph_size"));
        let mut scheduler = AttributeScheduler::new(weekly(d(1, 24)));
        scheduler.register(calc.clone()).unwrap();
        let store = MemoryWatermarkStore::new();

        let summary = scheduler.run(&registry([Entity::rolling("bogota", "co")]), &store).unwrap();

        assert_eq!(dates(&store, "graph_size"), [d(1, 10), d(1, 17), d(1, 24)]);
        assert_eq!(store.max_dates("graph_size").unwrap()["bogota"], d(1, 24));
        assert_eq!(calc.call_count(), 3);
        assert_eq!(summary.metrics.get("graph_size").unwrap().computed, 3);
    }

    #[test]
    fn ineligible_date_is_skipped_without_stalling() {
        let calc = Arc::new(
            MockCalculator::graph("graph_size")
                .with_rule(EligibilityRule::Blackout(BlackoutWindow::global(d(1, 17), d(1, 17)))),
        );
        let mut scheduler = AttributeScheduler::new(weekly(d(1, 24)));
        scheduler.register(calc.clone()).unwrap();
        let store = MemoryWatermarkStore::new();

        let summary = scheduler.run(&registry([Entity::rolling("bogota", "co")]), &store).unwrap();

        assert_eq!(dates(&store, "graph_size"), [d(1, 10), d(1, 24)]);
        assert_eq!(store.max_dates("graph_size").unwrap()["bogota"], d(1, 24));
        assert_eq!(summary.metrics.get("graph_size").unwrap().skipped, 1);
    }

    #[test]
    fn rerun_with_same_cutoff_computes_nothing() {
        let calc = Arc::new(MockCalculator::graph("graph_size"));
        let mut scheduler = AttributeScheduler::new(weekly(d(1, 24)));
        scheduler.register(calc.clone()).unwrap();
        let store = MemoryWatermarkStore::new();
        let entities = registry([Entity::rolling("bogota", "co"), Entity::rolling("cali", "co")]);

        scheduler.run(&entities, &store).unwrap();
        let rows = store.len();
        let second = scheduler.run(&entities, &store).unwrap();

        assert_eq!(store.len(), rows);
        assert_eq!(second.metrics.total_computed(), 0);
        assert_eq!(calc.call_count(), 6);
    }

    #[test]
    fn resumes_one_shift_after_the_watermark() {
        let calc = Arc::new(MockCalculator::graph("graph_size"));
        let mut scheduler = AttributeScheduler::new(weekly(d(1, 24)));
        scheduler.register(calc.clone()).unwrap();
        let store = MemoryWatermarkStore::new();
        store
            .append(&[AttributeRecord {
                entity_id: "bogota".into(),
                date: d(1, 10),
                metric_name: "graph_size".into(),
                value: Some(4.0),
                identifier: None,
                kind: "location".into(),
            }])
            .unwrap();

        scheduler.run(&registry([Entity::rolling("bogota", "co")]), &store).unwrap();

        assert_eq!(calc.call_count(), 2);
        assert_eq!(
            *calc.windows.lock().unwrap(),
            [(d(1, 11), d(1, 17)), (d(1, 18), d(1, 24))]
        );
    }

    #[test]
    fn fixed_entity_stops_when_windows_leave_its_interval() {
        let calc = Arc::new(MockCalculator::graph("graph_size"));
        let mut scheduler = AttributeScheduler::new(weekly(d(1, 31)));
        scheduler.register(calc.clone()).unwrap();
        let store = MemoryWatermarkStore::new();
        let campus = Entity::fixed("campus", "co", d(1, 10), d(1, 12));

        scheduler.run(&registry([campus]), &store).unwrap();

        // last window touching [01-10, 01-12) ends on 01-17
        assert_eq!(dates(&store, "graph_size"), [d(1, 10), d(1, 17)]);
    }

    #[test]
    fn empty_node_output_persists_a_null_marker() {
        let def = MetricDefinition::new("node_degree", MetricKind::Node, d(1, 10)).with_priority(Priority::P1);
        let calc = Arc::new(MockCalculator::new(def, Output::NoNodes));
        let mut scheduler = AttributeScheduler::new(weekly(d(1, 10)));
        scheduler.register(calc).unwrap();
        let store = MemoryWatermarkStore::new();

        let summary = scheduler.run(&registry([Entity::rolling("bogota", "co")]), &store).unwrap();

        let rows = store.period_rows("bogota", "node_degree", d(1, 10)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, None);
        assert_eq!(rows[0].identifier, None);
        assert_eq!(summary.metrics.get("node_degree").unwrap().null_periods, 1);
    }

    #[test]
    fn node_rows_carry_identifiers_and_entity_kind() {
        let def = MetricDefinition::new("node_degree", MetricKind::Node, d(1, 10));
        let calc = Arc::new(MockCalculator::new(def, Output::Nodes));
        let mut scheduler = AttributeScheduler::new(weekly(d(1, 10)));
        scheduler.register(calc).unwrap();
        let store = MemoryWatermarkStore::new();

        scheduler
            .run(&registry([Entity::rolling("bogota", "co").with_kind("city")]), &store)
            .unwrap();

        let rows = store.period_rows("bogota", "node_degree", d(1, 10)).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.kind == "city" && r.identifier.is_some()));
    }

    #[test]
    fn graph_metric_with_two_values_is_rejected() {
        let def = MetricDefinition::new("graph_size", MetricKind::Graph, d(1, 10));
        let calc = Arc::new(MockCalculator::new(def, Output::TwoGraphValues));
        let mut scheduler = AttributeScheduler::new(weekly(d(1, 10)));
        scheduler.register(calc).unwrap();
        let store = MemoryWatermarkStore::new();

        let err = scheduler.run(&registry([Entity::rolling("bogota", "co")]), &store).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidRows { .. }));
        assert!(store.is_empty());
    }

    /// Store that forgets its watermarks, so the scheduler retries periods
    /// that are already persisted.
    struct ForgetfulStore(MemoryWatermarkStore);

    impl WatermarkStore for ForgetfulStore {
        fn max_dates(&self, _metric: &str) -> Result<HashMap<String, NaiveDate>, WatermarkError> {
            Ok(HashMap::new())
        }
        fn is_computed(&self, entity: &str, metric: &str, date: NaiveDate) -> Result<bool, WatermarkError> {
            self.0.is_computed(entity, metric, date)
        }
        fn append(&self, rows: &[AttributeRecord]) -> Result<(), WatermarkError> {
            self.0.append(rows)
        }
        fn period_rows(&self, entity: &str, metric: &str, date: NaiveDate) -> Result<Vec<AttributeRecord>, WatermarkError> {
            self.0.period_rows(entity, metric, date)
        }
        fn metric_rows(&self, metric: &str) -> Result<Vec<AttributeRecord>, WatermarkError> {
            self.0.metric_rows(metric)
        }
    }

    #[test]
    fn duplicate_period_aborts_the_run() {
        let calc = Arc::new(MockCalculator::graph("graph_size"));
        let mut scheduler = AttributeScheduler::new(weekly(d(1, 17)));
        scheduler.register(calc).unwrap();
        let store = ForgetfulStore(MemoryWatermarkStore::new());
        let entities = registry([Entity::rolling("bogota", "co")]);

        scheduler.run(&entities, &store).unwrap();
        let err = scheduler.run(&entities, &store).unwrap_err();

        assert!(matches!(
            err,
            SchedulerError::Store(WatermarkError::DuplicatePeriod { date, .. }) if date == d(1, 10)
        ));
        assert_eq!(store.0.len(), 2);
    }

    #[test]
    fn calculator_failure_is_fatal_by_default() {
        let calc = Arc::new(MockCalculator::graph("graph_size").failing_for("bogota"));
        let mut scheduler = AttributeScheduler::new(weekly(d(1, 24)));
        scheduler.register(calc).unwrap();
        let store = MemoryWatermarkStore::new();
        let entities = registry([Entity::rolling("bogota", "co"), Entity::rolling("cali", "co")]);

        let err = scheduler.run(&entities, &store).unwrap_err();
        assert!(matches!(err, SchedulerError::Calculator { ref entity, .. } if entity == "bogota"));
        assert!(store.is_empty());
    }

    #[test]
    fn isolation_abandons_only_the_failing_entity() {
        let calc = Arc::new(MockCalculator::graph("graph_size").failing_for("bogota"));
        let mut config = weekly(d(1, 24));
        config.isolate_entity_failures = true;
        let mut scheduler = AttributeScheduler::new(config);
        scheduler.register(calc).unwrap();
        let store = MemoryWatermarkStore::new();
        let entities = registry([Entity::rolling("bogota", "co"), Entity::rolling("cali", "co")]);

        let summary = scheduler.run(&entities, &store).unwrap();

        let stats = summary.metrics.get("graph_size").unwrap();
        assert_eq!(stats.failed_entities, ["bogota"]);
        assert_eq!(stats.computed, 3);
        assert!(!store.max_dates("graph_size").unwrap().contains_key("bogota"));
    }

    #[test]
    fn layered_metrics_run_after_their_inputs() {
        let gini = MetricDefinition::new("pagerank_gini_index", MetricKind::Graph, d(1, 10))
            .with_priority(Priority::P2)
            .depends_on("pagerank_centrality");
        let pagerank =
            MetricDefinition::new("pagerank_centrality", MetricKind::Node, d(1, 10)).with_priority(Priority::P1);

        let mut scheduler = AttributeScheduler::new(weekly(d(1, 24)));
        scheduler.register(Arc::new(MockCalculator::new(gini, Output::Graph(0.3)))).unwrap();
        scheduler.register(Arc::new(MockCalculator::graph("graph_size"))).unwrap();
        scheduler.register(Arc::new(MockCalculator::new(pagerank, Output::Nodes))).unwrap();

        let order: Vec<String> = scheduler
            .execution_order()
            .unwrap()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(order, ["graph_size", "pagerank_centrality", "pagerank_gini_index"]);
    }

    #[test]
    fn dependency_problems_are_rejected() {
        let layered = |name: &str, dep: &str, priority: Priority| {
            Arc::new(MockCalculator::new(
                MetricDefinition::new(name, MetricKind::Graph, d(1, 10))
                    .with_priority(priority)
                    .depends_on(dep),
                Output::Graph(1.0),
            ))
        };

        let mut unknown = AttributeScheduler::new(weekly(d(1, 24)));
        unknown.register(layered("gini", "missing", Priority::P2)).unwrap();
        assert!(matches!(unknown.execution_order(), Err(SchedulerError::UnknownDependency { .. })));

        let mut cycle = AttributeScheduler::new(weekly(d(1, 24)));
        cycle.register(layered("a", "b", Priority::P1)).unwrap();
        cycle.register(layered("b", "a", Priority::P2)).unwrap();
        assert!(matches!(cycle.execution_order(), Err(SchedulerError::DependencyCycle(names)) if names == ["a", "b"]));

        let mut inverted = AttributeScheduler::new(weekly(d(1, 24)));
        inverted.register(Arc::new(MockCalculator::graph("base"))).unwrap();
        inverted.register(layered("same_level", "base", Priority::P0)).unwrap();
        assert!(matches!(inverted.execution_order(), Err(SchedulerError::PriorityOrder { .. })));
    }

    #[test]
    fn registration_validates_definitions() {
        let mut scheduler = AttributeScheduler::new(weekly(d(1, 24)));
        scheduler.register(Arc::new(MockCalculator::graph("graph_size"))).unwrap();
        assert!(matches!(
            scheduler.register(Arc::new(MockCalculator::graph("graph_size"))),
            Err(SchedulerError::DuplicateMetric(_))
        ));
        assert!(matches!(
            scheduler.register(Arc::new(MockCalculator::graph(" "))),
            Err(SchedulerError::InvalidMetric { .. })
        ));
        assert_eq!(scheduler.calculators().len(), 1);
    }
}
