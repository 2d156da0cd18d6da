use chrono::NaiveDate;
use grafo_core::config::AttributeConfig;
use grafo_core::dates::attribute_cutoff;
use serde::{Deserialize, Serialize};

/// Metric priority. Lower numeric value runs first, and a metric computed
/// from other metrics must sit strictly above all of its inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum Priority {
    /// Graph sizes and counts.
    #[default]
    P0 = 0,
    /// Node-level centralities.
    P1 = 1,
    /// Aggregates over persisted node values.
    P2 = 2,
    /// Aggregates over aggregates.
    P3 = 3,
}

/// Whether a metric yields one value per graph or one per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricKind {
    Graph,
    Node,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Graph => "GRAPH",
            MetricKind::Node => "NODE",
        }
    }
}

/// Static description of a metric, validated when registered with the
/// scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub kind: MetricKind,
    /// First as-of date ever computed for this metric.
    pub starting_date: NaiveDate,
    #[serde(default)]
    pub priority: Priority,
    /// Node ceiling; `None` is unbounded.
    #[serde(default)]
    pub max_nodes: Option<usize>,
    /// Edge ceiling; `None` is unbounded.
    #[serde(default)]
    pub max_edges: Option<usize>,
    /// Metrics read back from the store for the same window.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl MetricDefinition {
    pub fn new(name: impl Into<String>, kind: MetricKind, starting_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            kind,
            starting_date,
            priority: Priority::default(),
            max_nodes: None,
            max_edges: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = Some(max_nodes);
        self
    }

    pub fn with_max_edges(mut self, max_edges: usize) -> Self {
        self.max_edges = Some(max_edges);
        self
    }

    pub fn depends_on(mut self, metric: impl Into<String>) -> Self {
        self.depends_on.push(metric.into());
        self
    }

    /// Structural problems that make the definition unusable.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push("metric name is empty".to_string());
        }
        if self.max_nodes == Some(0) || self.max_edges == Some(0) {
            problems.push("size ceilings must be positive".to_string());
        }
        if self.depends_on.iter().any(|d| d == &self.name) {
            problems.push("metric depends on itself".to_string());
        }
        let mut deps = self.depends_on.clone();
        deps.sort();
        deps.dedup();
        if deps.len() != self.depends_on.len() {
            problems.push("dependency listed twice".to_string());
        }
        problems
    }
}

/// Per-run scheduler configuration, derived once from [`AttributeConfig`]
/// and the run's reference date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Length `W` of the trailing window, in days.
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    /// Stride between consecutive as-of dates.
    #[serde(default = "default_shift_days")]
    pub shift_days: u32,
    /// Last as-of date this run may compute.
    pub cutoff: NaiveDate,
    /// Abandon a failing (entity, metric) pair instead of aborting the run.
    #[serde(default)]
    pub isolate_entity_failures: bool,
}

fn default_window_days() -> u32 { 7 }
fn default_shift_days() -> u32 { 3 }

impl SchedulerConfig {
    pub fn new(cutoff: NaiveDate) -> Self {
        Self {
            window_days: default_window_days(),
            shift_days: default_shift_days(),
            cutoff,
            isolate_entity_failures: false,
        }
    }

    pub fn from_attribute_config(config: &AttributeConfig, today: NaiveDate) -> Self {
        Self {
            window_days: config.window_days,
            shift_days: config.shift_days,
            cutoff: attribute_cutoff(today, config.ingestion_lag_days),
            isolate_entity_failures: config.isolate_entity_failures,
        }
    }

    pub fn with_window(mut self, window_days: u32, shift_days: u32) -> Self {
        self.window_days = window_days;
        self.shift_days = shift_days;
        self
    }
}

/// One value produced by a calculator for one window. Node metrics carry the
/// node identifier; a `None` value records "no data yet" for the period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub identifier: Option<String>,
    pub value: Option<f64>,
}

impl AttributeValue {
    pub fn graph(value: f64) -> Self {
        Self {
            identifier: None,
            value: Some(value),
        }
    }

    pub fn node(identifier: impl Into<String>, value: f64) -> Self {
        Self {
            identifier: Some(identifier.into()),
            value: Some(value),
        }
    }

    pub fn null() -> Self {
        Self {
            identifier: None,
            value: None,
        }
    }

    /// `Some(v)` as a value, `None` as a null row. Non-finite results are
    /// stored as null.
    pub fn graph_opt(value: Option<f64>) -> Self {
        Self {
            identifier: None,
            value: value.filter(|v| v.is_finite()),
        }
    }
}

/// A persisted attribute row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub entity_id: String,
    pub date: NaiveDate,
    pub metric_name: String,
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Entity kind label.
    #[serde(rename = "type")]
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::P0 < Priority::P1);
        assert!(Priority::P1 < Priority::P2);
        assert!(Priority::P2 < Priority::P3);
    }

    #[test]
    fn definition_builder_and_problems() {
        let def = MetricDefinition::new("pagerank_gini_index", MetricKind::Graph, d(2021, 1, 10))
            .with_priority(Priority::P2)
            .depends_on("pagerank_centrality");
        assert!(def.problems().is_empty());

        let bad = MetricDefinition::new("x", MetricKind::Node, d(2021, 1, 10))
            .with_max_edges(0)
            .depends_on("x");
        assert_eq!(bad.problems().len(), 2);
    }

    #[test]
    fn config_from_attribute_section() {
        let attrs = grafo_core::Config::for_profile("GRAFO_TYPES_TEST_UNSET").attributes;
        let config = SchedulerConfig::from_attribute_config(&attrs, d(2021, 1, 28));
        assert_eq!(config.cutoff, d(2021, 1, 24));
        assert_eq!(config.window_days, 7);
        assert_eq!(config.shift_days, 3);
    }

    #[test]
    fn record_serializes_kind_as_type() {
        let row = AttributeRecord {
            entity_id: "bogota".into(),
            date: d(2021, 1, 10),
            metric_name: "graph_size".into(),
            value: Some(12.0),
            identifier: None,
            kind: "city".into(),
        };
        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains("\"type\":\"city\""));
        assert!(!json.contains("identifier"));
        let back: AttributeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn non_finite_graph_values_become_null() {
        assert_eq!(AttributeValue::graph_opt(Some(f64::NAN)).value, None);
        assert_eq!(AttributeValue::graph_opt(Some(2.0)).value, Some(2.0));
    }
}
