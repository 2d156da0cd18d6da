use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Counters for one metric over one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricRunStats {
    /// Periods persisted.
    pub computed: u64,
    /// Candidate dates rejected by eligibility.
    pub skipped: u64,
    /// Persisted periods whose values were all null.
    pub null_periods: u64,
    /// Entities abandoned under failure isolation.
    pub failed_entities: Vec<String>,
    /// Mean wall time per persisted period.
    pub avg_duration: Duration,
}

/// Per-metric counters kept by the scheduler during a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunMetrics {
    pub metrics: BTreeMap<String, MetricRunStats>,
}

impl RunMetrics {
    fn stats(&mut self, metric: &str) -> &mut MetricRunStats {
        self.metrics.entry(metric.to_string()).or_default()
    }

    /// Record one persisted period.
    pub fn record_computed(&mut self, metric: &str, duration: Duration, all_null: bool) {
        let stats = self.stats(metric);
        stats.computed += 1;
        if all_null {
            stats.null_periods += 1;
        }

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        stats.avg_duration = if stats.computed == 1 {
            duration
        } else {
            let prev = stats.avg_duration.as_nanos() as f64;
            let cur = duration.as_nanos() as f64;
            Duration::from_nanos((prev + (cur - prev) / stats.computed as f64) as u64)
        };
    }

    pub fn record_skipped(&mut self, metric: &str) {
        self.stats(metric).skipped += 1;
    }

    pub fn record_failure(&mut self, metric: &str, entity: &str) {
        self.stats(metric).failed_entities.push(entity.to_string());
    }

    pub fn get(&self, metric: &str) -> Option<&MetricRunStats> {
        self.metrics.get(metric)
    }

    pub fn total_computed(&self) -> u64 {
        self.metrics.values().map(|s| s.computed).sum()
    }

    pub fn total_skipped(&self) -> u64 {
        self.metrics.values().map(|s| s.skipped).sum()
    }
}

/// Outcome of one scheduler run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub metrics: RunMetrics,
}
