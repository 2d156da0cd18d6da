use chrono::NaiveDate;

use super::calculator::CalculatorError;
use super::watermark::WatermarkError;

/// Error type for scheduler registration and runs.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Invalid metric {metric}: {reason}")]
    InvalidMetric { metric: String, reason: String },
    #[error("Metric registered twice: {0}")]
    DuplicateMetric(String),
    #[error("Metric {metric} depends on unknown metric {dependency}")]
    UnknownDependency { metric: String, dependency: String },
    #[error("Dependency cycle between metrics: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
    #[error("Metric {metric} must have a lower priority than its dependency {dependency}")]
    PriorityOrder { metric: String, dependency: String },
    #[error("Attribute store error: {0}")]
    Store(#[from] WatermarkError),
    #[error("Metric {metric} failed for {entity} @ {date}: {source}")]
    Calculator {
        metric: String,
        entity: String,
        date: NaiveDate,
        #[source]
        source: CalculatorError,
    },
    #[error("Metric {metric} returned invalid rows for {entity} @ {date}: {reason}")]
    InvalidRows {
        metric: String,
        entity: String,
        date: NaiveDate,
        reason: String,
    },
}

impl SchedulerError {
    /// Calculator and data-source failures that may be confined to one
    /// entity. Integrity violations never are.
    pub fn is_entity_local(&self) -> bool {
        matches!(
            self,
            SchedulerError::Calculator { source, .. }
                if !matches!(source, CalculatorError::Unsupported { .. } | CalculatorError::Store(_))
        )
    }
}
