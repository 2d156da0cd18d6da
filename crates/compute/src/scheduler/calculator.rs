use chrono::NaiveDate;
use grafo_core::Entity;
use grafo_engine::EngineError;

use super::eligibility::EligibilityPolicy;
use super::types::{AttributeValue, MetricDefinition};
use super::watermark::{WatermarkError, WatermarkStore};

/// Error type for metric calculators.
#[derive(Debug, thiserror::Error)]
pub enum CalculatorError {
    /// The scheduler asked for something the policy should have filtered.
    #[error("Metric {metric} called for unsupported entity {entity}")]
    Unsupported { metric: String, entity: String },
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Attribute store error: {0}")]
    Store(#[from] WatermarkError),
    #[error("Calculation failed: {0}")]
    Failed(String),
}

/// Everything a calculator sees for one period.
pub struct MetricWindow<'a> {
    pub entity: &'a Entity,
    /// As-of date; also the inclusive window end.
    pub date: NaiveDate,
    /// Inclusive window start, `date - W + 1`.
    pub start: NaiveDate,
    /// Read access to attributes persisted earlier, for layered metrics.
    pub store: &'a dyn WatermarkStore,
}

impl MetricWindow<'_> {
    pub fn end(&self) -> NaiveDate {
        self.date
    }
}

/// A pluggable metric.
///
/// Eligibility defaults delegate to the calculator's [`EligibilityPolicy`];
/// override them only for checks a policy cannot express.
pub trait MetricCalculator: Send + Sync {
    fn definition(&self) -> &MetricDefinition;

    fn policy(&self) -> &EligibilityPolicy;

    fn name(&self) -> &str {
        &self.definition().name
    }

    fn entity_supported(&self, entity: &Entity) -> bool {
        self.policy().entity_supported(entity)
    }

    fn entity_supported_on_date(&self, entity: &Entity, date: NaiveDate) -> bool {
        self.policy().entity_supported_on_date(entity, date)
    }

    /// One value for GRAPH metrics, one per node for NODE metrics. Missing
    /// input data is a null value, not an error.
    fn compute_for_window(&self, window: &MetricWindow<'_>) -> Result<Vec<AttributeValue>, CalculatorError>;
}
