use std::sync::Arc;

use crate::scheduler::{
    AttributeValue, CalculatorError, EligibilityPolicy, MetricCalculator, MetricDefinition, MetricWindow,
};
use crate::sources::CaseSource;

/// Cases reported in the entity's city up to the as-of date.
pub struct AccumulatedCasesMetric {
    definition: MetricDefinition,
    policy: EligibilityPolicy,
    cases: Arc<dyn CaseSource>,
}

impl AccumulatedCasesMetric {
    pub fn new(definition: MetricDefinition, policy: EligibilityPolicy, cases: Arc<dyn CaseSource>) -> Self {
        Self {
            definition,
            policy,
            cases,
        }
    }
}

impl MetricCalculator for AccumulatedCasesMetric {
    fn definition(&self) -> &MetricDefinition {
        &self.definition
    }

    fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    fn compute_for_window(&self, window: &MetricWindow<'_>) -> Result<Vec<AttributeValue>, CalculatorError> {
        let city = window
            .entity
            .city
            .as_deref()
            .ok_or_else(|| CalculatorError::Unsupported {
                metric: self.definition.name.clone(),
                entity: window.entity.id.clone(),
            })?;
        let total = self.cases.accumulated_cases(city, window.date);
        Ok(vec![AttributeValue::graph_opt(total.map(|n| n as f64))])
    }
}
