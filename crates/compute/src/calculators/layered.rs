//! Graph-level metrics computed from node values persisted earlier for the
//! same entity and date.

use crate::algorithms::distribution::{fit_power_law, test_power_law};
use crate::algorithms::inequality::gini;
use crate::scheduler::{
    AttributeValue, CalculatorError, EligibilityPolicy, MetricCalculator, MetricDefinition, MetricWindow,
};

/// How persisted node values fold into one number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Gini,
    Mean,
    PowerLawAlpha,
    PowerLawKs,
    /// 1 when a power law beats both exponential and log-normal fits.
    PowerLawPreferred,
    /// Larger of the two comparison p-values: how weakly the sign of the
    /// weaker likelihood ratio is supported.
    PowerLawPValue,
}

impl Aggregate {
    fn apply(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Aggregate::Gini => gini(values),
            Aggregate::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            Aggregate::PowerLawAlpha => fit_power_law(values).map(|fit| fit.alpha),
            Aggregate::PowerLawKs => fit_power_law(values).map(|fit| fit.ks_statistic),
            Aggregate::PowerLawPreferred => {
                test_power_law(values).map(|test| if test.power_law_preferred() { 1.0 } else { 0.0 })
            }
            Aggregate::PowerLawPValue => test_power_law(values)
                .map(|test| test.vs_exponential.p_value.max(test.vs_lognormal.p_value)),
        }
    }
}

/// Aggregate of one node metric's persisted values. Requires the input
/// metric in `depends_on`.
pub struct NodeAggregateMetric {
    definition: MetricDefinition,
    policy: EligibilityPolicy,
    input: String,
    aggregate: Aggregate,
}

impl NodeAggregateMetric {
    pub fn new(
        definition: MetricDefinition,
        policy: EligibilityPolicy,
        input: impl Into<String>,
        aggregate: Aggregate,
    ) -> Self {
        let input = input.into();
        let definition = if definition.depends_on.contains(&input) {
            definition
        } else {
            definition.depends_on(input.clone())
        };
        Self {
            definition,
            policy,
            input,
            aggregate,
        }
    }

    pub fn input(&self) -> &str {
        &self.input
    }
}

impl MetricCalculator for NodeAggregateMetric {
    fn definition(&self) -> &MetricDefinition {
        &self.definition
    }

    fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    fn compute_for_window(&self, window: &MetricWindow<'_>) -> Result<Vec<AttributeValue>, CalculatorError> {
        let values: Vec<f64> = window
            .store
            .period_rows(&window.entity.id, &self.input, window.date)?
            .into_iter()
            .filter_map(|row| row.value)
            .collect();
        Ok(vec![AttributeValue::graph_opt(self.aggregate.apply(&values))])
    }
}
