use std::sync::Arc;

use tracing::info;

use crate::scheduler::calculator::MetricCalculator;
use crate::scheduler::error::SchedulerError;
use crate::scheduler::types::SchedulerConfig;

/// The attribute scheduler. Holds the run configuration and the registered
/// calculators; all durable state lives in the store passed to `run`.
pub struct AttributeScheduler {
    pub(super) config: SchedulerConfig,
    /// Registered calculators, in registration order.
    pub(super) calculators: Vec<Arc<dyn MetricCalculator>>,
}

impl AttributeScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            calculators: Vec::new(),
        }
    }

    /// Register a calculator after validating its definition.
    pub fn register(&mut self, calculator: Arc<dyn MetricCalculator>) -> Result<(), SchedulerError> {
        let definition = calculator.definition();
        if let Some(reason) = definition.problems().into_iter().next() {
            return Err(SchedulerError::InvalidMetric {
                metric: definition.name.clone(),
                reason,
            });
        }
        if self.calculators.iter().any(|c| c.name() == definition.name) {
            return Err(SchedulerError::DuplicateMetric(definition.name.clone()));
        }
        info!(
            "Registered metric: {} (priority: {:?}, kind: {})",
            definition.name,
            definition.priority,
            definition.kind.as_str()
        );
        self.calculators.push(calculator);
        Ok(())
    }

    pub fn register_all(
        &mut self,
        calculators: impl IntoIterator<Item = Arc<dyn MetricCalculator>>,
    ) -> Result<(), SchedulerError> {
        calculators.into_iter().try_for_each(|c| self.register(c))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Get a reference to the registered calculators.
    pub fn calculators(&self) -> &[Arc<dyn MetricCalculator>] {
        &self.calculators
    }
}
