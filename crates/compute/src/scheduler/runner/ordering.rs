use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::scheduler::calculator::MetricCalculator;
use crate::scheduler::error::SchedulerError;
use crate::scheduler::types::Priority;

use super::AttributeScheduler;

impl AttributeScheduler {
    /// Calculators in execution order: every metric after the metrics it
    /// depends on, ties broken by priority and then by name.
    pub fn execution_order(&self) -> Result<Vec<Arc<dyn MetricCalculator>>, SchedulerError> {
        let by_name: HashMap<&str, &Arc<dyn MetricCalculator>> =
            self.calculators.iter().map(|c| (c.name(), c)).collect();

        for calculator in &self.calculators {
            for dependency in &calculator.definition().depends_on {
                if !by_name.contains_key(dependency.as_str()) {
                    return Err(SchedulerError::UnknownDependency {
                        metric: calculator.name().to_string(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        // Kahn's algorithm over (priority, name) so the order is deterministic.
        let mut pending: HashMap<&str, usize> = self
            .calculators
            .iter()
            .map(|c| (c.name(), c.definition().depends_on.len()))
            .collect();
        let mut ready: BTreeSet<(Priority, &str)> = self
            .calculators
            .iter()
            .filter(|c| c.definition().depends_on.is_empty())
            .map(|c| (c.definition().priority, c.name()))
            .collect();

        let mut order = Vec::with_capacity(self.calculators.len());
        while let Some(next) = ready.pop_first() {
            let (_, name) = next;
            order.push(Arc::clone(by_name[name]));
            for dependent in &self.calculators {
                if dependent.definition().depends_on.iter().any(|d| d == name) {
                    let remaining = pending.entry(dependent.name()).or_default();
                    *remaining -= 1;
                    if *remaining == 0 {
                        ready.insert((dependent.definition().priority, dependent.name()));
                    }
                }
            }
        }

        if order.len() < self.calculators.len() {
            let mut stuck: Vec<String> = self
                .calculators
                .iter()
                .filter(|c| !order.iter().any(|o| o.name() == c.name()))
                .map(|c| c.name().to_string())
                .collect();
            stuck.sort();
            return Err(SchedulerError::DependencyCycle(stuck));
        }

        for calculator in &order {
            let definition = calculator.definition();
            for dependency in &definition.depends_on {
                if by_name[dependency.as_str()].definition().priority >= definition.priority {
                    return Err(SchedulerError::PriorityOrder {
                        metric: definition.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        Ok(order)
    }
}
