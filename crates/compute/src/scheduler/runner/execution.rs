use std::collections::HashSet;
use std::time::Instant;

use chrono::{Duration, NaiveDate, Utc};
use grafo_core::dates::{stepped_dates, window_bounds};
use grafo_core::{Entity, EntityRegistry};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::scheduler::calculator::{MetricCalculator, MetricWindow};
use crate::scheduler::error::SchedulerError;
use crate::scheduler::metrics::{RunMetrics, RunSummary};
use crate::scheduler::types::{AttributeRecord, AttributeValue, MetricKind};
use crate::scheduler::watermark::WatermarkStore;

use super::AttributeScheduler;

impl AttributeScheduler {
    /// Run every registered metric for every entity up to the cutoff.
    ///
    /// Fails fast: the first error aborts the run and whatever was appended
    /// before it is the resume point of the next run.
    pub fn run(
        &self,
        registry: &EntityRegistry,
        store: &dyn WatermarkStore,
    ) -> Result<RunSummary, SchedulerError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let order = self.execution_order()?;
        info!(
            run_id = %run_id,
            metrics = order.len(),
            entities = registry.len(),
            cutoff = %self.config.cutoff,
            "Attribute run starting"
        );

        let mut metrics = RunMetrics::default();
        for calculator in &order {
            self.run_metric(calculator.as_ref(), registry, store, &mut metrics)?;
        }

        info!(
            run_id = %run_id,
            computed = metrics.total_computed(),
            skipped = metrics.total_skipped(),
            "Attribute run finished"
        );
        Ok(RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            metrics,
        })
    }

    fn run_metric(
        &self,
        calculator: &dyn MetricCalculator,
        registry: &EntityRegistry,
        store: &dyn WatermarkStore,
        metrics: &mut RunMetrics,
    ) -> Result<(), SchedulerError> {
        let metric = calculator.name();
        let watermarks = store.max_dates(metric)?;
        let shift = Duration::days(self.config.shift_days as i64);

        for entity in registry.iter() {
            if !calculator.entity_supported(entity) {
                debug!(metric = %metric, entity = %entity.id, "Entity not supported");
                continue;
            }
            let resume = match watermarks.get(&entity.id) {
                Some(mark) => *mark + shift,
                None => calculator.definition().starting_date,
            };
            let last = self.last_date_for(entity);
            if resume <= last {
                info!(metric = %metric, entity = %entity.id, from = %resume, to = %last, "Computing");
            }

            match self.run_entity(calculator, entity, resume, last, store, metrics) {
                Ok(()) => {}
                Err(e) if self.config.isolate_entity_failures && e.is_entity_local() => {
                    warn!(metric = %metric, entity = %entity.id, error = %e, "Abandoning entity for this run");
                    metrics.record_failure(metric, &entity.id);
                }
                Err(e) => {
                    error!(metric = %metric, entity = %entity.id, error = %e, "Aborting attribute run");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// The cutoff, or earlier for fixed entities whose windows stop
    /// overlapping their interval.
    pub(super) fn last_date_for(&self, entity: &Entity) -> NaiveDate {
        match entity.construction_mode.last_relevant_date(self.config.window_days) {
            Some(last) => last.min(self.config.cutoff),
            None => self.config.cutoff,
        }
    }

    fn run_entity(
        &self,
        calculator: &dyn MetricCalculator,
        entity: &Entity,
        resume: NaiveDate,
        last: NaiveDate,
        store: &dyn WatermarkStore,
        metrics: &mut RunMetrics,
    ) -> Result<(), SchedulerError> {
        let metric = calculator.name();
        for date in stepped_dates(resume, last, self.config.shift_days) {
            if !calculator.entity_supported_on_date(entity, date) {
                debug!(metric = %metric, entity = %entity.id, date = %date, "Skipping ineligible date");
                metrics.record_skipped(metric);
                continue;
            }

            let started = Instant::now();
            let (start, _) = window_bounds(date, self.config.window_days);
            let window = MetricWindow {
                entity,
                date,
                start,
                store,
            };
            let values = calculator
                .compute_for_window(&window)
                .map_err(|source| SchedulerError::Calculator {
                    metric: metric.to_string(),
                    entity: entity.id.clone(),
                    date,
                    source,
                })?;

            let rows = self.to_records(calculator, entity, date, values)?;
            let all_null = rows.iter().all(|r| r.value.is_none());
            store.append(&rows)?;
            metrics.record_computed(metric, started.elapsed(), all_null);
            debug!(metric = %metric, entity = %entity.id, date = %date, rows = rows.len(), "Persisted period");
        }
        Ok(())
    }

    /// Check the calculator's output shape and tag it for persistence.
    fn to_records(
        &self,
        calculator: &dyn MetricCalculator,
        entity: &Entity,
        date: NaiveDate,
        values: Vec<AttributeValue>,
    ) -> Result<Vec<AttributeRecord>, SchedulerError> {
        let definition = calculator.definition();
        let invalid = |reason: &str| SchedulerError::InvalidRows {
            metric: definition.name.clone(),
            entity: entity.id.clone(),
            date,
            reason: reason.to_string(),
        };

        let values = match definition.kind {
            MetricKind::Graph => {
                if values.len() != 1 {
                    return Err(invalid("graph metric must yield exactly one value"));
                }
                if values[0].identifier.is_some() {
                    return Err(invalid("graph metric value carries an identifier"));
                }
                values
            }
            MetricKind::Node if values.is_empty() => vec![AttributeValue::null()],
            MetricKind::Node => {
                {
                    let mut seen = HashSet::new();
                    for value in &values {
                        match &value.identifier {
                            Some(id) if seen.insert(id.as_str()) => {}
                            Some(_) => return Err(invalid("duplicate node identifier")),
                            None => return Err(invalid("node value without identifier")),
                        }
                    }
                }
                values
            }
        };

        Ok(values
            .into_iter()
            .map(|v| AttributeRecord {
                entity_id: entity.id.clone(),
                date,
                metric_name: definition.name.clone(),
                value: v.value.filter(|x| x.is_finite()),
                identifier: v.identifier,
                kind: entity.kind.clone(),
            })
            .collect())
    }
}
