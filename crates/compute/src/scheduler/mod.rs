//! Incremental, watermark-driven attribute scheduler.
//!
//! For every registered [`MetricCalculator`], in dependency order, the
//! scheduler walks each supported entity from its watermark to the cutoff in
//! steps of `shift_days`, computes the trailing window of every eligible
//! date and appends the result. Watermarks live in the [`WatermarkStore`];
//! rerunning after a crash resumes from the last persisted period.

pub mod calculator;
pub mod eligibility;
pub mod error;
pub mod metrics;
pub mod runner;
pub mod types;
pub mod watermark;

pub use calculator::{CalculatorError, MetricCalculator, MetricWindow};
pub use eligibility::{
    BlackoutWindow, CaseFeedIndex, EligibilityPolicy, EligibilityRule, GraphSize, GraphSizeIndex,
};
pub use error::SchedulerError;
pub use metrics::{MetricRunStats, RunMetrics, RunSummary};
pub use runner::AttributeScheduler;
pub use types::{
    AttributeRecord, AttributeValue, MetricDefinition, MetricKind, Priority, SchedulerConfig,
};
pub use watermark::{FileWatermarkStore, MemoryWatermarkStore, WatermarkError, WatermarkStore};
