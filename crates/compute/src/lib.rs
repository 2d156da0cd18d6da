pub mod algorithms;
pub mod calculators;
pub mod scheduler;
pub mod sources;

pub use algorithms::degree::DegreeInfo;
pub use calculators::{standard_calculators, CalculatorOptions};
pub use scheduler::{
    AttributeRecord, AttributeScheduler, AttributeValue, CalculatorError, EligibilityPolicy,
    EligibilityRule, FileWatermarkStore, MemoryWatermarkStore, MetricCalculator, MetricDefinition,
    MetricKind, MetricWindow, Priority, RunMetrics, RunSummary, SchedulerConfig, SchedulerError,
    WatermarkError, WatermarkStore,
};
