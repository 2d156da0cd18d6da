//! Raw pings to contact rows, one region and one time chunk at a time.
//!
//! - `controller`: pure window/precision transitions
//! - `executor`: the chunk loop against a [`grafo_engine::QueryEngine`]
//! - `coverage`: per-region matched range with its monotonicity check
//! - `progress`: per-region CSV of chunk attempts
//! - `sink`: durable export of matched rows ahead of coverage

pub mod clock;
pub mod controller;
pub mod coverage;
pub mod executor;
pub mod progress;
pub mod sink;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{ControllerConfig, ControllerState, FaultResponse};
pub use coverage::{
    CoverageError, CoverageRange, CoverageRecord, CoverageStore, CoverageViolation, FileCoverageStore,
    MemoryCoverageStore,
};
pub use executor::{ExecutorSettings, MatchingError, MatchingExecutor, RegionReport};
pub use progress::{ProgressEntry, ProgressLog, ProgressLogError};
pub use sink::{ContactSink, JsonlContactSink, SinkError};
