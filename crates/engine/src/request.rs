use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Copy one region's pings for `[start, end)` into a staging table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingRequest {
    pub source_table: String,
    pub staging_table: String,
    pub region_code: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Pings with a worse accuracy never reach the staging table.
    pub max_accuracy: f64,
}

/// Match staged pings inside `[start, end)` and append the resulting
/// contact rows to `destination_table`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactWindowRequest {
    pub staging_table: String,
    pub destination_table: String,
    pub region_code: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Only pings with accuracy at or below this threshold take part.
    pub precision: f64,
    /// Pairs whose timestamps differ by more whole minutes are not matched.
    pub max_minutes_apart: i64,
    pub max_distance_m: f64,
}

impl ContactWindowRequest {
    pub const DEFAULT_MAX_MINUTES_APART: i64 = 2;
    pub const DEFAULT_MAX_DISTANCE_M: f64 = 20.0;

    pub fn new(
        staging_table: &str,
        destination_table: &str,
        region_code: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        precision: f64,
    ) -> Self {
        Self {
            staging_table: staging_table.to_string(),
            destination_table: destination_table.to_string(),
            region_code: region_code.to_string(),
            start,
            end,
            precision,
            max_minutes_apart: Self::DEFAULT_MAX_MINUTES_APART,
            max_distance_m: Self::DEFAULT_MAX_DISTANCE_M,
        }
    }
}

/// Execution metadata for a completed engine call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryStats {
    pub rows_read: u64,
    pub rows_written: u64,
    /// Candidate pairs the matching kernel had to compare.
    pub comparisons: u64,
    pub elapsed: Duration,
}
