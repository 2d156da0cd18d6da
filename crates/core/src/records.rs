//! Row types exchanged between the query engine, the matching executor and
//! the metric calculators.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One raw location fix reported by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub identifier: String,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub region_code: String,
    /// Horizontal accuracy in metres; lower is better.
    pub accuracy: f64,
}

/// Proximity between two devices aggregated over one hour of one region.
/// `date` and `hour` come from the `id1` side of the matched pings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub id1: String,
    pub id2: String,
    pub date: NaiveDate,
    pub hour: u32,
    pub region_code: String,
    pub lat: f64,
    pub lon: f64,
    pub id1_accuracy: f64,
    pub id2_accuracy: f64,
    /// Matched ping pairs folded into this row.
    pub contacts: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactNode {
    pub identifier: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactEdge {
    pub id1: String,
    pub id2: String,
    pub weight: f64,
}
