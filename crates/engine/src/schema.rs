//! Declared table schemas with partition and clustering hints.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    String,
    Timestamp,
    Date,
    Integer,
    Float,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: &str, data_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
        }
    }
}

/// Which row shape a table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    Pings,
    Contacts,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Pings => write!(f, "pings"),
            TableKind::Contacts => write!(f, "contacts"),
        }
    }
}

/// Table declaration handed to [`crate::QueryEngine::create_table`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub kind: TableKind,
    pub columns: Vec<ColumnSpec>,
    /// Column used for daily partitioning.
    pub partition_by_day: Option<String>,
    pub clustering: Vec<String>,
}

impl TableSpec {
    /// Staging / raw ping table, partitioned by day on `timestamp` and
    /// clustered on accuracy so precision filters prune early.
    pub fn pings(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: TableKind::Pings,
            columns: vec![
                ColumnSpec::new("identifier", ColumnType::String),
                ColumnSpec::new("timestamp", ColumnType::Timestamp),
                ColumnSpec::new("lat", ColumnType::Float),
                ColumnSpec::new("lon", ColumnType::Float),
                ColumnSpec::new("region_code", ColumnType::String),
                ColumnSpec::new("accuracy", ColumnType::Float),
            ],
            partition_by_day: Some("timestamp".to_string()),
            clustering: vec!["accuracy".to_string()],
        }
    }

    pub fn contacts(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: TableKind::Contacts,
            columns: vec![
                ColumnSpec::new("id1", ColumnType::String),
                ColumnSpec::new("id2", ColumnType::String),
                ColumnSpec::new("date", ColumnType::Date),
                ColumnSpec::new("hour", ColumnType::Integer),
                ColumnSpec::new("region_code", ColumnType::String),
                ColumnSpec::new("lat", ColumnType::Float),
                ColumnSpec::new("lon", ColumnType::Float),
                ColumnSpec::new("id1_accuracy", ColumnType::Float),
                ColumnSpec::new("id2_accuracy", ColumnType::Float),
                ColumnSpec::new("contacts", ColumnType::Integer),
            ],
            partition_by_day: Some("date".to_string()),
            clustering: vec!["region_code".to_string()],
        }
    }
}
