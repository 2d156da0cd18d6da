//! Read-side queries used to assemble per-entity graphs.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use grafo_core::{CompactEdge, CompactNode};

use super::LocalEngine;
use crate::error::EngineError;

fn in_scope(region: &str, date: NaiveDate, regions: &[String], start: NaiveDate, end: NaiveDate) -> bool {
    date >= start && date <= end && regions.iter().any(|r| r == region)
}

impl LocalEngine {
    /// Contact graph edges for the given regions and inclusive date range,
    /// weighted by the number of matched ping pairs.
    pub fn compact_edges(
        &self,
        table: &str,
        regions: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CompactEdge>, EngineError> {
        let tables = self.read()?;
        let rows = tables
            .get(table)
            .ok_or_else(|| EngineError::TableNotFound(table.to_string()))?
            .contacts()?;

        let mut weights: BTreeMap<(&str, &str), u64> = BTreeMap::new();
        for row in rows.iter().filter(|r| in_scope(&r.region_code, r.date, regions, start, end)) {
            *weights.entry((row.id1.as_str(), row.id2.as_str())).or_default() += row.contacts;
        }
        Ok(weights
            .into_iter()
            .map(|((id1, id2), w)| CompactEdge {
                id1: id1.to_string(),
                id2: id2.to_string(),
                weight: w as f64,
            })
            .collect())
    }

    /// Devices seen in the given regions and date range, weighted by their
    /// number of pings.
    pub fn compact_nodes(
        &self,
        table: &str,
        regions: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CompactNode>, EngineError> {
        let tables = self.read()?;
        let rows = tables
            .get(table)
            .ok_or_else(|| EngineError::TableNotFound(table.to_string()))?
            .pings()?;

        let mut activity: BTreeMap<&str, u64> = BTreeMap::new();
        for ping in rows
            .iter()
            .filter(|p| in_scope(&p.region_code, p.timestamp.date_naive(), regions, start, end))
        {
            *activity.entry(ping.identifier.as_str()).or_default() += 1;
        }
        Ok(activity
            .into_iter()
            .map(|(identifier, n)| CompactNode {
                identifier: identifier.to_string(),
                weight: n as f64,
            })
            .collect())
    }

    /// Total matched ping pairs for the given regions and date range.
    pub fn contact_count(
        &self,
        table: &str,
        regions: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<u64, EngineError> {
        let tables = self.read()?;
        let rows = tables
            .get(table)
            .ok_or_else(|| EngineError::TableNotFound(table.to_string()))?
            .contacts()?;
        Ok(rows
            .iter()
            .filter(|r| in_scope(&r.region_code, r.date, regions, start, end))
            .map(|r| r.contacts)
            .sum())
    }
}
