//! Data the calculators read: contact graphs, case reports and case
//! distances.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use grafo_core::{CompactEdge, CompactNode, Entity, EntityId, GrafoError};
use grafo_engine::{EngineError, LocalEngine};
use grafo_graph::{Direction, WindowGraph};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::scheduler::eligibility::CaseFeedIndex;

/// Contact data of one entity over an inclusive date window.
pub trait ContactSource: Send + Sync {
    fn compact_nodes(
        &self,
        entity: &Entity,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CompactNode>, EngineError>;

    fn compact_edges(
        &self,
        entity: &Entity,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CompactEdge>, EngineError>;

    fn contact_count(&self, entity: &Entity, start: NaiveDate, end: NaiveDate) -> Result<u64, EngineError>;

    /// Undirected weighted graph of the window.
    fn window_graph(&self, entity: &Entity, start: NaiveDate, end: NaiveDate) -> Result<WindowGraph, EngineError> {
        let nodes = self.compact_nodes(entity, start, end)?;
        let edges = self.compact_edges(entity, start, end)?;
        Ok(WindowGraph::from_compact(&nodes, &edges, Direction::Undirected))
    }
}

/// Contact source backed by the local engine's contact and ping tables.
pub struct EngineContactSource {
    engine: Arc<LocalEngine>,
    contacts_table: String,
    pings_table: String,
}

/// A table that was never written holds no data yet.
fn or_empty<T: Default>(result: Result<T, EngineError>, table: &str) -> Result<T, EngineError> {
    match result {
        Err(EngineError::TableNotFound(_)) => {
            debug!(table = %table, "Table not created yet, treating as empty");
            Ok(T::default())
        }
        other => other,
    }
}

impl EngineContactSource {
    pub fn new(engine: Arc<LocalEngine>, contacts_table: impl Into<String>, pings_table: impl Into<String>) -> Self {
        Self {
            engine,
            contacts_table: contacts_table.into(),
            pings_table: pings_table.into(),
        }
    }
}

impl ContactSource for EngineContactSource {
    /// Devices active in the window plus every contact endpoint.
    fn compact_nodes(
        &self,
        entity: &Entity,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CompactNode>, EngineError> {
        let Some((start, end)) = entity.construction_mode.clip(start, end) else {
            return Ok(Vec::new());
        };
        let mut nodes = or_empty(
            self.engine
                .compact_nodes(&self.pings_table, &entity.region_codes, start, end),
            &self.pings_table,
        )?;
        let mut known: HashSet<String> = nodes.iter().map(|n| n.identifier.clone()).collect();
        for edge in self.compact_edges(entity, start, end)? {
            for id in [edge.id1, edge.id2] {
                if known.insert(id.clone()) {
                    nodes.push(CompactNode {
                        identifier: id,
                        weight: 0.0,
                    });
                }
            }
        }
        Ok(nodes)
    }

    fn compact_edges(
        &self,
        entity: &Entity,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CompactEdge>, EngineError> {
        let Some((start, end)) = entity.construction_mode.clip(start, end) else {
            return Ok(Vec::new());
        };
        or_empty(
            self.engine
                .compact_edges(&self.contacts_table, &entity.region_codes, start, end),
            &self.contacts_table,
        )
    }

    fn contact_count(&self, entity: &Entity, start: NaiveDate, end: NaiveDate) -> Result<u64, EngineError> {
        let Some((start, end)) = entity.construction_mode.clip(start, end) else {
            return Ok(0);
        };
        or_empty(
            self.engine
                .contact_count(&self.contacts_table, &entity.region_codes, start, end),
            &self.contacts_table,
        )
    }
}

// ── Case reports ─────────────────────────────────────────────

/// Reported cases per city.
pub trait CaseSource: Send + Sync {
    /// Cases reported up to and including `date`. `None` when the city has
    /// no reports at all.
    fn accumulated_cases(&self, city: &str, date: NaiveDate) -> Option<u64>;

    /// First and last report date per city.
    fn feed_index(&self) -> CaseFeedIndex;
}

/// Distance from devices to the nearest reported case.
pub trait ExposureSource: Send + Sync {
    /// Smallest known distance in metres per device over `[start, end]`.
    fn distances(&self, entity: &Entity, start: NaiveDate, end: NaiveDate) -> HashMap<String, f64>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseReport {
    pub city: String,
    pub date: NaiveDate,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseDistance {
    pub entity_id: EntityId,
    pub date: NaiveDate,
    pub identifier: String,
    pub distance_m: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CaseFile {
    #[serde(default)]
    cases: Vec<CaseReport>,
    #[serde(default)]
    distances: Vec<CaseDistance>,
}

/// In-memory case feed.
#[derive(Debug, Clone, Default)]
pub struct CaseTable {
    reports: BTreeMap<String, BTreeMap<NaiveDate, u64>>,
    distances: HashMap<EntityId, BTreeMap<NaiveDate, HashMap<String, f64>>>,
}

impl CaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{"cases": [...], "distances": [...]}` from a JSON file.
    pub fn load(path: &Path) -> Result<Self, GrafoError> {
        let raw = fs::read_to_string(path)?;
        let file: CaseFile = serde_json::from_str(&raw)?;
        let mut table = Self::new();
        for report in file.cases {
            table.add_cases(&report.city, report.date, report.count);
        }
        for d in file.distances {
            table.add_distance(&d.entity_id, d.date, &d.identifier, d.distance_m);
        }
        info!(
            path = %path.display(),
            cities = table.reports.len(),
            entities = table.distances.len(),
            "Loaded case feed"
        );
        Ok(table)
    }

    pub fn add_cases(&mut self, city: &str, date: NaiveDate, count: u64) {
        *self
            .reports
            .entry(city.to_string())
            .or_default()
            .entry(date)
            .or_default() += count;
    }

    /// Record a device's distance to a case on `date`; the smaller distance
    /// wins when recorded twice.
    pub fn add_distance(&mut self, entity: &str, date: NaiveDate, identifier: &str, distance_m: f64) {
        let slot = self
            .distances
            .entry(entity.to_string())
            .or_default()
            .entry(date)
            .or_default()
            .entry(identifier.to_string())
            .or_insert(distance_m);
        *slot = slot.min(distance_m);
    }
}

impl CaseSource for CaseTable {
    fn accumulated_cases(&self, city: &str, date: NaiveDate) -> Option<u64> {
        self.reports
            .get(city)
            .map(|by_date| by_date.range(..=date).map(|(_, n)| n).sum())
    }

    fn feed_index(&self) -> CaseFeedIndex {
        CaseFeedIndex::from_ranges(self.reports.iter().filter_map(|(city, by_date)| {
            let first = by_date.keys().next()?;
            let last = by_date.keys().next_back()?;
            Some((city.clone(), *first, *last))
        }))
    }
}

impl ExposureSource for CaseTable {
    fn distances(&self, entity: &Entity, start: NaiveDate, end: NaiveDate) -> HashMap<String, f64> {
        let mut nearest: HashMap<String, f64> = HashMap::new();
        if let Some(by_date) = self.distances.get(&entity.id) {
            for (_, per_device) in by_date.range(start..=end) {
                for (id, &d) in per_device {
                    let slot = nearest.entry(id.clone()).or_insert(d);
                    *slot = slot.min(d);
                }
            }
        }
        nearest
    }
}

#[cfg(test)]
mod tests {
    use grafo_core::ContactRecord;

    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 3, day).unwrap()
    }

    fn contact(id1: &str, id2: &str, day: u32) -> ContactRecord {
        ContactRecord {
            id1: id1.into(),
            id2: id2.into(),
            date: d(day),
            hour: 8,
            region_code: "CO.34".into(),
            lat: 4.6,
            lon: -74.1,
            id1_accuracy: 5.0,
            id2_accuracy: 5.0,
            contacts: 1,
        }
    }

    fn source() -> EngineContactSource {
        let engine = Arc::new(LocalEngine::new());
        engine
            .insert_contacts("contacts", [contact("a", "b", 2), contact("b", "c", 6)])
            .unwrap();
        EngineContactSource::new(engine, "contacts", "raw_pings")
    }

    #[test]
    fn nodes_include_edge_endpoints_without_pings() {
        let entity = Entity::rolling("bogota", "co").with_regions(["CO.34"]);
        let graph = source().window_graph(&entity, d(1), d(7)).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn fixed_entities_only_see_their_interval() {
        let entity = Entity::fixed("campus", "co", d(1), d(4)).with_regions(["CO.34"]);
        let src = source();
        assert_eq!(src.contact_count(&entity, d(1), d(7)).unwrap(), 1);
        assert!(src.compact_edges(&entity, d(5), d(7)).unwrap().is_empty());
    }

    #[test]
    fn accumulated_cases_and_feed_range() {
        let mut table = CaseTable::new();
        table.add_cases("bogota", d(1), 3);
        table.add_cases("bogota", d(5), 4);
        assert_eq!(table.accumulated_cases("bogota", d(4)), Some(3));
        assert_eq!(table.accumulated_cases("bogota", d(9)), Some(7));
        assert_eq!(table.accumulated_cases("cali", d(9)), None);
        assert_eq!(table.feed_index().range("bogota"), Some((d(1), d(5))));
    }

    #[test]
    fn distances_take_the_window_minimum() {
        let mut table = CaseTable::new();
        table.add_distance("bogota", d(1), "a", 900.0);
        table.add_distance("bogota", d(3), "a", 300.0);
        table.add_distance("bogota", d(9), "a", 10.0);
        let entity = Entity::rolling("bogota", "co");
        assert_eq!(table.distances(&entity, d(1), d(7))["a"], 300.0);
    }

    #[test]
    fn case_file_round_trips_through_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cases.json");
        fs::write(
            &path,
            r#"{"cases":[{"city":"bogota","date":"2021-03-01","count":2}],
                "distances":[{"entity_id":"bogota","date":"2021-03-01","identifier":"a","distance_m":50.0}]}"#,
        )
        .unwrap();
        let table = CaseTable::load(&path).unwrap();
        assert_eq!(table.accumulated_cases("bogota", d(1)), Some(2));
        assert_eq!(table.distances(&Entity::rolling("bogota", "co"), d(1), d(1))["a"], 50.0);
    }
}
