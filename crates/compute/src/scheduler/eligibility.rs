//! Which entities and dates a metric may be computed for.
//!
//! A policy is a starting date plus a list of rules. Rules that need lookups
//! hold prebuilt, immutable indexes so evaluation stays pure and cheap.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use grafo_core::{Entity, EntityId};

use super::types::MetricDefinition;
use super::watermark::{WatermarkError, WatermarkStore};

pub const GRAPH_SIZE_METRIC: &str = "graph_size";
pub const GRAPH_EDGES_METRIC: &str = "graph_num_edges";

/// Per-city `[first, last]` report dates of the case feed.
#[derive(Debug, Clone, Default)]
pub struct CaseFeedIndex {
    ranges: HashMap<String, (NaiveDate, NaiveDate)>,
}

impl CaseFeedIndex {
    pub fn from_ranges(ranges: impl IntoIterator<Item = (String, NaiveDate, NaiveDate)>) -> Self {
        Self {
            ranges: ranges
                .into_iter()
                .map(|(city, min, max)| (city, (min, max)))
                .collect(),
        }
    }

    pub fn range(&self, city: &str) -> Option<(NaiveDate, NaiveDate)> {
        self.ranges.get(city).copied()
    }

    pub fn covers(&self, entity: &Entity) -> bool {
        entity.city.as_deref().is_some_and(|c| self.ranges.contains_key(c))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphSize {
    pub nodes: usize,
    pub edges: usize,
}

/// Graph sizes per `(entity, date)`.
#[derive(Debug, Clone, Default)]
pub struct GraphSizeIndex {
    sizes: HashMap<(EntityId, NaiveDate), GraphSize>,
}

impl GraphSizeIndex {
    pub fn from_rows(rows: impl IntoIterator<Item = (EntityId, NaiveDate, usize, usize)>) -> Self {
        Self {
            sizes: rows
                .into_iter()
                .map(|(entity, date, nodes, edges)| ((entity, date), GraphSize { nodes, edges }))
                .collect(),
        }
    }

    /// Build from persisted `graph_size` and `graph_num_edges` rows. Periods
    /// missing either value, or holding a null, are left out.
    pub fn from_store(store: &dyn WatermarkStore) -> Result<Self, WatermarkError> {
        let edges: HashMap<(EntityId, NaiveDate), f64> = store
            .metric_rows(GRAPH_EDGES_METRIC)?
            .into_iter()
            .filter_map(|r| r.value.map(|v| ((r.entity_id, r.date), v)))
            .collect();
        let sizes = store
            .metric_rows(GRAPH_SIZE_METRIC)?
            .into_iter()
            .filter_map(|r| {
                let nodes = r.value?;
                let key = (r.entity_id, r.date);
                let edges = *edges.get(&key)?;
                Some((
                    key,
                    GraphSize {
                        nodes: nodes as usize,
                        edges: edges as usize,
                    },
                ))
            })
            .collect();
        Ok(Self { sizes })
    }

    pub fn get(&self, entity: &str, date: NaiveDate) -> Option<GraphSize> {
        self.sizes.get(&(entity.to_string(), date)).copied()
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }
}

/// Inclusive date range during which a metric is not computed. Applies to
/// every entity unless `entities` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct BlackoutWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub entities: Option<HashSet<EntityId>>,
}

impl BlackoutWindow {
    pub fn global(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            entities: None,
        }
    }

    pub fn for_entities<I, S>(start: NaiveDate, end: NaiveDate, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            start,
            end,
            entities: Some(entities.into_iter().map(Into::into).collect()),
        }
    }

    pub fn blocks(&self, entity: &Entity, date: NaiveDate) -> bool {
        let applies = self.entities.as_ref().map_or(true, |set| set.contains(&entity.id));
        applies && date >= self.start && date <= self.end
    }
}

#[derive(Debug, Clone)]
pub enum EligibilityRule {
    /// Never compute for these entities.
    ExcludeEntities(HashSet<EntityId>),
    /// Entity must have regions, all of them in the set.
    RegionsWithin(HashSet<String>),
    /// Entity's city must appear in the case feed.
    RequireCaseFeed(Arc<CaseFeedIndex>),
    Blackout(BlackoutWindow),
    /// Period must be in the index and within the metric's ceilings.
    SizeCeiling(Arc<GraphSizeIndex>),
    /// Date must lie at least `min_days` inside the city's feed range.
    Freshness {
        feed: Arc<CaseFeedIndex>,
        min_days: u32,
    },
}

impl EligibilityRule {
    fn allows_entity(&self, entity: &Entity) -> bool {
        match self {
            EligibilityRule::ExcludeEntities(ids) => !ids.contains(&entity.id),
            EligibilityRule::RegionsWithin(allowed) => {
                !entity.region_codes.is_empty()
                    && entity.region_codes.iter().all(|code| allowed.contains(code))
            }
            EligibilityRule::RequireCaseFeed(feed) => feed.covers(entity),
            _ => true,
        }
    }

    fn allows_date(&self, entity: &Entity, date: NaiveDate, ceilings: (Option<usize>, Option<usize>)) -> bool {
        match self {
            EligibilityRule::Blackout(window) => !window.blocks(entity, date),
            EligibilityRule::SizeCeiling(index) => match index.get(&entity.id, date) {
                Some(size) => {
                    ceilings.0.map_or(true, |max| size.nodes <= max)
                        && ceilings.1.map_or(true, |max| size.edges <= max)
                }
                None => false,
            },
            EligibilityRule::Freshness { feed, min_days } => {
                let margin = Duration::days(*min_days as i64);
                entity
                    .city
                    .as_deref()
                    .and_then(|city| feed.range(city))
                    .is_some_and(|(min, max)| date >= min + margin && date <= max - margin)
            }
            _ => true,
        }
    }
}

/// Entity-level and date-level predicates for one metric.
#[derive(Debug, Clone)]
pub struct EligibilityPolicy {
    pub starting_date: NaiveDate,
    pub max_nodes: Option<usize>,
    pub max_edges: Option<usize>,
    pub rules: Vec<EligibilityRule>,
}

impl EligibilityPolicy {
    /// Default policy: every entity, every date from the starting date on.
    pub fn for_definition(definition: &MetricDefinition) -> Self {
        Self {
            starting_date: definition.starting_date,
            max_nodes: definition.max_nodes,
            max_edges: definition.max_edges,
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: EligibilityRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = EligibilityRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn entity_supported(&self, entity: &Entity) -> bool {
        self.rules.iter().all(|rule| rule.allows_entity(entity))
    }

    pub fn entity_supported_on_date(&self, entity: &Entity, date: NaiveDate) -> bool {
        date >= self.starting_date
            && self
                .rules
                .iter()
                .all(|rule| rule.allows_date(entity, date, (self.max_nodes, self.max_edges)))
    }
}
