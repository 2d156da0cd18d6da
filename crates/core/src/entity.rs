use std::fmt;
use std::fs;
use std::path::Path;

use chrono::{Duration, NaiveDate};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{GrafoError, Result};

pub type EntityId = String;

/// How the graph of an entity is assembled over time.
///
/// `Fixed` intervals are half-open: `end_date` itself is never part of the
/// entity's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConstructionMode {
    #[default]
    Rolling,
    Fixed {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
}

impl ConstructionMode {
    pub fn is_fixed(&self) -> bool {
        matches!(self, ConstructionMode::Fixed { .. })
    }

    /// Last as-of date whose trailing window of `window_days` still overlaps
    /// the fixed interval. `None` for rolling entities.
    pub fn last_relevant_date(&self, window_days: u32) -> Option<NaiveDate> {
        match self {
            ConstructionMode::Rolling => None,
            ConstructionMode::Fixed { end_date, .. } => {
                Some(*end_date - Duration::days(1) + Duration::days(window_days as i64 - 1))
            }
        }
    }

    /// Intersect the inclusive range `[start, end]` with the entity's data
    /// interval. Returns `None` when nothing is left.
    pub fn clip(&self, start: NaiveDate, end: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        let (lo, hi) = match self {
            ConstructionMode::Rolling => (start, end),
            ConstructionMode::Fixed {
                start_date,
                end_date,
            } => (start.max(*start_date), end.min(*end_date - Duration::days(1))),
        };
        (lo <= hi).then_some((lo, hi))
    }
}

impl fmt::Display for ConstructionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstructionMode::Rolling => write!(f, "rolling"),
            ConstructionMode::Fixed {
                start_date,
                end_date,
            } => write!(f, "fixed[{start_date}, {end_date})"),
        }
    }
}

fn default_kind() -> String {
    "location".to_string()
}

/// A tracked location whose contact graph gets measured over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// Logical grouping of the entity's contact table.
    pub dataset: String,
    #[serde(default)]
    pub construction_mode: ConstructionMode,
    /// Label copied into every persisted attribute row.
    #[serde(default = "default_kind")]
    pub kind: String,
    /// City whose case-report feed applies to this entity, if any.
    #[serde(default)]
    pub city: Option<String>,
    /// Regions whose contacts make up this entity's edges.
    #[serde(default)]
    pub region_codes: Vec<String>,
}

impl Entity {
    pub fn rolling(id: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dataset: dataset.into(),
            construction_mode: ConstructionMode::Rolling,
            kind: default_kind(),
            city: None,
            region_codes: Vec::new(),
        }
    }

    pub fn fixed(
        id: impl Into<String>,
        dataset: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            construction_mode: ConstructionMode::Fixed {
                start_date,
                end_date,
            },
            ..Self::rolling(id, dataset)
        }
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_regions<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.region_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let ConstructionMode::Fixed {
            start_date,
            end_date,
        } = self.construction_mode
        {
            if end_date <= start_date {
                return Err(GrafoError::InvalidInterval {
                    entity: self.id.clone(),
                    start: start_date,
                    end: end_date,
                });
            }
        }
        Ok(())
    }
}

/// Read-only set of tracked entities, iterated in load order.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: IndexMap<EntityId, Entity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Result<Self> {
        let mut registry = Self::new();
        for entity in entities {
            registry.insert(entity)?;
        }
        Ok(registry)
    }

    /// Load a JSON array of entities.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let entities: Vec<Entity> = serde_json::from_str(&raw)?;
        let registry = Self::from_entities(entities)?;
        tracing::info!(
            path = %path.display(),
            entities = registry.len(),
            "Loaded entity registry"
        );
        Ok(registry)
    }

    pub fn insert(&mut self, entity: Entity) -> Result<()> {
        entity.validate()?;
        if self.entities.contains_key(&entity.id) {
            return Err(GrafoError::DuplicateEntity(entity.id));
        }
        self.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Distinct region codes across all entities, first occurrence wins.
    pub fn region_codes(&self) -> Vec<String> {
        let mut seen = indexmap::IndexSet::new();
        for entity in self.entities.values() {
            for code in &entity.region_codes {
                seen.insert(code.clone());
            }
        }
        seen.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn fixed_interval_must_be_non_empty() {
        let bad = Entity::fixed("campus", "ds", d(2021, 3, 1), d(2021, 3, 1));
        let err = EntityRegistry::from_entities([bad]).unwrap_err();
        assert!(matches!(err, GrafoError::InvalidInterval { .. }));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = EntityRegistry::from_entities([
            Entity::rolling("bogota", "ds"),
            Entity::rolling("bogota", "other"),
        ])
        .unwrap_err();
        assert!(matches!(err, GrafoError::DuplicateEntity(id) if id == "bogota"));
    }

    #[test]
    fn clip_respects_half_open_end() {
        let mode = ConstructionMode::Fixed {
            start_date: d(2021, 3, 1),
            end_date: d(2021, 3, 10),
        };
        assert_eq!(
            mode.clip(d(2021, 3, 5), d(2021, 3, 12)),
            Some((d(2021, 3, 5), d(2021, 3, 9)))
        );
        assert_eq!(mode.clip(d(2021, 3, 10), d(2021, 3, 12)), None);
        assert_eq!(
            ConstructionMode::Rolling.clip(d(2021, 3, 5), d(2021, 3, 12)),
            Some((d(2021, 3, 5), d(2021, 3, 12)))
        );
    }

    #[test]
    fn last_relevant_date_covers_trailing_window() {
        let mode = ConstructionMode::Fixed {
            start_date: d(2021, 3, 1),
            end_date: d(2021, 3, 10),
        };
        // window [03-09, 03-15] still contains the last data day 03-09
        assert_eq!(mode.last_relevant_date(7), Some(d(2021, 3, 15)));
        assert_eq!(ConstructionMode::Rolling.last_relevant_date(7), None);
    }

    #[test]
    fn registry_keeps_load_order_and_dedups_regions() {
        let registry = EntityRegistry::from_entities([
            Entity::rolling("b", "ds").with_regions(["CO.34", "CO.33"]),
            Entity::rolling("a", "ds").with_regions(["CO.33", "CO.76"]),
        ])
        .unwrap();
        let ids: Vec<_> = registry.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(registry.region_codes(), ["CO.34", "CO.33", "CO.76"]);
    }

    #[test]
    fn load_reads_json_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entities.json");
        fs::write(
            &path,
            r#"[
                {"id": "bogota", "dataset": "co", "city": "bogota", "region_codes": ["CO.34"]},
                {"id": "campus", "dataset": "co", "kind": "campus",
                 "construction_mode": {"mode": "fixed", "start_date": "2021-03-01", "end_date": "2021-04-01"}}
            ]"#,
        )
        .unwrap();

        let registry = EntityRegistry::load(&path).unwrap();
        assert_eq!(registry.len(), 2);
        let bogota = registry.get("bogota").unwrap();
        assert_eq!(bogota.kind, "location");
        assert_eq!(bogota.construction_mode, ConstructionMode::Rolling);
        assert!(registry.get("campus").unwrap().construction_mode.is_fixed());
    }
}
