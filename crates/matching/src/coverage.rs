//! Per-region record of the hours already matched into contacts.
//!
//! Every write is checked against the stored range: the start never moves
//! and the end never goes back. A rejected write leaves the tracker as it was
//! and the attempted range is kept in a side file for manual reconciliation.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Inclusive matched range of one region, at hour resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRange {
    pub min_date: DateTime<Utc>,
    pub max_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRecord {
    pub region_code: String,
    pub min_date: DateTime<Utc>,
    pub max_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageViolation {
    MaxBeforeMin,
    MinMoved { old: DateTime<Utc> },
    MaxDecreased { old: DateTime<Utc> },
}

impl fmt::Display for CoverageViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoverageViolation::MaxBeforeMin => write!(f, "max date precedes min date"),
            CoverageViolation::MinMoved { old } => write!(f, "min date must stay at {old}"),
            CoverageViolation::MaxDecreased { old } => write!(f, "max date may not drop below {old}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoverageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Coverage update for {region} rejected: {violation}")]
    Violation {
        region: String,
        violation: CoverageViolation,
    },

    #[error("Coverage lock poisoned")]
    LockPoisoned,
}

/// Check a new range against the stored one.
pub fn check_update(old: Option<&CoverageRange>, new: &CoverageRange) -> Result<(), CoverageViolation> {
    if new.max_date < new.min_date {
        return Err(CoverageViolation::MaxBeforeMin);
    }
    if let Some(old) = old {
        if new.min_date != old.min_date {
            return Err(CoverageViolation::MinMoved { old: old.min_date });
        }
        if new.max_date < old.max_date {
            return Err(CoverageViolation::MaxDecreased { old: old.max_date });
        }
    }
    Ok(())
}

pub trait CoverageStore: Send + Sync {
    fn get(&self, region: &str) -> Result<Option<CoverageRange>, CoverageError>;

    fn all(&self) -> Result<BTreeMap<String, CoverageRange>, CoverageError>;

    /// Store `range` for `region` if it passes [`check_update`].
    fn update(&self, region: &str, range: CoverageRange) -> Result<(), CoverageError>;
}

// ── In-memory ─────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryCoverageStore {
    ranges: RwLock<BTreeMap<String, CoverageRange>>,
    rejected: Mutex<Vec<CoverageRecord>>,
}

impl MemoryCoverageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes that failed the invariant check.
    pub fn rejected(&self) -> Vec<CoverageRecord> {
        self.rejected.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl CoverageStore for MemoryCoverageStore {
    fn get(&self, region: &str) -> Result<Option<CoverageRange>, CoverageError> {
        let ranges = self.ranges.read().map_err(|_| CoverageError::LockPoisoned)?;
        Ok(ranges.get(region).copied())
    }

    fn all(&self) -> Result<BTreeMap<String, CoverageRange>, CoverageError> {
        let ranges = self.ranges.read().map_err(|_| CoverageError::LockPoisoned)?;
        Ok(ranges.clone())
    }

    fn update(&self, region: &str, range: CoverageRange) -> Result<(), CoverageError> {
        let mut ranges = self.ranges.write().map_err(|_| CoverageError::LockPoisoned)?;
        if let Err(violation) = check_update(ranges.get(region), &range) {
            self.rejected
                .lock()
                .map_err(|_| CoverageError::LockPoisoned)?
                .push(record(region, &range));
            return Err(CoverageError::Violation {
                region: region.to_string(),
                violation,
            });
        }
        ranges.insert(region.to_string(), range);
        Ok(())
    }
}

fn record(region: &str, range: &CoverageRange) -> CoverageRecord {
    CoverageRecord {
        region_code: region.to_string(),
        min_date: range.min_date,
        max_date: range.max_date,
    }
}

// ── File-backed ───────────────────────────────────────────────

/// Coverage kept as one JSON document:
/// ```text
/// {data_dir}/
///   contacts_coverage.json                          <- [{region_code, min_date, max_date}]
/// {inconsistent_dir}/
///   inconsistent_contacts_coverage_2021-03-01.jsonl <- rejected writes of that day
/// ```
pub struct FileCoverageStore {
    path: PathBuf,
    side_dir: PathBuf,
    ranges: RwLock<BTreeMap<String, CoverageRange>>,
}

impl FileCoverageStore {
    pub const FILE_NAME: &'static str = "contacts_coverage.json";

    pub fn open(dir: &Path, side_dir: &Path) -> Result<Self, CoverageError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::FILE_NAME);
        let ranges = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let records: Vec<CoverageRecord> = serde_json::from_str(&raw)?;
            records
                .into_iter()
                .map(|r| {
                    (
                        r.region_code,
                        CoverageRange {
                            min_date: r.min_date,
                            max_date: r.max_date,
                        },
                    )
                })
                .collect()
        } else {
            BTreeMap::new()
        };
        info!(path = %path.display(), regions = ranges.len(), "Opened coverage store");
        Ok(Self {
            path,
            side_dir: side_dir.to_path_buf(),
            ranges: RwLock::new(ranges),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn side_file(&self) -> PathBuf {
        self.side_dir.join(format!(
            "inconsistent_contacts_coverage_{}.jsonl",
            Utc::now().date_naive()
        ))
    }

    fn tmp_path(path: &Path) -> PathBuf {
        path.with_extension("json.tmp")
    }

    fn persist(&self, ranges: &BTreeMap<String, CoverageRange>) -> Result<(), CoverageError> {
        let records: Vec<CoverageRecord> = ranges.iter().map(|(region, range)| record(region, range)).collect();
        let json = serde_json::to_string_pretty(&records)?;
        // Written aside, synced, then renamed over the old document.
        let tmp = Self::tmp_path(&self.path);
        let mut file = File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn write_side_file(&self, record: &CoverageRecord) -> Result<PathBuf, CoverageError> {
        fs::create_dir_all(&self.side_dir)?;
        let path = self.side_file();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        file.sync_data()?;
        Ok(path)
    }
}

impl CoverageStore for FileCoverageStore {
    fn get(&self, region: &str) -> Result<Option<CoverageRange>, CoverageError> {
        let ranges = self.ranges.read().map_err(|_| CoverageError::LockPoisoned)?;
        Ok(ranges.get(region).copied())
    }

    fn all(&self) -> Result<BTreeMap<String, CoverageRange>, CoverageError> {
        let ranges = self.ranges.read().map_err(|_| CoverageError::LockPoisoned)?;
        Ok(ranges.clone())
    }

    fn update(&self, region: &str, range: CoverageRange) -> Result<(), CoverageError> {
        let mut ranges = self.ranges.write().map_err(|_| CoverageError::LockPoisoned)?;
        if let Err(violation) = check_update(ranges.get(region), &range) {
            let side = self.write_side_file(&record(region, &range))?;
            error!(
                region = %region,
                violation = %violation,
                side_file = %side.display(),
                "Rejected coverage update"
            );
            return Err(CoverageError::Violation {
                region: region.to_string(),
                violation,
            });
        }

        let mut next = ranges.clone();
        next.insert(region.to_string(), range);
        self.persist(&next)?;
        *ranges = next;
        info!(
            region = %region,
            min = %range.min_date,
            max = %range.max_date,
            "Coverage updated"
        );
        Ok(())
    }
}
