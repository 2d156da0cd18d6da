//! Persisted attribute rows and the watermarks derived from them.
//!
//! The store is append-only. A watermark is the largest date persisted for an
//! `(entity, metric)` pair, so it only ever moves forward and a crashed run
//! resumes from whatever reached disk.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};

use chrono::NaiveDate;
use grafo_core::EntityId;
use tracing::{info, warn};

use super::types::AttributeRecord;

#[derive(Debug, thiserror::Error)]
pub enum WatermarkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Period already persisted: {entity} / {metric} @ {date}")]
    DuplicatePeriod {
        entity: String,
        metric: String,
        date: NaiveDate,
    },
    #[error("Corrupt attribute log {path} at line {line}")]
    Corrupt { path: PathBuf, line: usize },
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Read and append access to persisted attribute rows.
pub trait WatermarkStore: Send + Sync {
    /// Latest persisted date per entity for `metric`. Entities never computed
    /// are absent.
    fn max_dates(&self, metric: &str) -> Result<HashMap<EntityId, NaiveDate>, WatermarkError>;

    fn is_computed(&self, entity: &str, metric: &str, date: NaiveDate) -> Result<bool, WatermarkError>;

    /// Append rows. Every `(entity, metric, date)` period in the batch must be
    /// new; otherwise nothing is written.
    fn append(&self, rows: &[AttributeRecord]) -> Result<(), WatermarkError>;

    /// Rows persisted for one period.
    fn period_rows(
        &self,
        entity: &str,
        metric: &str,
        date: NaiveDate,
    ) -> Result<Vec<AttributeRecord>, WatermarkError>;

    /// Every row persisted for `metric`.
    fn metric_rows(&self, metric: &str) -> Result<Vec<AttributeRecord>, WatermarkError>;
}

type PeriodKey = (String, String, NaiveDate);

fn period_key(row: &AttributeRecord) -> PeriodKey {
    (row.entity_id.clone(), row.metric_name.clone(), row.date)
}

/// Rows plus the lookups the scheduler needs, shared by both stores.
#[derive(Debug, Default)]
struct AttributeIndex {
    rows: Vec<AttributeRecord>,
    periods: HashMap<PeriodKey, Vec<usize>>,
    watermarks: HashMap<(String, EntityId), NaiveDate>,
}

impl AttributeIndex {
    /// Distinct periods of `rows` in first-seen order, rejecting any that
    /// already exists.
    fn check_new(&self, rows: &[AttributeRecord]) -> Result<Vec<PeriodKey>, WatermarkError> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        for row in rows {
            let key = period_key(row);
            if self.periods.contains_key(&key) {
                return Err(WatermarkError::DuplicatePeriod {
                    entity: key.0,
                    metric: key.1,
                    date: key.2,
                });
            }
            if seen.insert(key.clone()) {
                order.push(key);
            }
        }
        Ok(order)
    }

    fn insert(&mut self, row: AttributeRecord) {
        let idx = self.rows.len();
        self.periods.entry(period_key(&row)).or_default().push(idx);
        let mark = self
            .watermarks
            .entry((row.metric_name.clone(), row.entity_id.clone()))
            .or_insert(row.date);
        if row.date > *mark {
            *mark = row.date;
        }
        self.rows.push(row);
    }

    fn max_dates(&self, metric: &str) -> HashMap<EntityId, NaiveDate> {
        self.watermarks
            .iter()
            .filter(|((m, _), _)| m == metric)
            .map(|((_, entity), date)| (entity.clone(), *date))
            .collect()
    }

    fn period_rows(&self, entity: &str, metric: &str, date: NaiveDate) -> Vec<AttributeRecord> {
        self.periods
            .get(&(entity.to_string(), metric.to_string(), date))
            .map(|idx| idx.iter().map(|&i| self.rows[i].clone()).collect())
            .unwrap_or_default()
    }

    fn metric_rows(&self, metric: &str) -> Vec<AttributeRecord> {
        self.rows.iter().filter(|r| r.metric_name == metric).cloned().collect()
    }
}

// ── In-memory store ──────────────────────────────────────────

/// Process-local store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    index: RwLock<AttributeIndex>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.read().map(|i| i.rows.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> WatermarkError {
    WatermarkError::LockPoisoned("attribute index".to_string())
}

impl WatermarkStore for MemoryWatermarkStore {
    fn max_dates(&self, metric: &str) -> Result<HashMap<EntityId, NaiveDate>, WatermarkError> {
        Ok(self.index.read().map_err(poisoned)?.max_dates(metric))
    }

    fn is_computed(&self, entity: &str, metric: &str, date: NaiveDate) -> Result<bool, WatermarkError> {
        let index = self.index.read().map_err(poisoned)?;
        Ok(index
            .periods
            .contains_key(&(entity.to_string(), metric.to_string(), date)))
    }

    fn append(&self, rows: &[AttributeRecord]) -> Result<(), WatermarkError> {
        let mut index = self.index.write().map_err(poisoned)?;
        index.check_new(rows)?;
        for row in rows {
            index.insert(row.clone());
        }
        Ok(())
    }

    fn period_rows(
        &self,
        entity: &str,
        metric: &str,
        date: NaiveDate,
    ) -> Result<Vec<AttributeRecord>, WatermarkError> {
        Ok(self.index.read().map_err(poisoned)?.period_rows(entity, metric, date))
    }

    fn metric_rows(&self, metric: &str) -> Result<Vec<AttributeRecord>, WatermarkError> {
        Ok(self.index.read().map_err(poisoned)?.metric_rows(metric))
    }
}

// ── File-backed store ────────────────────────────────────────

struct FileInner {
    file: File,
    index: AttributeIndex,
}

/// JSON-lines attribute log. Each line holds every row of one period, so a
/// period is either fully on disk or not at all. Appends are synced before
/// returning.
pub struct FileWatermarkStore {
    path: PathBuf,
    inner: Mutex<FileInner>,
}

impl FileWatermarkStore {
    pub const FILE_NAME: &'static str = "attributes.jsonl";

    /// Open (or create) `attributes.jsonl` under `dir` and replay it.
    pub fn open(dir: &Path) -> Result<Self, WatermarkError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::FILE_NAME);
        let index = if path.exists() {
            replay(&path)?
        } else {
            AttributeIndex::default()
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(
            path = %path.display(),
            rows = index.rows.len(),
            periods = index.periods.len(),
            "Opened attribute store"
        );
        Ok(Self {
            path,
            inner: Mutex::new(FileInner { file, index }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, FileInner>, WatermarkError> {
        self.inner.lock().map_err(poisoned)
    }
}

/// Rebuild the index from disk. A torn final line is cut off, and a complete
/// one missing its newline is terminated, so later appends start on a clean
/// line.
fn replay(path: &Path) -> Result<AttributeIndex, WatermarkError> {
    let content = fs::read_to_string(path)?;
    let mut index = AttributeIndex::default();
    let mut valid_len = 0usize;
    let mut unterminated = false;
    let segments: Vec<&str> = content.split('\n').collect();
    let last = segments.len() - 1;

    for (line_no, segment) in segments.iter().enumerate() {
        if segment.trim().is_empty() {
            valid_len += segment.len() + usize::from(line_no < last);
            continue;
        }
        match serde_json::from_str::<Vec<AttributeRecord>>(segment) {
            Ok(rows) => {
                index.check_new(&rows)?;
                rows.into_iter().for_each(|row| index.insert(row));
                valid_len += segment.len() + usize::from(line_no < last);
                unterminated = line_no == last;
            }
            Err(_) if line_no == last => {
                warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    "Discarding torn trailing line"
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len as u64)?;
                file.sync_all()?;
            }
            Err(_) => {
                return Err(WatermarkError::Corrupt {
                    path: path.to_path_buf(),
                    line: line_no + 1,
                })
            }
        }
    }
    if unterminated {
        warn!(path = %path.display(), line = last + 1, "Terminating final line");
        let mut file = OpenOptions::new().append(true).open(path)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
    }
    Ok(index)
}

impl WatermarkStore for FileWatermarkStore {
    fn max_dates(&self, metric: &str) -> Result<HashMap<EntityId, NaiveDate>, WatermarkError> {
        Ok(self.lock()?.index.max_dates(metric))
    }

    fn is_computed(&self, entity: &str, metric: &str, date: NaiveDate) -> Result<bool, WatermarkError> {
        Ok(self
            .lock()?
            .index
            .periods
            .contains_key(&(entity.to_string(), metric.to_string(), date)))
    }

    fn append(&self, rows: &[AttributeRecord]) -> Result<(), WatermarkError> {
        let mut inner = self.lock()?;
        let periods = inner.index.check_new(rows)?;

        let mut buf = Vec::new();
        for key in &periods {
            let batch: Vec<&AttributeRecord> = rows.iter().filter(|r| period_key(r) == *key).collect();
            serde_json::to_writer(&mut buf, &batch)?;
            buf.push(b'\n');
        }
        inner.file.write_all(&buf)?;
        inner.file.sync_data()?;

        for row in rows {
            inner.index.insert(row.clone());
        }
        Ok(())
    }

    fn period_rows(
        &self,
        entity: &str,
        metric: &str,
        date: NaiveDate,
    ) -> Result<Vec<AttributeRecord>, WatermarkError> {
        Ok(self.lock()?.index.period_rows(entity, metric, date))
    }

    fn metric_rows(&self, metric: &str) -> Result<Vec<AttributeRecord>, WatermarkError> {
        Ok(self.lock()?.index.metric_rows(metric))
    }
}
