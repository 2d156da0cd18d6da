//! Per-region CSV log of matching chunk attempts.
//!
//! The log is for inspection after a crash. Nothing reads it to decide what
//! is done; coverage alone records completion.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const HEADER: &str = "start_timestamp,end_timestamp,window_size,accuracy,time_s,ellapsed_m,skipped";

#[derive(Debug, thiserror::Error)]
pub enum ProgressLogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed progress row in {path} at line {line}")]
    Malformed { path: PathBuf, line: usize },
}

/// One chunk attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub window_hours: u32,
    pub precision: u32,
    pub elapsed_secs: f64,
    /// Minutes since the region's run started.
    pub cumulative_minutes: f64,
    pub skipped: bool,
}

impl ProgressEntry {
    fn to_row(&self) -> String {
        format!(
            "{},{},{},{},{:.2},{:.1},{}",
            self.window_start.to_rfc3339(),
            self.window_end.to_rfc3339(),
            self.window_hours,
            self.precision,
            self.elapsed_secs,
            self.cumulative_minutes,
            self.skipped
        )
    }

    fn parse_row(row: &str) -> Option<Self> {
        let fields: Vec<&str> = row.split(',').collect();
        let [start, end, window, precision, elapsed, cumulative, skipped] = fields.as_slice() else {
            return None;
        };
        Some(Self {
            window_start: DateTime::parse_from_rfc3339(start).ok()?.with_timezone(&Utc),
            window_end: DateTime::parse_from_rfc3339(end).ok()?.with_timezone(&Utc),
            window_hours: window.parse().ok()?,
            precision: precision.parse().ok()?,
            elapsed_secs: elapsed.parse().ok()?,
            cumulative_minutes: cumulative.parse().ok()?,
            skipped: skipped.parse().ok()?,
        })
    }
}

/// Append-only `progress_{region}.csv`.
#[derive(Debug)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    pub fn file_name(region: &str) -> String {
        format!("progress_{region}.csv")
    }

    /// Open the region's log under `dir`, writing the header on creation.
    pub fn open(dir: &Path, region: &str) -> Result<Self, ProgressLogError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::file_name(region));
        if !path.exists() {
            let mut file = File::create(&path)?;
            writeln!(file, "{HEADER}")?;
            file.sync_data()?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &ProgressEntry) -> Result<(), ProgressLogError> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{}", entry.to_row())?;
        file.sync_data()?;
        Ok(())
    }

    /// Every entry in the file, in write order.
    pub fn read_entries(path: &Path) -> Result<Vec<ProgressEntry>, ProgressLogError> {
        let reader = BufReader::new(File::open(path)?);
        let mut entries = Vec::new();
        for (idx, line) in reader.lines().enumerate().skip(1) {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = ProgressEntry::parse_row(&line).ok_or_else(|| ProgressLogError::Malformed {
                path: path.to_path_buf(),
                line: idx + 1,
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn entry(hour: u32, skipped: bool) -> ProgressEntry {
        ProgressEntry {
            window_start: Utc.with_ymd_and_hms(2021, 3, 1, hour, 0, 0).unwrap(),
            window_end: Utc.with_ymd_and_hms(2021, 3, 1, hour + 1, 0, 0).unwrap(),
            window_hours: 1,
            precision: if skipped { 0 } else { 30 },
            elapsed_secs: 1.25,
            cumulative_minutes: 0.5,
            skipped,
        }
    }

    #[test]
    fn header_written_once_and_rows_appended() {
        let dir = tempfile::tempdir().unwrap();
        let log = ProgressLog::open(dir.path(), "CO.34").unwrap();
        log.append(&entry(1, false)).unwrap();
        drop(log);

        let log = ProgressLog::open(dir.path(), "CO.34").unwrap();
        log.append(&entry(2, true)).unwrap();

        let raw = fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().filter(|l| *l == HEADER).count(), 1);
        assert!(log.path().ends_with("progress_CO.34.csv"));

        let entries = ProgressLog::read_entries(log.path()).unwrap();
        assert_eq!(entries, vec![entry(1, false), entry(2, true)]);
    }

    #[test]
    fn malformed_row_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let log = ProgressLog::open(dir.path(), "CO.11").unwrap();
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        writeln!(file, "not,a,row").unwrap();
        let err = ProgressLog::read_entries(log.path()).unwrap_err();
        assert!(matches!(err, ProgressLogError::Malformed { line: 2, .. }));
    }
}
