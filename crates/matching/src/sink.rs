//! Durable hand-off of matched contact rows.
//!
//! The executor commits a region's rows through the sink before it extends
//! that region's coverage, so covered hours always have their contacts on
//! disk. A crash between the two leaves the region uncovered and it is
//! matched again on the next run.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use grafo_engine::{EngineError, LocalEngine};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Sink lock poisoned")]
    LockPoisoned,
}

pub trait ContactSink: Send + Sync {
    /// Persist every row matched for `region` since the last commit.
    /// Returns the number of rows written.
    fn commit(&self, region: &str) -> Result<usize, SinkError>;
}

/// Appends new rows of a [`LocalEngine`] contact table to a JSON lines file.
///
/// Rows already in the table when the sink is opened count as exported.
pub struct JsonlContactSink {
    engine: Arc<LocalEngine>,
    table: String,
    path: PathBuf,
    exported: Mutex<usize>,
}

fn table_rows(engine: &LocalEngine, table: &str) -> Result<usize, EngineError> {
    match engine.row_count(table) {
        Ok(n) => Ok(n),
        Err(EngineError::TableNotFound(_)) => Ok(0),
        Err(e) => Err(e),
    }
}

impl JsonlContactSink {
    pub fn open(engine: Arc<LocalEngine>, table: &str, path: &Path) -> Result<Self, SinkError> {
        let exported = table_rows(&engine, table)?;
        Ok(Self {
            engine,
            table: table.to_string(),
            path: path.to_path_buf(),
            exported: Mutex::new(exported),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written to the file so far, including the ones present on open.
    pub fn exported(&self) -> usize {
        self.exported.lock().map(|n| *n).unwrap_or_default()
    }
}

impl ContactSink for JsonlContactSink {
    fn commit(&self, region: &str) -> Result<usize, SinkError> {
        let mut exported = self.exported.lock().map_err(|_| SinkError::LockPoisoned)?;
        if table_rows(&self.engine, &self.table)? <= *exported {
            return Ok(0);
        }
        let rows: Vec<_> = self.engine.contacts(&self.table)?.into_iter().skip(*exported).collect();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = BufWriter::new(file);
        for row in &rows {
            writeln!(writer, "{}", serde_json::to_string(row)?)?;
        }
        writer.flush()?;
        writer.get_ref().sync_data()?;

        *exported += rows.len();
        tracing::info!(region = %region, rows = rows.len(), path = %self.path.display(), "Contacts exported");
        Ok(rows.len())
    }
}
