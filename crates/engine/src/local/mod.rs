//! In-process query engine.
//!
//! Holds ping and contact tables in memory and executes staging and pairwise
//! matching the way the production engine does, including a per-call budget
//! on candidate pair comparisons. Used for tests, dry runs and small
//! deployments.

mod matching;
mod queries;

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use grafo_core::{ContactRecord, Ping};
use tracing::{debug, info};

use crate::engine::QueryEngine;
use crate::error::EngineError;
use crate::request::{ContactWindowRequest, QueryStats, StagingRequest};
use crate::schema::{TableKind, TableSpec};

#[derive(Debug)]
enum TableData {
    Pings(Vec<Ping>),
    Contacts(Vec<ContactRecord>),
}

#[derive(Debug)]
struct Table {
    spec: TableSpec,
    data: TableData,
}

impl Table {
    fn empty(spec: TableSpec) -> Self {
        let data = match spec.kind {
            TableKind::Pings => TableData::Pings(Vec::new()),
            TableKind::Contacts => TableData::Contacts(Vec::new()),
        };
        Self { spec, data }
    }

    fn len(&self) -> usize {
        match &self.data {
            TableData::Pings(rows) => rows.len(),
            TableData::Contacts(rows) => rows.len(),
        }
    }

    fn pings(&self) -> Result<&Vec<Ping>, EngineError> {
        match &self.data {
            TableData::Pings(rows) => Ok(rows),
            TableData::Contacts(_) => Err(wrong_kind(&self.spec, TableKind::Pings)),
        }
    }

    fn pings_mut(&mut self) -> Result<&mut Vec<Ping>, EngineError> {
        match &mut self.data {
            TableData::Pings(rows) => Ok(rows),
            TableData::Contacts(_) => Err(wrong_kind(&self.spec, TableKind::Pings)),
        }
    }

    fn contacts(&self) -> Result<&Vec<ContactRecord>, EngineError> {
        match &self.data {
            TableData::Contacts(rows) => Ok(rows),
            TableData::Pings(_) => Err(wrong_kind(&self.spec, TableKind::Contacts)),
        }
    }

    fn contacts_mut(&mut self) -> Result<&mut Vec<ContactRecord>, EngineError> {
        match &mut self.data {
            TableData::Contacts(rows) => Ok(rows),
            TableData::Pings(_) => Err(wrong_kind(&self.spec, TableKind::Contacts)),
        }
    }
}

fn wrong_kind(spec: &TableSpec, expected: TableKind) -> EngineError {
    EngineError::WrongTableKind {
        table: spec.name.clone(),
        expected: expected.to_string(),
        actual: spec.kind.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct LocalEngine {
    tables: RwLock<HashMap<String, Table>>,
    /// Maximum candidate pair comparisons per matching call.
    comparison_budget: Option<u64>,
}

impl LocalEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_comparison_budget(mut self, budget: u64) -> Self {
        self.comparison_budget = Some(budget);
        self
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Table>>, EngineError> {
        self.tables.read().map_err(|_| EngineError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Table>>, EngineError> {
        self.tables.write().map_err(|_| EngineError::LockPoisoned)
    }

    /// Load raw pings, creating the table on first use.
    pub fn insert_pings(
        &self,
        table: &str,
        pings: impl IntoIterator<Item = Ping>,
    ) -> Result<usize, EngineError> {
        let mut tables = self.write()?;
        let rows = tables
            .entry(table.to_string())
            .or_insert_with(|| Table::empty(TableSpec::pings(table)))
            .pings_mut()?;
        let before = rows.len();
        rows.extend(pings);
        Ok(rows.len() - before)
    }

    /// Load contact rows directly, creating the table on first use.
    pub fn insert_contacts(
        &self,
        table: &str,
        contacts: impl IntoIterator<Item = ContactRecord>,
    ) -> Result<usize, EngineError> {
        let mut tables = self.write()?;
        let rows = tables
            .entry(table.to_string())
            .or_insert_with(|| Table::empty(TableSpec::contacts(table)))
            .contacts_mut()?;
        let before = rows.len();
        rows.extend(contacts);
        Ok(rows.len() - before)
    }

    pub fn table_exists(&self, name: &str) -> Result<bool, EngineError> {
        Ok(self.read()?.contains_key(name))
    }

    pub fn row_count(&self, name: &str) -> Result<usize, EngineError> {
        self.read()?
            .get(name)
            .map(Table::len)
            .ok_or_else(|| EngineError::TableNotFound(name.to_string()))
    }

    /// Snapshot of a contact table.
    pub fn contacts(&self, name: &str) -> Result<Vec<ContactRecord>, EngineError> {
        let tables = self.read()?;
        let table = tables
            .get(name)
            .ok_or_else(|| EngineError::TableNotFound(name.to_string()))?;
        Ok(table.contacts()?.clone())
    }
}

impl QueryEngine for LocalEngine {
    fn create_table(&self, spec: &TableSpec) -> Result<(), EngineError> {
        let mut tables = self.write()?;
        if tables.contains_key(&spec.name) {
            return Err(EngineError::TableExists(spec.name.clone()));
        }
        debug!(table = %spec.name, kind = %spec.kind, "Creating table");
        tables.insert(spec.name.clone(), Table::empty(spec.clone()));
        Ok(())
    }

    fn drop_table(&self, name: &str, missing_ok: bool) -> Result<(), EngineError> {
        let mut tables = self.write()?;
        match tables.remove(name) {
            Some(_) => {
                debug!(table = %name, "Dropped table");
                Ok(())
            }
            None if missing_ok => Ok(()),
            None => Err(EngineError::TableNotFound(name.to_string())),
        }
    }

    fn stage_pings(&self, request: &StagingRequest) -> Result<QueryStats, EngineError> {
        let started = Instant::now();
        let mut tables = self.write()?;

        let source = tables
            .get(&request.source_table)
            .ok_or_else(|| EngineError::TableNotFound(request.source_table.clone()))?
            .pings()?;
        let rows_read = source.len() as u64;
        let staged: Vec<Ping> = source
            .iter()
            .filter(|p| {
                p.region_code == request.region_code
                    && p.timestamp >= request.start
                    && p.timestamp < request.end
                    && p.accuracy <= request.max_accuracy
            })
            .cloned()
            .collect();

        let staging = tables
            .get_mut(&request.staging_table)
            .ok_or_else(|| EngineError::TableNotFound(request.staging_table.clone()))?
            .pings_mut()?;
        let rows_written = staged.len() as u64;
        staging.extend(staged);

        info!(
            region = %request.region_code,
            staging = %request.staging_table,
            rows = rows_written,
            "Staged pings"
        );
        Ok(QueryStats {
            rows_read,
            rows_written,
            comparisons: 0,
            elapsed: started.elapsed(),
        })
    }

    fn append_contacts(&self, request: &ContactWindowRequest) -> Result<QueryStats, EngineError> {
        let started = Instant::now();

        let outcome = {
            let tables = self.read()?;
            let staging = tables
                .get(&request.staging_table)
                .ok_or_else(|| EngineError::TableNotFound(request.staging_table.clone()))?
                .pings()?;
            if !tables.contains_key(&request.destination_table) {
                return Err(EngineError::TableNotFound(request.destination_table.clone()));
            }
            matching::match_window(staging, request, self.comparison_budget)?
        };

        let mut tables = self.write()?;
        let destination = tables
            .get_mut(&request.destination_table)
            .ok_or_else(|| EngineError::TableNotFound(request.destination_table.clone()))?
            .contacts_mut()?;
        let rows_written = outcome.contacts.len() as u64;
        destination.extend(outcome.contacts);

        Ok(QueryStats {
            rows_read: outcome.rows_read,
            rows_written,
            comparisons: outcome.comparisons,
            elapsed: started.elapsed(),
        })
    }
}
