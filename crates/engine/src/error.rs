//! Errors raised at the query-engine boundary.

/// Errors that can occur while talking to a query engine.
///
/// [`EngineError::ResourcesExceeded`] is the only variant callers are
/// expected to recover from; everything else aborts the calling job.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The call needed more resources (time, memory, scanned data) than the
    /// engine grants a single query.
    #[error("Resources exceeded: {used} units requested, budget is {budget}")]
    ResourcesExceeded { used: u64, budget: u64 },

    /// The query failed on the engine side.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("Table {0} already exists")]
    TableExists(String),

    /// The table exists but holds a different kind of rows.
    #[error("Table {table} holds {actual} rows, expected {expected}")]
    WrongTableKind {
        table: String,
        expected: String,
        actual: String,
    },

    #[error("Engine lock poisoned")]
    LockPoisoned,
}

impl EngineError {
    pub fn is_resources_exceeded(&self) -> bool {
        matches!(self, EngineError::ResourcesExceeded { .. })
    }
}
