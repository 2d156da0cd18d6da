use crate::error::EngineError;
use crate::request::{ContactWindowRequest, QueryStats, StagingRequest};
use crate::schema::TableSpec;

/// The operations the matching executor needs from a query engine.
///
/// Every call blocks until the engine finished. Implementations must report
/// budget exhaustion as [`EngineError::ResourcesExceeded`] and nothing else.
pub trait QueryEngine: Send + Sync {
    fn create_table(&self, spec: &TableSpec) -> Result<(), EngineError>;

    /// Drop `name`. With `missing_ok` an absent table is not an error.
    fn drop_table(&self, name: &str, missing_ok: bool) -> Result<(), EngineError>;

    fn stage_pings(&self, request: &StagingRequest) -> Result<QueryStats, EngineError>;

    fn append_contacts(&self, request: &ContactWindowRequest) -> Result<QueryStats, EngineError>;
}
